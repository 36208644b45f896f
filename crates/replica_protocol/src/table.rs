//! The closed set of synchronized tables.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A synchronized table.
///
/// The set is fixed at build time. Free-form names coming from configuration
/// or the command line go through [`FromStr`], which rejects anything
/// outside this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableName {
    /// Catalog of sellable products.
    Products,
    /// Product categories.
    Categories,
    /// Customer accounts.
    Customers,
    /// Suppliers products are purchased from.
    Suppliers,
    /// Sale headers.
    Sales,
    /// Line items belonging to sales.
    SaleItems,
    /// Purchase orders placed with suppliers.
    Purchases,
    /// Operating expenses.
    Expenses,
}

impl TableName {
    /// Every known table, in sync order.
    pub const ALL: [TableName; 8] = [
        TableName::Products,
        TableName::Categories,
        TableName::Customers,
        TableName::Suppliers,
        TableName::Sales,
        TableName::SaleItems,
        TableName::Purchases,
        TableName::Expenses,
    ];

    /// Returns the table's storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TableName::Products => "products",
            TableName::Categories => "categories",
            TableName::Customers => "customers",
            TableName::Suppliers => "suppliers",
            TableName::Sales => "sales",
            TableName::SaleItems => "sale_items",
            TableName::Purchases => "purchases",
            TableName::Expenses => "expenses",
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableName {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        TableName::ALL
            .into_iter()
            .find(|table| table.as_str() == normalized)
            .ok_or_else(|| ProtocolError::UnknownTable(s.to_string()))
    }
}
