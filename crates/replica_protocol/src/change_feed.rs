//! Change events delivered by a realtime feed.

use crate::error::{ProtocolError, ProtocolResult};
use crate::record::{Record, RecordId};
use crate::table::TableName;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Type of change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Record was created.
    Create,
    /// Record was updated.
    Update,
    /// Record was deleted.
    Delete,
}

impl FromStr for ChangeType {
    type Err = ProtocolError;

    /// Accepts both `create/update/delete` and the SQL-style
    /// `INSERT/UPDATE/DELETE` names realtime backends emit.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" | "insert" => Ok(ChangeType::Create),
            "update" => Ok(ChangeType::Update),
            "delete" => Ok(ChangeType::Delete),
            _ => Err(ProtocolError::UnknownChangeType(s.to_string())),
        }
    }
}

/// A single change observed on a remote table.
///
/// Creates and updates carry the full new record; deletes carry only the
/// identity of the removed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Table the change happened in.
    pub table: TableName,
    /// Type of change.
    pub change_type: ChangeType,
    /// Identity of the affected record.
    pub record_id: RecordId,
    /// New record contents (for Create/Update).
    pub record: Option<Record>,
}

impl ChangeEvent {
    /// Creates a create event.
    pub fn create(table: TableName, record: Record) -> ProtocolResult<Self> {
        Self::upsert(table, ChangeType::Create, record)
    }

    /// Creates an update event.
    pub fn update(table: TableName, record: Record) -> ProtocolResult<Self> {
        Self::upsert(table, ChangeType::Update, record)
    }

    /// Creates a delete event.
    pub fn delete(table: TableName, record_id: RecordId) -> Self {
        Self {
            table,
            change_type: ChangeType::Delete,
            record_id,
            record: None,
        }
    }

    fn upsert(table: TableName, change_type: ChangeType, record: Record) -> ProtocolResult<Self> {
        let record_id = record.require_id()?;
        Ok(Self {
            table,
            change_type,
            record_id,
            record: Some(record),
        })
    }

    /// Builds an event from a realtime payload.
    ///
    /// Realtime backends report an event type string together with the new
    /// row (inserts and updates) and the old row (deletes; often only the
    /// primary key).
    pub fn from_payload(
        table: TableName,
        event_type: &str,
        new_row: Option<Value>,
        old_row: Option<Value>,
    ) -> ProtocolResult<Self> {
        match event_type.parse::<ChangeType>()? {
            ChangeType::Delete => {
                let record_id = old_row
                    .as_ref()
                    .and_then(|row| row.get(crate::record::ID_FIELD))
                    .and_then(RecordId::from_value)
                    .ok_or_else(|| {
                        ProtocolError::InvalidRecord("delete event without an old id".into())
                    })?;
                Ok(Self::delete(table, record_id))
            }
            change_type => {
                let row = new_row.ok_or_else(|| {
                    ProtocolError::InvalidRecord(format!("{event_type} event without a new row"))
                })?;
                Self::upsert(table, change_type, Record::from_value(row)?)
            }
        }
    }

    /// Returns true for create and update events.
    pub fn is_upsert(&self) -> bool {
        matches!(self.change_type, ChangeType::Create | ChangeType::Update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn upsert_events_carry_identity() {
        let record = Record::new().with("id", 5).with("name", "Ada");
        let event = ChangeEvent::create(TableName::Customers, record.clone()).unwrap();

        assert_eq!(event.change_type, ChangeType::Create);
        assert_eq!(event.record_id, RecordId::from(5));
        assert_eq!(event.record, Some(record));
        assert!(event.is_upsert());
    }

    #[test]
    fn upsert_without_identity_is_rejected() {
        let record = Record::new().with("name", "nobody");
        assert!(ChangeEvent::update(TableName::Customers, record).is_err());
    }

    #[test]
    fn delete_event() {
        let event = ChangeEvent::delete(TableName::Sales, RecordId::from("s-1"));
        assert_eq!(event.change_type, ChangeType::Delete);
        assert!(event.record.is_none());
        assert!(!event.is_upsert());
    }

    #[test]
    fn change_type_accepts_sql_names() {
        assert_eq!("INSERT".parse::<ChangeType>().unwrap(), ChangeType::Create);
        assert_eq!("update".parse::<ChangeType>().unwrap(), ChangeType::Update);
        assert_eq!("DELETE".parse::<ChangeType>().unwrap(), ChangeType::Delete);
        assert!("TRUNCATE".parse::<ChangeType>().is_err());
    }

    #[test]
    fn from_payload_insert_and_delete() {
        let event = ChangeEvent::from_payload(
            TableName::Products,
            "INSERT",
            Some(json!({"id": 3, "name": "Mug"})),
            None,
        )
        .unwrap();
        assert_eq!(event.change_type, ChangeType::Create);
        assert_eq!(event.record_id, RecordId::from(3));

        let event =
            ChangeEvent::from_payload(TableName::Products, "DELETE", None, Some(json!({"id": 3})))
                .unwrap();
        assert_eq!(event.change_type, ChangeType::Delete);
        assert_eq!(event.record_id, RecordId::from(3));
    }

    #[test]
    fn from_payload_rejects_incomplete_events() {
        assert!(ChangeEvent::from_payload(TableName::Products, "UPDATE", None, None).is_err());
        assert!(
            ChangeEvent::from_payload(TableName::Products, "DELETE", None, Some(json!({})))
                .is_err()
        );
    }
}
