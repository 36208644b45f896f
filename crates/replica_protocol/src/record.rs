//! Opaque keyed records.
//!
//! A record is a JSON object. The sync engine only ever looks at two fields:
//! the identity field (`id`) and, for time-based resolution, a timestamp field
//! (`updated_at` unless a strategy names another one). Every other field is
//! carried through untouched.

use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Name of the identity field every record carries.
pub const ID_FIELD: &str = "id";

/// Default field compared by time-based conflict resolution.
pub const UPDATED_AT_FIELD: &str = "updated_at";

/// Naive formats accepted for timestamp fields, interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Identity of a record within one table.
///
/// Remote stores hand out both numeric and textual keys. Both are kept in
/// their textual form, so a numeric `1` and a string `"1"` address the same
/// record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Creates an identity from its textual form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Extracts an identity from a JSON value.
    ///
    /// Strings and numbers are accepted; anything else (including an empty
    /// string) is not a usable identity.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) if !text.is_empty() => Some(Self(text.clone())),
            Value::Number(number) => Some(Self(number.to_string())),
            _ => None,
        }
    }

    /// Returns the textual form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

/// A single row: a mapping of field name to JSON value.
///
/// Equality is field-wise and independent of field order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wraps an existing JSON object.
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Converts a JSON value into a record.
    ///
    /// The value must be an object carrying a usable identity field.
    pub fn from_value(value: Value) -> ProtocolResult<Self> {
        match value {
            Value::Object(fields) => {
                let record = Self(fields);
                record.require_id()?;
                Ok(record)
            }
            other => Err(ProtocolError::InvalidRecord(format!(
                "expected a JSON object, found {}",
                json_kind(&other)
            ))),
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Returns the record identity, if present and usable.
    pub fn id(&self) -> Option<RecordId> {
        self.0.get(ID_FIELD).and_then(RecordId::from_value)
    }

    /// Returns the record identity or an `InvalidRecord` error.
    pub fn require_id(&self) -> ProtocolResult<RecordId> {
        self.id().ok_or_else(|| {
            ProtocolError::InvalidRecord(format!("record has no usable `{ID_FIELD}` field"))
        })
    }

    /// Gets a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Returns true if the field is absent or JSON `null`.
    pub fn is_null(&self, field: &str) -> bool {
        self.0.get(field).map_or(true, Value::is_null)
    }

    /// Sets a field, returning the previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    /// Removes a field, returning its value.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Parses a field as a timestamp.
    ///
    /// Returns `None` when the field is absent or not a recognizable
    /// timestamp; see [`parse_timestamp`].
    pub fn timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        self.0.get(field).and_then(parse_timestamp)
    }

    /// Iterates over all fields.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrows the underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Converts into the underlying JSON object.
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Converts into a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// Parses a JSON value as a UTC timestamp.
///
/// Accepted forms:
/// - RFC 3339 strings (`2024-05-01T10:00:00Z`, `2024-05-01T10:00:00.5+02:00`)
/// - Postgres-style strings with a short offset (`2024-05-01 10:00:00+00`)
/// - naive strings (`2024-05-01T10:00:00`, `2024-05-01 10:00:00.123`), read as UTC
/// - integers, read as milliseconds since the Unix epoch
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => parse_timestamp_str(text.trim()),
        Value::Number(number) => number
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}

fn parse_timestamp_str(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(parsed.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
