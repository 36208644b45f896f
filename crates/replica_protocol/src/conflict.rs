//! Conflict detection records and resolution.

use crate::error::ProtocolError;
use crate::record::{Record, RecordId, UPDATED_AT_FIELD};
use crate::table::TableName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of collision between a local and a remote version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Both sides changed the same record.
    Update,
    /// One side deleted a record the other side changed.
    Delete,
    /// Both sides created a record with the same identity.
    Create,
}

/// A record that exists locally and remotely with differing contents.
///
/// Produced while pulling, consumed immediately by the resolver, and
/// reported back through `SyncResult`. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Table the record belongs to.
    pub table: TableName,
    /// Identity shared by both versions.
    pub record_id: RecordId,
    /// Local version.
    pub local: Record,
    /// Remote version.
    pub remote: Record,
    /// Kind of conflict.
    pub conflict_type: ConflictType,
    /// When the conflict was detected.
    pub detected_at: DateTime<Utc>,
}

impl ConflictRecord {
    /// Creates a conflict record.
    pub fn new(
        table: TableName,
        record_id: RecordId,
        local: Record,
        remote: Record,
        conflict_type: ConflictType,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            table,
            record_id,
            local,
            remote,
            conflict_type,
            detected_at,
        }
    }

    /// Creates an update-update conflict detected now.
    pub fn update(table: TableName, record_id: RecordId, local: Record, remote: Record) -> Self {
        Self::new(
            table,
            record_id,
            local,
            remote,
            ConflictType::Update,
            Utc::now(),
        )
    }

    /// Returns the fields whose values differ between the two versions.
    pub fn differing_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = self
            .local
            .fields()
            .map(|(name, _)| name.as_str())
            .chain(self.remote.fields().map(|(name, _)| name.as_str()))
            .filter(|name| self.local.get(name) != self.remote.get(name))
            .collect();
        fields.sort_unstable();
        fields.dedup();
        fields
    }

    /// Resolves this conflict with the given strategy.
    pub fn resolve(&self, strategy: &ConflictResolutionStrategy) -> Record {
        resolve(&self.local, &self.remote, strategy)
    }
}

/// How a conflict between a local and a remote version is settled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "compare_field", rename_all = "snake_case")]
pub enum ConflictResolutionStrategy {
    /// The remote version always wins.
    ServerWins,
    /// The local version always wins.
    ClientWins,
    /// The version with the strictly greater timestamp in the named field wins.
    NewerWins(String),
    /// The newer version's non-null fields overlaid on the older version.
    Merge(String),
}

impl ConflictResolutionStrategy {
    /// `NewerWins` comparing `updated_at`.
    pub fn newer_wins() -> Self {
        ConflictResolutionStrategy::NewerWins(UPDATED_AT_FIELD.to_string())
    }

    /// `Merge` comparing `updated_at`.
    pub fn merge() -> Self {
        ConflictResolutionStrategy::Merge(UPDATED_AT_FIELD.to_string())
    }

    /// Returns the timestamp field this strategy compares, if any.
    pub fn compare_field(&self) -> Option<&str> {
        match self {
            ConflictResolutionStrategy::NewerWins(field)
            | ConflictResolutionStrategy::Merge(field) => Some(field),
            _ => None,
        }
    }

    /// Returns the strategy's name without its compare field.
    pub fn name(&self) -> &'static str {
        match self {
            ConflictResolutionStrategy::ServerWins => "server-wins",
            ConflictResolutionStrategy::ClientWins => "client-wins",
            ConflictResolutionStrategy::NewerWins(_) => "newer-wins",
            ConflictResolutionStrategy::Merge(_) => "merge",
        }
    }

    /// Resolves a conflict according to this strategy.
    pub fn resolve(&self, local: &Record, remote: &Record) -> Record {
        resolve(local, remote, self)
    }
}

impl Default for ConflictResolutionStrategy {
    fn default() -> Self {
        Self::newer_wins()
    }
}

impl fmt::Display for ConflictResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.compare_field() {
            Some(field) if field != UPDATED_AT_FIELD => write!(f, "{}:{field}", self.name()),
            _ => f.write_str(self.name()),
        }
    }
}

impl FromStr for ConflictResolutionStrategy {
    type Err = ProtocolError;

    /// Parses `server-wins`, `client-wins`, `newer-wins[:field]` or
    /// `merge[:field]`. Underscores are accepted in place of dashes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, field) = match s.trim().split_once(':') {
            Some((name, field)) => (name, Some(field.trim())),
            None => (s.trim(), None),
        };
        let field = match field {
            Some("") => return Err(ProtocolError::UnknownStrategy(s.to_string())),
            Some(field) => field.to_string(),
            None => UPDATED_AT_FIELD.to_string(),
        };

        match name.to_ascii_lowercase().replace('_', "-").as_str() {
            "server-wins" if s.contains(':') => Err(ProtocolError::UnknownStrategy(s.to_string())),
            "client-wins" if s.contains(':') => Err(ProtocolError::UnknownStrategy(s.to_string())),
            "server-wins" => Ok(ConflictResolutionStrategy::ServerWins),
            "client-wins" => Ok(ConflictResolutionStrategy::ClientWins),
            "newer-wins" => Ok(ConflictResolutionStrategy::NewerWins(field)),
            "merge" => Ok(ConflictResolutionStrategy::Merge(field)),
            _ => Err(ProtocolError::UnknownStrategy(s.to_string())),
        }
    }
}

/// Settles a conflict between a local and a remote version.
///
/// - `ServerWins` returns `remote`, `ClientWins` returns `local`.
/// - `NewerWins(field)` returns `local` only when both timestamps parse and
///   the local one is strictly greater. Ties and unparsable timestamps go to
///   `remote`, so a bad timestamp never stalls a sync.
/// - `Merge(field)` picks the winner as `NewerWins` does, then overlays the
///   winner's non-null fields on the loser. Fields that are null or absent in
///   the winner keep the loser's value. Merging is top-level only; nested
///   objects and arrays are replaced, never merged.
///
/// The function is pure: identical inputs always produce identical outputs.
pub fn resolve(local: &Record, remote: &Record, strategy: &ConflictResolutionStrategy) -> Record {
    match strategy {
        ConflictResolutionStrategy::ServerWins => remote.clone(),
        ConflictResolutionStrategy::ClientWins => local.clone(),
        ConflictResolutionStrategy::NewerWins(field) => {
            let (winner, _) = newer_and_older(local, remote, field);
            winner.clone()
        }
        ConflictResolutionStrategy::Merge(field) => {
            let (winner, loser) = newer_and_older(local, remote, field);
            overlay(winner, loser)
        }
    }
}

/// Orders the two versions as (winner, loser) by the timestamp in `field`.
fn newer_and_older<'a>(
    local: &'a Record,
    remote: &'a Record,
    field: &str,
) -> (&'a Record, &'a Record) {
    match (local.timestamp(field), remote.timestamp(field)) {
        (Some(local_ts), Some(remote_ts)) if local_ts > remote_ts => (local, remote),
        _ => (remote, local),
    }
}

fn overlay(winner: &Record, loser: &Record) -> Record {
    let mut merged = loser.clone();
    for (field, value) in winner.fields() {
        if !value.is_null() || merged.get(field).is_none() {
            merged.insert(field.clone(), value.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    fn product(updated_at: &str, price: i64) -> Record {
        Record::new()
            .with("id", 1)
            .with("updated_at", updated_at)
            .with("price", price)
    }

    #[test]
    fn server_and_client_wins() {
        let local = product("2024-01-01T00:00:00Z", 10);
        let remote = product("2023-01-01T00:00:00Z", 12);

        assert_eq!(
            resolve(&local, &remote, &ConflictResolutionStrategy::ServerWins),
            remote
        );
        assert_eq!(
            resolve(&local, &remote, &ConflictResolutionStrategy::ClientWins),
            local
        );
    }

    #[test]
    fn newer_wins_picks_strictly_newer() {
        let older = product("2024-01-01T00:00:00Z", 10);
        let newer = product("2024-01-02T00:00:00Z", 12);
        let strategy = ConflictResolutionStrategy::newer_wins();

        assert_eq!(resolve(&older, &newer, &strategy), newer);
        assert_eq!(resolve(&newer, &older, &strategy), newer);
    }

    #[test]
    fn newer_wins_ties_go_to_remote() {
        let local = product("2024-01-01T00:00:00Z", 10);
        let remote = product("2024-01-01T00:00:00Z", 12);
        let resolved = resolve(&local, &remote, &ConflictResolutionStrategy::newer_wins());
        assert_eq!(resolved, remote);
    }

    #[test]
    fn newer_wins_unparsable_goes_to_remote() {
        let local = product("2099-01-01T00:00:00Z", 10);
        let remote = product("not a date", 12);
        let resolved = resolve(&local, &remote, &ConflictResolutionStrategy::newer_wins());
        assert_eq!(resolved, remote);

        let local = product("garbage", 10);
        let remote = product("2000-01-01T00:00:00Z", 12);
        let resolved = resolve(&local, &remote, &ConflictResolutionStrategy::newer_wins());
        assert_eq!(resolved, remote);
    }

    #[test]
    fn newer_wins_uses_named_field() {
        let local = Record::new()
            .with("id", 1)
            .with("modified", "2024-03-01T00:00:00Z")
            .with("updated_at", "2020-01-01T00:00:00Z");
        let remote = Record::new()
            .with("id", 1)
            .with("modified", "2024-02-01T00:00:00Z")
            .with("updated_at", "2025-01-01T00:00:00Z");

        let strategy = ConflictResolutionStrategy::NewerWins("modified".into());
        assert_eq!(resolve(&local, &remote, &strategy), local);
    }

    #[test]
    fn merge_overlays_winner_on_loser() {
        let local = Record::new()
            .with("id", 1)
            .with("updated_at", "2024-01-01T00:00:00Z")
            .with("name", "Green tea")
            .with("sku", "GT-1")
            .with("price", 10);
        let remote = Record::new()
            .with("id", 1)
            .with("updated_at", "2024-01-02T00:00:00Z")
            .with("name", Value::Null)
            .with("price", 12)
            .with("stock", 4);

        let merged = resolve(&local, &remote, &ConflictResolutionStrategy::merge());

        assert_eq!(merged.get("price"), Some(&json!(12)));
        assert_eq!(merged.get("stock"), Some(&json!(4)));
        assert_eq!(merged.get("name"), Some(&json!("Green tea")));
        assert_eq!(merged.get("sku"), Some(&json!("GT-1")));
        assert_eq!(merged.get("updated_at"), Some(&json!("2024-01-02T00:00:00Z")));
    }

    #[test]
    fn merge_keeps_null_when_neither_side_has_value() {
        let local = Record::new()
            .with("id", 1)
            .with("updated_at", "2024-01-01T00:00:00Z");
        let remote = Record::new()
            .with("id", 1)
            .with("updated_at", "2024-01-02T00:00:00Z")
            .with("note", Value::Null);

        let merged = resolve(&local, &remote, &ConflictResolutionStrategy::merge());
        assert_eq!(merged.get("note"), Some(&Value::Null));
    }

    #[test]
    fn merge_replaces_nested_values_wholesale() {
        let local = Record::new()
            .with("id", 1)
            .with("updated_at", "2024-01-01T00:00:00Z")
            .with("meta", json!({"color": "red", "size": "L"}));
        let remote = Record::new()
            .with("id", 1)
            .with("updated_at", "2024-01-02T00:00:00Z")
            .with("meta", json!({"color": "blue"}));

        let merged = resolve(&local, &remote, &ConflictResolutionStrategy::merge());
        assert_eq!(merged.get("meta"), Some(&json!({"color": "blue"})));
    }

    #[test]
    fn differing_fields_lists_changed_and_one_sided_fields() {
        let local = product("2024-01-01T00:00:00Z", 10).with("sku", "A");
        let remote = product("2024-01-01T00:00:00Z", 12);
        let conflict = ConflictRecord::update(TableName::Products, RecordId::from(1), local, remote);

        assert_eq!(conflict.differing_fields(), vec!["price", "sku"]);
        assert_eq!(conflict.conflict_type, ConflictType::Update);
    }

    #[test]
    fn strategy_parsing() {
        assert_eq!(
            "server-wins".parse::<ConflictResolutionStrategy>().unwrap(),
            ConflictResolutionStrategy::ServerWins
        );
        assert_eq!(
            "client_wins".parse::<ConflictResolutionStrategy>().unwrap(),
            ConflictResolutionStrategy::ClientWins
        );
        assert_eq!(
            "newer-wins".parse::<ConflictResolutionStrategy>().unwrap(),
            ConflictResolutionStrategy::newer_wins()
        );
        assert_eq!(
            "merge:modified_at".parse::<ConflictResolutionStrategy>().unwrap(),
            ConflictResolutionStrategy::Merge("modified_at".into())
        );

        assert!("last-write".parse::<ConflictResolutionStrategy>().is_err());
        assert!("merge:".parse::<ConflictResolutionStrategy>().is_err());
        assert!("server-wins:updated_at"
            .parse::<ConflictResolutionStrategy>()
            .is_err());
    }

    #[test]
    fn strategy_display_roundtrips() {
        for strategy in [
            ConflictResolutionStrategy::ServerWins,
            ConflictResolutionStrategy::ClientWins,
            ConflictResolutionStrategy::newer_wins(),
            ConflictResolutionStrategy::Merge("modified".into()),
        ] {
            let text = strategy.to_string();
            assert_eq!(text.parse::<ConflictResolutionStrategy>().unwrap(), strategy);
        }
    }

    fn timestamp() -> impl Strategy<Value = i64> {
        // 2000-01-01 .. 2040-01-01 in epoch millis
        946_684_800_000_i64..2_208_988_800_000_i64
    }

    fn side(id: i64) -> impl Strategy<Value = Record> {
        (
            timestamp(),
            prop::option::of(any::<i32>()),
            prop::option::of("[a-z]{0,8}"),
            prop::option::of(any::<bool>()),
        )
            .prop_map(move |(ts, price, name, active)| {
                let mut record = Record::new().with("id", id).with("updated_at", ts);
                record.insert("price", price.map_or(Value::Null, Value::from));
                if let Some(name) = name {
                    record.insert("name", name);
                }
                if let Some(active) = active {
                    record.insert("active", active);
                }
                record
            })
    }

    fn any_strategy() -> impl Strategy<Value = ConflictResolutionStrategy> {
        prop_oneof![
            Just(ConflictResolutionStrategy::ServerWins),
            Just(ConflictResolutionStrategy::ClientWins),
            Just(ConflictResolutionStrategy::newer_wins()),
            Just(ConflictResolutionStrategy::merge()),
        ]
    }

    proptest! {
        #[test]
        fn resolve_is_deterministic(
            local in side(1),
            remote in side(1),
            strategy in any_strategy(),
        ) {
            prop_assert_eq!(
                resolve(&local, &remote, &strategy),
                resolve(&local, &remote, &strategy)
            );
        }

        #[test]
        fn newer_wins_returns_remote_iff_remote_not_older(
            local in side(1),
            remote in side(1),
        ) {
            let local_ts = local.timestamp("updated_at").unwrap();
            let remote_ts = remote.timestamp("updated_at").unwrap();
            let resolved = resolve(&local, &remote, &ConflictResolutionStrategy::newer_wins());

            if local_ts > remote_ts {
                prop_assert_eq!(resolved, local);
            } else {
                prop_assert_eq!(resolved, remote);
            }
        }

        #[test]
        fn merge_keeps_winner_values_and_fills_gaps(
            local in side(1),
            remote in side(1),
        ) {
            let merged = resolve(&local, &remote, &ConflictResolutionStrategy::merge());
            let (winner, loser) = if local.timestamp("updated_at") > remote.timestamp("updated_at") {
                (&local, &remote)
            } else {
                (&remote, &local)
            };

            for (field, value) in winner.fields() {
                if !value.is_null() {
                    prop_assert_eq!(merged.get(field), Some(value));
                }
            }
            for (field, value) in loser.fields() {
                if winner.is_null(field) {
                    prop_assert_eq!(merged.get(field), Some(value));
                }
            }
        }
    }
}
