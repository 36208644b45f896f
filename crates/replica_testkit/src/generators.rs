//! Property-based test generators using proptest.
//!
//! Provides strategies for records, strategies and timestamps that keep the
//! invariants the engine relies on (every record carries an `id`).

use crate::fixtures::{at, stamp};
use proptest::prelude::*;
use replica_protocol::{ConflictResolutionStrategy, Record, TableName};
use serde_json::Value;

/// Strategy for a known table.
pub fn table_strategy() -> impl Strategy<Value = TableName> {
    prop::sample::select(TableName::ALL.to_vec())
}

/// Strategy for a resolution strategy comparing `updated_at`.
pub fn resolution_strategy() -> impl Strategy<Value = ConflictResolutionStrategy> {
    prop_oneof![
        Just(ConflictResolutionStrategy::ServerWins),
        Just(ConflictResolutionStrategy::ClientWins),
        Just(ConflictResolutionStrategy::newer_wins()),
        Just(ConflictResolutionStrategy::merge()),
    ]
}

/// Strategy for a scalar field value, null included.
pub fn field_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z]{0,8}".prop_map(Value::from),
    ]
}

/// Strategy for an `updated_at` value: a valid timestamp most of the time,
/// occasionally garbage or missing.
pub fn updated_at_strategy() -> impl Strategy<Value = Option<Value>> {
    prop_oneof![
        8 => (0i64..1_000_000).prop_map(|offset| Some(Value::from(stamp(at(offset))))),
        1 => Just(Some(Value::from("not a timestamp"))),
        1 => Just(None),
    ]
}

/// Strategy for a record with the given id and a handful of fields.
pub fn record_strategy(id: i64) -> impl Strategy<Value = Record> {
    (
        prop::collection::btree_map("[a-e]", field_value_strategy(), 0..5),
        updated_at_strategy(),
    )
        .prop_map(move |(fields, updated_at)| {
            let mut record = Record::new().with("id", id);
            for (name, value) in fields {
                record.insert(name, value);
            }
            if let Some(updated_at) = updated_at {
                record.insert("updated_at", updated_at);
            }
            record
        })
}

/// Strategy for a local/remote pair sharing one identity.
pub fn record_pair_strategy() -> impl Strategy<Value = (Record, Record)> {
    (1i64..1000).prop_flat_map(|id| (record_strategy(id), record_strategy(id)))
}

/// Strategy for a batch of records with distinct ids `1..=n`.
pub fn record_batch_strategy(max: usize) -> impl Strategy<Value = Vec<Record>> {
    (0..=max).prop_flat_map(|n| {
        (1..=n as i64)
            .map(record_strategy)
            .collect::<Vec<_>>()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_records_have_ids((local, remote) in record_pair_strategy()) {
            prop_assert!(local.id().is_some());
            prop_assert_eq!(local.id(), remote.id());
        }

        #[test]
        fn batches_have_distinct_ids(batch in record_batch_strategy(8)) {
            let mut ids: Vec<_> = batch.iter().filter_map(Record::id).collect();
            let len = ids.len();
            ids.dedup();
            prop_assert_eq!(ids.len(), len);
        }
    }
}
