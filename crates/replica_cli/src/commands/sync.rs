//! Two-way sync command implementation.

use super::{open_orchestrator, report, select_tables, CommandResult};
use replica_engine::SyncConfig;
use replica_protocol::ConflictResolutionStrategy;
use std::path::Path;

/// Runs a full pull followed by a push.
pub fn run(
    local: &Path,
    remote: &Path,
    tables: &[String],
    strategy: &str,
    format: &str,
) -> CommandResult {
    let strategy: ConflictResolutionStrategy = strategy.parse()?;
    let config = SyncConfig::new(select_tables(tables)?).with_strategy(strategy.clone());
    let orchestrator = open_orchestrator(local, remote, config)?;

    let result = orchestrator.sync(&strategy);
    report("sync", &result, format)
}
