//! Pull command implementation.

use super::{open_orchestrator, report, select_tables, CommandResult};
use replica_engine::SyncConfig;
use replica_protocol::ConflictResolutionStrategy;
use std::path::Path;

/// Runs the pull command.
///
/// Without `full`, only records updated since each table's stored
/// watermark are fetched.
pub fn run(
    local: &Path,
    remote: &Path,
    tables: &[String],
    full: bool,
    strategy: &str,
    format: &str,
) -> CommandResult {
    let strategy: ConflictResolutionStrategy = strategy.parse()?;
    let config = SyncConfig::new(select_tables(tables)?).with_strategy(strategy.clone());
    let orchestrator = open_orchestrator(local, remote, config)?;

    let result = orchestrator.pull(!full, &strategy);
    report("pull", &result, format)
}
