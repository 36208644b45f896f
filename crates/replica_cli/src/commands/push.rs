//! Push command implementation.

use super::{open_orchestrator, report, select_tables, CommandResult};
use replica_engine::SyncConfig;
use std::path::Path;

/// Runs the push command.
///
/// Directory stores keep no dirty flags, so every local record is uploaded.
pub fn run(local: &Path, remote: &Path, tables: &[String], format: &str) -> CommandResult {
    let config = SyncConfig::new(select_tables(tables)?);
    let orchestrator = open_orchestrator(local, remote, config)?;

    let result = orchestrator.push();
    report("push", &result, format)
}
