//! CLI command implementations.

pub mod pull;
pub mod push;
pub mod status;
pub mod sync;

use crate::dir_store::{DirConnectivity, JsonDirStore};
use replica_engine::{FileKeyValueStore, SyncConfig, SyncOrchestrator};
use replica_protocol::{SyncResult, TableName};
use std::error::Error;
use std::path::Path;
use std::sync::Arc;

/// Result type shared by every command.
pub type CommandResult<T = ()> = Result<T, Box<dyn Error>>;

/// File inside the local directory holding the watermark.
pub const STATE_FILE: &str = ".replica-state.json";

/// Orchestrator over two directories.
pub type DirOrchestrator = SyncOrchestrator<JsonDirStore, JsonDirStore>;

/// Resolves `--tables`; an empty list means every table.
///
/// Unknown names are skipped with a warning. Naming only unknown tables is
/// an error.
pub fn select_tables(names: &[String]) -> CommandResult<Vec<TableName>> {
    if names.is_empty() {
        return Ok(TableName::ALL.to_vec());
    }
    let config = SyncConfig::default().with_table_names(names.iter().map(String::as_str));
    if config.tables.is_empty() {
        return Err(format!("no known tables in {names:?}").into());
    }
    Ok(config.tables)
}

/// Builds an orchestrator syncing `local` with `remote`.
pub fn open_orchestrator(
    local: &Path,
    remote: &Path,
    config: SyncConfig,
) -> CommandResult<DirOrchestrator> {
    let local_store = JsonDirStore::open(local)?;
    let state = FileKeyValueStore::open(&local.join(STATE_FILE))?;
    let orchestrator = SyncOrchestrator::new(
        config,
        Arc::new(local_store),
        Arc::new(JsonDirStore::at(remote)),
        Arc::new(DirConnectivity::new(remote)),
        Box::new(state),
    )?;
    Ok(orchestrator)
}

/// Prints a sync result and turns a fatal error into a failing exit.
pub fn report(operation: &str, result: &SyncResult, format: &str) -> CommandResult {
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
        _ => {
            print_text_result(operation, result);
        }
    }

    match &result.error {
        Some(error) => Err(format!("{operation} failed: {error}").into()),
        None => Ok(()),
    }
}

fn print_text_result(operation: &str, result: &SyncResult) {
    let status = if result.is_success() { "ok" } else { "FAILED" };
    println!("{operation}: {status}");
    println!("  Records:      {}", result.record_count);

    let tables: Vec<&str> = result.synced_tables.iter().map(TableName::as_str).collect();
    if tables.is_empty() {
        println!("  Tables:       -");
    } else {
        println!("  Tables:       {}", tables.join(", "));
    }

    if !result.conflicts.is_empty() {
        println!("  Conflicts:    {}", result.conflicts.len());
        for conflict in &result.conflicts {
            println!(
                "    {}#{} ({})",
                conflict.table,
                conflict.record_id,
                conflict.differing_fields().join(", ")
            );
        }
    }

    for error in &result.table_errors {
        println!("  Skipped:      {error}");
    }
    if let Some(error) = &result.error {
        println!("  Error:        {error}");
    }
}
