//! Status command implementation.

use super::{select_tables, CommandResult, STATE_FILE};
use crate::dir_store::JsonDirStore;
use chrono::{DateTime, Utc};
use replica_engine::{FileKeyValueStore, SyncStateStore, DEFAULT_WATERMARK_KEY};
use serde::Serialize;
use std::path::Path;

/// Sync status of a local directory.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Local directory.
    pub local: String,
    /// Remote directory, if given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    /// Whether the remote directory exists.
    pub online: bool,
    /// Start of the last pull in which every requested table synced.
    pub last_sync: Option<DateTime<Utc>>,
    /// Per-table record counts.
    pub tables: Vec<TableStatus>,
}

/// Record counts of one table.
#[derive(Debug, Serialize)]
pub struct TableStatus {
    /// Table name.
    pub name: String,
    /// Records in the local directory.
    pub local_records: usize,
    /// Records in the remote directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_records: Option<usize>,
    /// Watermark selective pulls of this table start from.
    pub last_sync: Option<DateTime<Utc>>,
}

/// Runs the status command.
pub fn run(
    local: &Path,
    remote: Option<&Path>,
    tables: &[String],
    format: &str,
) -> CommandResult {
    if !local.is_dir() {
        return Err(format!("No local store found at {:?}", local).into());
    }

    let state = SyncStateStore::load(
        Box::new(FileKeyValueStore::open(&local.join(STATE_FILE))?),
        DEFAULT_WATERMARK_KEY,
    )?;
    let local_store = JsonDirStore::at(local);
    let remote_store = remote
        .filter(|path| path.is_dir())
        .map(JsonDirStore::at);

    let mut report = StatusReport {
        local: local.display().to_string(),
        remote: remote.map(|path| path.display().to_string()),
        online: remote_store.is_some(),
        last_sync: state.last_sync(),
        tables: Vec::new(),
    };

    for table in select_tables(tables)? {
        let remote_records = match &remote_store {
            Some(store) => Some(store.read_table(table)?.len()),
            None => None,
        };
        report.tables.push(TableStatus {
            name: table.to_string(),
            local_records: local_store.read_table(table)?.len(),
            remote_records,
            last_sync: state.table_watermark(table),
        });
    }

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }

    Ok(())
}

fn print_text_output(report: &StatusReport) {
    println!("Replica Status");
    println!("==============");
    println!("Local:          {}", report.local);
    if let Some(remote) = &report.remote {
        let state = if report.online { "online" } else { "offline" };
        println!("Remote:         {remote} ({state})");
    }
    match report.last_sync {
        Some(at) => println!("Last sync:      {}", at.to_rfc3339()),
        None => println!("Last sync:      never"),
    }
    println!();
    println!("{:<12} {:>8} {:>8}  Last sync", "Table", "Local", "Remote");
    for table in &report.tables {
        let remote = table
            .remote_records
            .map_or_else(|| "-".to_string(), |count| count.to_string());
        let last_sync = table
            .last_sync
            .map_or_else(|| "never".to_string(), |at| at.to_rfc3339());
        println!(
            "{:<12} {:>8} {:>8}  {}",
            table.name, table.local_records, remote, last_sync
        );
    }
}
