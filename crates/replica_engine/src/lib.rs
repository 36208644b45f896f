//! # Replica Sync Engine
//!
//! Offline-first, bidirectional sync between a local store and a remote,
//! multi-writer store.
//!
//! This crate provides:
//! - Selective and full pull with per-record conflict resolution
//! - Push of locally dirty records
//! - Realtime change feeds applied in order per table
//! - A sync orchestrator with an in-flight guard, connectivity gating,
//!   lifecycle events and a periodic timer
//! - Persisted, monotonic watermarks, one per table
//!
//! ## Architecture
//!
//! Callers only talk to [`SyncOrchestrator`]. It drives a [`PullEngine`]
//! and a [`PushEngine`] behind a single in-flight flag and hands realtime
//! feeds to a [`RealtimeSubscriber`]. The local and remote stores are
//! collaborators behind the [`LocalStore`] and [`RemoteStore`] traits.
//!
//! ## Key Invariants
//!
//! - At most one pull, push or two-way sync is in flight
//! - A table watermark only advances after that table committed; the
//!   global one only after every requested table synced
//! - A per-table remote failure never blocks the other tables
//! - A failed local commit aborts the pull
//! - Realtime applies and pull commits never interleave

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod config;
mod error;
mod kv;
mod memory;
mod orchestrator;
mod pull;
mod push;
mod realtime;
mod state;
mod store;

pub use cancel::CancelHandle;
pub use config::{SyncConfig, DEFAULT_AUTO_SYNC_INTERVAL, DEFAULT_WATERMARK_KEY};
pub use error::{EngineResult, SyncError};
pub use kv::FileKeyValueStore;
pub use memory::{MemoryKeyValueStore, MemoryLocalStore, MemoryRemoteStore, StaticConnectivity};
pub use orchestrator::{ListenerId, SyncEvent, SyncOperation, SyncOrchestrator};
pub use pull::PullEngine;
pub use push::PushEngine;
pub use realtime::RealtimeSubscriber;
pub use state::{SyncState, SyncStateStore, SyncStats, SyncStatus};
pub use store::{
    Connectivity, EventCallback, GuardedStore, KeyValueStore, LocalStore, LocalWriteGuard,
    RemoteStore, Subscription,
};
