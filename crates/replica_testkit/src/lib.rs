//! # Replica Testkit
//!
//! Test utilities for the replica sync engine.
//!
//! This crate provides:
//! - Record builders and an orchestrator harness over in-memory stores
//! - Property-based test generators using proptest
//! - A gated remote store for holding a pull in flight
//!
//! ## Usage
//!
//! ```rust,ignore
//! use replica_testkit::prelude::*;
//!
//! #[test]
//! fn pulls_products() {
//!     let harness = TestHarness::new(&[TableName::Products]);
//!     harness.remote.seed(TableName::Products, products(3, at(0)));
//!     let result = harness.orchestrator.pull(false, &ConflictResolutionStrategy::ServerWins);
//!     assert_eq!(result.record_count, 3);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod gated;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::gated::*;
    pub use crate::generators::*;
    pub use replica_protocol::{ConflictResolutionStrategy, Record, RecordId, TableName};
}

pub use fixtures::*;
pub use gated::*;
pub use generators::*;
