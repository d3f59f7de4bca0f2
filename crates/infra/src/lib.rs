//! # Driftq Infrastructure
//!
//! Concrete back-ends for the ports defined in `driftq-core`.
//!
//! This crate contains:
//! - A durable SQLite-backed storage adapter
//! - An in-process leader-election group for multi-instance hosts
//!
//! ## Architecture
//! - Implements traits defined in `driftq-core`
//! - Depends on `driftq-domain` and `driftq-core`
//! - Contains all "impure" code (file I/O, blocking database calls)

pub mod election;
pub mod errors;
pub mod storage;

// Re-export commonly used items
pub use election::{GroupLeaderElection, LeaderGroup};
pub use errors::InfraError;
pub use storage::SqliteStorageAdapter;
