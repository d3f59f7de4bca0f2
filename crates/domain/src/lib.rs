//! # Driftq Domain
//!
//! Business domain types for the driftq mutation outbox.
//!
//! This crate contains:
//! - Transaction and mutation data types
//! - The serialized storage envelope and its conversions
//! - Domain error types and Result definitions
//! - Domain constants
//!
//! ## Architecture
//! - No dependencies on other driftq crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod constants;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use errors::{ErrorInfo, MutationError, OutboxError, Result};
pub use types::{
    Collection, CollectionRegistry, Mutation, MutationRecord, MutationType, Transaction,
    TransactionEnvelope, TransactionPatch, TransactionSummary,
};
