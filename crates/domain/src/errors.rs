//! Error types used throughout the outbox

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for driftq operations
#[derive(Error, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum OutboxError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialize failed: {0}")]
    DeserializeFailed(String),

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Unsupported envelope version: {0}")]
    UnsupportedVersion(u32),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Leader election error: {0}")]
    LeaderElection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OutboxError {
    /// Deserialize-path failures are recoverable: the caller logs and skips
    /// the offending envelope instead of aborting the enumeration.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DeserializeFailed(_) | Self::UnknownCollection(_) | Self::UnsupportedVersion(_)
        )
    }
}

/// Result type alias for driftq operations
pub type Result<T> = std::result::Result<T, OutboxError>;

/// Error surface of a caller-supplied mutation function.
///
/// The executor only distinguishes two outcomes: `NonRetriable` failures are
/// final and settle the waiter immediately; everything else goes through the
/// retry policy. `UnknownFunction` is raised by the executor itself when the
/// transaction names a function missing from the registry and is treated as
/// non-retriable.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message")]
pub enum MutationError {
    #[error("Non-retriable mutation failure: {0}")]
    NonRetriable(String),

    #[error("Transient mutation failure: {0}")]
    Transient(String),

    #[error("Unknown mutation function: {0}")]
    UnknownFunction(String),
}

impl MutationError {
    /// Whether the retry policy may schedule another attempt for this error.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Stable error name recorded in `Transaction::last_error`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NonRetriable(_) => "NonRetriable",
            Self::Transient(_) => "Transient",
            Self::UnknownFunction(_) => "UnknownMutationFn",
        }
    }

    /// Human-readable failure detail.
    pub fn message(&self) -> &str {
        match self {
            Self::NonRetriable(msg) | Self::Transient(msg) | Self::UnknownFunction(msg) => msg,
        }
    }
}

/// Snapshot of the last failure, persisted with the transaction envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl From<&MutationError> for ErrorInfo {
    fn from(err: &MutationError) -> Self {
        Self { name: err.name().to_string(), message: err.message().to_string(), stack: None }
    }
}
