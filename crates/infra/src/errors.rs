//! Infrastructure error types

use driftq_domain::OutboxError;
use thiserror::Error;

/// Errors raised by infrastructure adapters before they cross into the
/// domain error surface
#[derive(Debug, Error)]
pub enum InfraError {
    /// SQLite call failed
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A blocking storage task panicked or was cancelled
    #[error("Storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<InfraError> for OutboxError {
    fn from(err: InfraError) -> Self {
        match err {
            InfraError::Sqlite(e) => Self::Storage(e.to_string()),
            InfraError::Join(e) => Self::Internal(format!("storage task failed: {e}")),
        }
    }
}
