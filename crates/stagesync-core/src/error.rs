//! Error types for stagesync-core

use thiserror::Error;

use crate::store::StoreError;

/// Result type alias using stagesync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in stagesync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Record failed local validation; never stored, never queued
    #[error("Invalid status record: {0}")]
    InvalidRecord(String),

    /// A new record cannot be synthesized from the given partial update
    #[error("Missing required fields for new status record: {}", .0.join(", "))]
    MissingRequiredFields(Vec<&'static str>),

    /// Durable store could not be reached
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// Operation requires an initialized sync service
    #[error("Sync service is not ready (state: {0})")]
    NotInitialized(String),

    /// Conflict record not found in the audit log
    #[error("Conflict not found: {0}")]
    UnknownConflict(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the failure came from the durable store rather than the caller.
    #[must_use]
    pub const fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}
