//! Error types for cluster operations.

use thiserror::Error;

/// Result type alias for cluster operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("failed to open cluster store: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: String },

    /// The object changed since it was read.
    #[error("{kind} {key} was modified (have version {have}, current {current})")]
    Conflict {
        kind: &'static str,
        key: String,
        have: u64,
        current: u64,
    },

    #[error("invalid object: {0}")]
    Invalid(String),

    /// Raised by an armed [`crate::Fault`].
    #[error("injected failure: {0}")]
    Injected(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }
}
