//! Error types for blob store operations.

use std::time::Duration;

/// Result type for blob store operations.
pub type BlobStoreResult<T> = Result<T, BlobStoreError>;

/// Errors that can occur during blob store operations.
///
/// A blob that doesn't exist is not an error: lookups return `None` and
/// deletes return `false`.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BlobStoreError {
    #[error("blob store {store} is not started")]
    NotStarted { store: String },

    #[error("blob store {store} is not writable")]
    Unwritable { store: String },

    #[error("blob store {store} is full: {requested} bytes requested, {available} available")]
    Full {
        store: String,
        requested: u64,
        available: u64,
    },

    #[error("missing required blob header {header}")]
    MissingHeader { header: String },

    #[error("no member of blob store group {group} accepted the write")]
    NoMemberAvailable { group: String },

    #[error("invalid blob store configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("object store error: {source}")]
    Backend {
        #[from]
        source: object_store::Error,
    },

    #[error("soft delete index error: {source}")]
    Index { source: anyhow::Error },

    #[error("failed to encode blob attributes: {source}")]
    Encoding {
        #[from]
        source: serde_json::Error,
    },
}

impl BlobStoreError {
    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    /// Identifies transient failures a caller may retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io { .. } | Self::Timeout { .. } | Self::Index { .. } => true,
            Self::Backend { source } => !matches!(
                source,
                object_store::Error::NotImplemented |
                    object_store::Error::InvalidPath { .. } |
                    object_store::Error::NotSupported { .. }
            ),
            _ => false,
        }
    }

    /// Identifies failed operations that MUST not be retried.
    pub fn is_permanent(&self) -> bool {
        !self.is_retryable()
    }
}
