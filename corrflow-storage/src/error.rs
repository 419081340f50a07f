//! Storage error types.

use corrflow_core::{CoreError, InstanceKey};
use thiserror::Error;

/// Errors from the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("data corruption: {0}")]
    Corruption(String),

    #[error("instance already exists: {0}")]
    InstanceExists(InstanceKey),

    #[error("instance not found: {0}")]
    InstanceNotFound(InstanceKey),

    #[error("version conflict on {key}: expected {expected}, actual {actual}")]
    Conflict {
        key: InstanceKey,
        expected: u64,
        actual: u64,
    },

    #[error("session already committed")]
    AlreadyCommitted,
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InstanceExists(key) => CoreError::InstanceExists {
                correlation_id: key.correlation_id,
                definition: key.definition,
            },
            StorageError::InstanceNotFound(key) => CoreError::InstanceNotFound {
                correlation_id: key.correlation_id,
                definition: key.definition,
            },
            StorageError::Conflict {
                key,
                expected,
                actual,
            } => CoreError::Conflict {
                correlation_id: key.correlation_id,
                definition: key.definition,
                expected,
                actual,
            },
            StorageError::AlreadyCommitted => CoreError::AlreadyCommitted,
            other => CoreError::Persistence(other.to_string()),
        }
    }
}
