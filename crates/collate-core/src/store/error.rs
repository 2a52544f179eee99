//! Error types for remote store operations.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to a bucket.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object already exists (conditional write failed).
    #[error("object already exists: {key}")]
    AlreadyExists { key: String },

    /// Object not found.
    #[error("object not found: {key}")]
    NotFound { key: String },

    /// Access denied to the storage backend.
    #[error("access denied: {message}")]
    AccessDenied { message: String },

    /// Invalid store URL.
    #[error("invalid store spec '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },

    /// Requested link lifetime is outside what the backend can sign.
    #[error("invalid link ttl {ttl:?}: {reason}")]
    InvalidTtl {
        ttl: std::time::Duration,
        reason: String,
    },

    /// Network or I/O error.
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Generic error from the underlying object store.
    #[error("object store error: {0}")]
    ObjectStore(object_store::Error),
}

impl StoreError {
    /// Returns true if this error indicates the object already exists.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Returns true if this error indicates the object was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Create from object_store error with context about the key.
    pub fn from_object_store(err: object_store::Error, key: &str) -> Self {
        match &err {
            object_store::Error::NotFound { .. } => StoreError::NotFound {
                key: key.to_string(),
            },
            object_store::Error::AlreadyExists { .. } => StoreError::AlreadyExists {
                key: key.to_string(),
            },
            object_store::Error::Precondition { .. } => StoreError::AlreadyExists {
                key: key.to_string(),
            },
            object_store::Error::PermissionDenied { .. }
            | object_store::Error::Unauthenticated { .. } => StoreError::AccessDenied {
                message: err.to_string(),
            },
            _ => StoreError::ObjectStore(err),
        }
    }
}

impl From<object_store::Error> for StoreError {
    fn from(err: object_store::Error) -> Self {
        StoreError::from_object_store(err, "unknown")
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io {
            message: err.to_string(),
        }
    }
}
