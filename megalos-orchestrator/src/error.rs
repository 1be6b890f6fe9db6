//! Error types for the lab orchestration layer.

use thiserror::Error;

/// Errors that can occur while deploying or tearing down a lab.
#[derive(Error, Debug)]
pub enum MegalosError {
    /// The backend could not be reached or rejected the transport.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend refused the operation for the current credentials.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A resource with the same identity already exists.
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// The referenced resource does not exist.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The requested operation has no meaning for this backend.
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// The lab archive does not fit in a single backend object.
    #[error("Payload too large: {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    /// A name cannot be turned into a valid resource name.
    #[error("Invalid resource name: {0}")]
    InvalidName(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A backend call did not complete in time.
    #[error("Timed out after {secs}s: {operation}")]
    Timeout { operation: String, secs: u64 },

    /// Filesystem error while reading the lab tree.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A resource could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MegalosError {
    /// `true` for conflicts, which idempotent create paths treat as success.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    /// `true` for missing resources, which idempotent delete paths treat as success.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type alias for orchestration operations.
pub type Result<T> = std::result::Result<T, MegalosError>;
