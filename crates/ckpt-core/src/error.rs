//! Error types for distributed checkpoint I/O

use thiserror::Error;

/// Result type alias using the checkpoint Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for checkpoint persistence
#[derive(Error, Debug)]
pub enum Error {
    // Caller contract errors
    #[error("`{option}` is not supported by {operation}")]
    UnsupportedOption { option: String, operation: String },

    #[error("Checkpoint not found: {path}")]
    NotFound { path: String },

    #[error("Distributed checkpoints should be a directory, found: {path}")]
    InvalidLayout { path: String },

    #[error("Invalid checkpoint path {path}: {reason}")]
    InvalidPathKind { path: String, reason: String },

    #[error("{component} does not expose a persistable construction recipe")]
    MissingCapability { component: String },

    #[error("Accelerator runtime is not initialized in this process")]
    AcceleratorNotInitialized,

    // Checkpoint errors
    #[error("Checkpoint write failed: {message}")]
    CheckpointWriteFailed { message: String },

    #[error("Checkpoint corrupted: {path} - {reason}")]
    CheckpointCorrupted { path: String, reason: String },

    // Storage errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Storage backend not available: {backend}")]
    StorageUnavailable { backend: String },

    #[error("Storage path not found: {path}")]
    StoragePathNotFound { path: String },

    // Configuration errors
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Storage { .. })
    }

    /// Returns true if this error indicates a programming error or an
    /// unusable process, rather than a bad request
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::InvalidPathKind { .. }
                | Error::AcceleratorNotInitialized
                | Error::CheckpointCorrupted { .. }
                | Error::InvalidConfig { .. }
                | Error::Internal { .. }
        )
    }

    /// Shorthand for [`Error::UnsupportedOption`]
    pub fn unsupported(option: &str, operation: &str) -> Self {
        Error::UnsupportedOption {
            option: option.to_string(),
            operation: operation.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
