//! Storage error types.

use thiserror::Error;

/// Errors that can occur with storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// No record with this id
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Get operation failed
    #[error("Get failed: {0}")]
    GetFailed(String),

    /// Set operation failed
    #[error("Set failed: {0}")]
    SetFailed(String),

    /// Journal file error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}
