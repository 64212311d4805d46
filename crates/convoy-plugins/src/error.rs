//! Plugin error types.

use thiserror::Error;

/// Errors that can occur while running an activity.
#[derive(Error, Debug)]
pub enum PluginError {
    /// No plugin registered for the capability
    #[error("No plugin registered for capability: {0}")]
    NotRegistered(String),

    /// The plugin cannot handle this activity
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Execution timed out
    #[error("Execution timed out after {0} ms")]
    Timeout(u64),

    /// Execution failed
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
