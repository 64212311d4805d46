//! Core error types.

use thiserror::Error;

/// Errors raised by the campaign model and its codecs.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A node id was referenced that the graph does not contain
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// The graph is not acyclic
    #[error("Graph contains a cycle")]
    Cycle,

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// Configuration value could not be parsed
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
