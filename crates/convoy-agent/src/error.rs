//! Agent error types.

use convoy_bus::BusError;
use convoy_core::CoreError;
use convoy_plugins::PluginError;
use convoy_storage::StorageError;
use thiserror::Error;

/// Errors raised inside an agent or by campaign dispatch.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Broker or request/reply transport error
    #[error("Transport error: {0}")]
    Bus(#[from] BusError),

    /// Audit store error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Plugin error
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// DAG, message or configuration error
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential refresh failed
    #[error("Credentials unavailable: {0}")]
    Credentials(String),

    /// Input staging failed
    #[error("Staging failed: {0}")]
    Staging(String),

    /// An internal queue has no more producers or consumers
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    /// A broker subscription ended while still connected
    #[error("Subscription ended: {0}")]
    StreamEnded(&'static str),

    /// The predecessor gate expired
    #[error("Timed out waiting for {0}")]
    GateTimeout(String),
}
