//! Bus error types.

use thiserror::Error;

/// Errors that can occur on a broker or the request/reply channel.
#[derive(Error, Debug)]
pub enum BusError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Disconnection failed
    #[error("Disconnect failed: {0}")]
    DisconnectFailed(String),

    /// Publish failed
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// Subscribe failed
    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    /// Acknowledgement failed
    #[error("Ack failed: {0}")]
    AckFailed(String),

    /// Operation on a broker that is not connected
    #[error("Not connected")]
    NotConnected,

    /// Timeout, naming the phase that expired
    #[error("Timed out during {0}")]
    Timeout(&'static str),

    /// Socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame larger than the channel accepts
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),
}
