//! Traits for broker implementations.

use async_trait::async_trait;
use futures::Stream;
use std::fmt;
use std::pin::Pin;

use crate::error::BusError;

/// The two channels shared by a fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Durable work queue; each message reaches one consumer, with manual
    /// ack/nack and redelivery.
    Activities,
    /// Fan-out to every listener, auto-acknowledged.
    Control,
}

impl Topic {
    /// Channel name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Activities => "ACTIVITIES",
            Self::Control => "CONTROL",
        }
    }

    /// Whether deliveries must be settled explicitly.
    #[must_use]
    pub fn manual_ack(self) -> bool {
        matches!(self, Self::Activities)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Settles one delivery with the broker.
#[async_trait]
pub trait Acker: Send {
    /// Remove the message from the queue.
    async fn ack(&mut self) -> Result<(), BusError>;

    /// Return the message for redelivery.
    async fn nack(&mut self) -> Result<(), BusError>;
}

/// A message handed to a listener.
pub struct Delivery {
    /// Message body
    pub body: Vec<u8>,
    /// How many times this message has been delivered, starting at 1
    pub delivery_count: u64,
    acker: Option<Box<dyn Acker>>,
}

impl Delivery {
    /// A delivery that must be acked or nacked.
    #[must_use]
    pub fn manual(body: Vec<u8>, delivery_count: u64, acker: Box<dyn Acker>) -> Self {
        Self {
            body,
            delivery_count,
            acker: Some(acker),
        }
    }

    /// A delivery that needs no settlement.
    #[must_use]
    pub fn auto(body: Vec<u8>) -> Self {
        Self {
            body,
            delivery_count: 1,
            acker: None,
        }
    }

    /// Acknowledge. No-op for auto-acknowledged deliveries.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker rejects the acknowledgement.
    pub async fn ack(mut self) -> Result<(), BusError> {
        match self.acker.as_mut() {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }

    /// Negatively acknowledge, asking for redelivery.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker rejects the request.
    pub async fn nack(mut self) -> Result<(), BusError> {
        match self.acker.as_mut() {
            Some(acker) => acker.nack().await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("len", &self.body.len())
            .field("delivery_count", &self.delivery_count)
            .field("manual", &self.acker.is_some())
            .finish()
    }
}

/// Stream of deliveries from one topic.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Delivery> + Send>>;

/// Broker client used by an agent.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Establish the connection and declare the channels.
    async fn connect(&self) -> Result<(), BusError>;

    /// Publish `body` on `topic`.
    async fn send(&self, topic: Topic, body: Vec<u8>) -> Result<(), BusError>;

    /// Start consuming `topic`. The stream ends when the broker is closed.
    async fn listen(&self, topic: Topic) -> Result<DeliveryStream, BusError>;

    /// Close the connection.
    async fn close(&self) -> Result<(), BusError>;

    /// Check if connected.
    fn is_connected(&self) -> bool;
}
