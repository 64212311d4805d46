//! # convoy-bus
//!
//! Transports used by Convoy agents.
//!
//! - [`Broker`] - the two asynchronous channels shared by a fleet:
//!   `ACTIVITIES` (work queue, manual ack/nack, redelivery) and `CONTROL`
//!   (fan-out to every agent, auto-ack).
//! - [`InMemoryBroker`] - an in-process broker for tests and single-host fleets.
//! - `NatsBroker` - JetStream work queue plus core NATS fan-out (feature `nats`).
//! - [`reply`] - the synchronous length-prefixed request/reply channel a
//!   campaign uses to hand its DAG to the local agent.

mod error;
mod memory;
#[cfg(feature = "nats")]
mod nats;
mod patterns;
pub mod reply;
mod traits;

pub use error::BusError;
pub use memory::InMemoryBroker;
#[cfg(feature = "nats")]
pub use nats::{NatsBroker, NatsConfig};
pub use patterns::SubjectPatterns;
pub use reply::{ReplyConnection, ReplyListener, RequestClient, ACK};
pub use traits::{Acker, Broker, Delivery, DeliveryStream, Topic};
