//! NATS broker.
//!
//! `ACTIVITIES` is a JetStream work-queue stream read through one durable
//! pull consumer shared by every agent, so each node is delivered to a single
//! agent and redelivered on negative acknowledgement. `CONTROL` is a plain
//! core NATS subject, which fans out to every subscriber.

use async_nats::jetstream::{self, consumer, stream, AckKind, Context as JetStreamContext};
use async_nats::{Client, ConnectOptions};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::BusError;
use crate::patterns::SubjectPatterns;
use crate::traits::{Acker, Broker, Delivery, DeliveryStream, Topic};

/// NATS broker configuration.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// NATS server URL(s)
    pub urls: Vec<String>,
    /// Client name for identification
    pub client_name: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// How long JetStream waits for an ack before redelivering
    pub ack_wait: Duration,
    /// Keep the activity stream in memory instead of on disk
    pub memory_storage: bool,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            urls: vec!["nats://localhost:4222".to_string()],
            client_name: "convoy-agent".to_string(),
            connect_timeout: Duration::from_secs(5),
            ack_wait: Duration::from_secs(30),
            memory_storage: false,
        }
    }
}

impl NatsConfig {
    /// Create config with single URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            ..Default::default()
        }
    }

    /// Set client name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    /// Store the activity stream in memory.
    #[must_use]
    pub fn memory(mut self) -> Self {
        self.memory_storage = true;
        self
    }
}

#[derive(Clone)]
struct Connection {
    client: Client,
    jetstream: JetStreamContext,
}

/// NATS / JetStream broker.
pub struct NatsBroker {
    config: NatsConfig,
    connection: RwLock<Option<Connection>>,
}

impl NatsBroker {
    #[must_use]
    pub fn new(config: NatsConfig) -> Self {
        Self {
            config,
            connection: RwLock::new(None),
        }
    }

    fn connection(&self) -> Result<Connection, BusError> {
        self.connection
            .read()
            .map_err(|_| BusError::NotConnected)?
            .clone()
            .ok_or(BusError::NotConnected)
    }

    async fn ensure_stream(&self, js: &JetStreamContext) -> Result<stream::Stream, BusError> {
        let storage = if self.config.memory_storage {
            stream::StorageType::Memory
        } else {
            stream::StorageType::File
        };

        js.get_or_create_stream(stream::Config {
            name: SubjectPatterns::activities_stream().to_string(),
            subjects: vec![SubjectPatterns::activities().to_string()],
            retention: stream::RetentionPolicy::WorkQueue,
            storage,
            ..Default::default()
        })
        .await
        .map_err(|e| BusError::ConnectionFailed(e.to_string()))
    }

    async fn listen_activities(&self, conn: Connection) -> Result<DeliveryStream, BusError> {
        let stream = self.ensure_stream(&conn.jetstream).await?;
        let name = SubjectPatterns::activities_consumer();

        let consumer = stream
            .get_or_create_consumer(
                name,
                consumer::pull::Config {
                    durable_name: Some(name.to_string()),
                    ack_policy: consumer::AckPolicy::Explicit,
                    ack_wait: self.config.ack_wait,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BusError::SubscribeFailed(e.to_string()))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| BusError::SubscribeFailed(e.to_string()))?;

        let deliveries = messages.filter_map(|result| async move {
            match result {
                Ok(message) => {
                    let delivery_count = message
                        .info()
                        .map(|info| u64::try_from(info.delivered).unwrap_or(1))
                        .unwrap_or(1);
                    let body = message.payload.to_vec();
                    Some(Delivery::manual(
                        body,
                        delivery_count,
                        Box::new(NatsAcker { message }),
                    ))
                }
                Err(e) => {
                    warn!(error = %e, "JetStream delivery failed");
                    None
                }
            }
        });
        Ok(Box::pin(deliveries))
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn connect(&self) -> Result<(), BusError> {
        info!("Connecting to NATS: {:?}", self.config.urls);

        let options = ConnectOptions::new()
            .name(&self.config.client_name)
            .connection_timeout(self.config.connect_timeout);

        let client = async_nats::connect_with_options(self.config.urls.join(","), options)
            .await
            .map_err(|e| BusError::ConnectionFailed(e.to_string()))?;
        let jetstream = jetstream::new(client.clone());
        self.ensure_stream(&jetstream).await?;

        info!("Connected to NATS server");

        *self
            .connection
            .write()
            .map_err(|e| BusError::ConnectionFailed(e.to_string()))? =
            Some(Connection { client, jetstream });
        Ok(())
    }

    async fn send(&self, topic: Topic, body: Vec<u8>) -> Result<(), BusError> {
        let conn = self.connection()?;
        let subject = SubjectPatterns::subject(topic);

        match topic {
            Topic::Activities => {
                conn.jetstream
                    .publish(subject, body.into())
                    .await
                    .map_err(|e| BusError::PublishFailed(e.to_string()))?
                    .await
                    .map_err(|e| BusError::PublishFailed(e.to_string()))?;
            }
            Topic::Control => {
                conn.client
                    .publish(subject, body.into())
                    .await
                    .map_err(|e| BusError::PublishFailed(e.to_string()))?;
            }
        }

        debug!("Published to {}", subject);
        Ok(())
    }

    async fn listen(&self, topic: Topic) -> Result<DeliveryStream, BusError> {
        let conn = self.connection()?;
        debug!(topic = %topic, "Listening");

        match topic {
            Topic::Activities => self.listen_activities(conn).await,
            Topic::Control => {
                let subscriber = conn
                    .client
                    .subscribe(SubjectPatterns::control())
                    .await
                    .map_err(|e| BusError::SubscribeFailed(e.to_string()))?;
                Ok(Box::pin(
                    subscriber.map(|msg| Delivery::auto(msg.payload.to_vec())),
                ))
            }
        }
    }

    async fn close(&self) -> Result<(), BusError> {
        let conn = self
            .connection
            .write()
            .map_err(|e| BusError::DisconnectFailed(e.to_string()))?
            .take();

        if let Some(conn) = conn {
            info!("Disconnecting from NATS");
            conn.client
                .drain()
                .await
                .map_err(|e| BusError::DisconnectFailed(e.to_string()))?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection().is_ok_and(|conn| {
            conn.client.connection_state() == async_nats::connection::State::Connected
        })
    }
}

struct NatsAcker {
    message: jetstream::Message,
}

#[async_trait]
impl Acker for NatsAcker {
    async fn ack(&mut self) -> Result<(), BusError> {
        self.message
            .ack()
            .await
            .map_err(|e| BusError::AckFailed(e.to_string()))
    }

    async fn nack(&mut self) -> Result<(), BusError> {
        self.message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| BusError::AckFailed(e.to_string()))
    }
}
