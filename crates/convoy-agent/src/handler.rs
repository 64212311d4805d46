//! MessageHandler - the bridge between the campaign channel and the broker.
//!
//! Five persistent loops share one handler:
//!
//! - [`MessageHandler::recv_activity_dag_from_campaign`]: campaign DAGs in,
//!   one node at a time onto the "to broker" queue
//! - [`MessageHandler::send_activity`]: "to broker" queue onto `ACTIVITIES`
//! - [`MessageHandler::recv_activity`]: `ACTIVITIES` deliveries through
//!   admission control onto the ready queue
//! - [`MessageHandler::recv_control`] / [`MessageHandler::send_control`]:
//!   status relay between `CONTROL` and the agent

use convoy_bus::{Broker, Delivery, ReplyConnection, ReplyListener, Topic, ACK};
use convoy_core::{
    decode_node, encode_node, is_sentinel, ActivityStatus, AgentConfig, ControlMessage, Dag,
    DagNode,
};
use convoy_storage::{ActivityRecord, ActivityStore, RecordStatus};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::channels::{self, SharedReceiver, WorkItem};
use crate::error::AgentError;
use crate::router::ControlRouter;

/// Result of admission control on one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Acked and queued for dispatch
    Accepted,
    /// Nacked for another agent
    Rejected,
    /// Acked and reported FAILED after too many deliveries
    DeadLettered,
    /// Acked and dropped, the body was not a node
    Malformed,
}

#[derive(Clone)]
pub struct MessageHandler {
    config: Arc<AgentConfig>,
    broker: Arc<dyn Broker>,
    store: Arc<dyn ActivityStore>,
    router: ControlRouter,
    to_broker: mpsc::Sender<WorkItem>,
    ready: mpsc::Sender<WorkItem>,
    control_out: mpsc::Sender<ControlMessage>,
}

impl MessageHandler {
    #[must_use]
    pub fn new(
        config: Arc<AgentConfig>,
        broker: Arc<dyn Broker>,
        store: Arc<dyn ActivityStore>,
        router: ControlRouter,
        to_broker: mpsc::Sender<WorkItem>,
        ready: mpsc::Sender<WorkItem>,
        control_out: mpsc::Sender<ControlMessage>,
    ) -> Self {
        Self {
            config,
            broker,
            store,
            router,
            to_broker,
            ready,
            control_out,
        }
    }

    /// Accept campaign connections forever, serving each on its own task.
    ///
    /// # Errors
    ///
    /// Never fails today; accept errors are logged and the loop continues.
    pub async fn recv_activity_dag_from_campaign(
        &self,
        listener: Arc<ReplyListener>,
    ) -> Result<(), AgentError> {
        info!(agent_id = %self.config.agent_id, "Waiting for campaigns");
        loop {
            match listener.accept().await {
                Ok(connection) => {
                    let handler = self.clone();
                    tokio::spawn(async move { handler.serve_campaign(connection).await });
                }
                Err(e) => warn!(error = %e, "Failed to accept campaign connection"),
            }
        }
    }

    async fn serve_campaign(&self, mut connection: ReplyConnection) {
        let peer = connection.peer_addr();
        loop {
            let body = match connection.recv().await {
                Ok(Some(body)) => body,
                Ok(None) => break,
                Err(e) => {
                    warn!(peer = %peer, error = %e, "Campaign connection failed");
                    break;
                }
            };

            // The submitter only waits for receipt, not for fan-out.
            if let Err(e) = connection.reply(ACK).await {
                warn!(peer = %peer, error = %e, "Failed to acknowledge campaign");
            }

            match Dag::deserialize_dag(&body) {
                Ok(dag) => {
                    if let Err(e) = self.ingest_dag(dag).await {
                        error!(peer = %peer, error = %e, "Failed to ingest campaign");
                    }
                }
                Err(e) => warn!(peer = %peer, error = %e, "Discarding malformed campaign"),
            }
        }
        debug!(peer = %peer, "Campaign connection closed");
    }

    /// Stamp, audit and queue every node of `dag` in edge order.
    ///
    /// # Errors
    ///
    /// Returns an error if the DAG has a cycle or the "to broker" queue is
    /// closed.
    #[instrument(skip(self, dag), fields(nodes = dag.len()))]
    pub async fn ingest_dag(&self, dag: Dag) -> Result<usize, AgentError> {
        let order = dag.topological_order()?;
        let mut queued = 0;

        for node_id in order {
            let Some(mut node) = dag.node(&node_id).cloned() else {
                continue;
            };
            if !is_sentinel(&node_id) {
                node.activity = node
                    .activity
                    .map(|a| a.received_by(&self.config.agent_id));
                node.activity_status = Some(ActivityStatus::Submitted);
            }

            self.audit(&node_id, &node, RecordStatus::Received).await;
            self.to_broker
                .send(WorkItem::new(&node_id, node))
                .await
                .map_err(|_| AgentError::ChannelClosed("to_broker"))?;
            queued += 1;
        }

        info!(queued, "Campaign received");
        Ok(queued)
    }

    /// Publish queued nodes on `ACTIVITIES`, FIFO.
    ///
    /// # Errors
    ///
    /// Never fails today; publish errors drop the item.
    pub async fn send_activity(&self, from_queue: SharedReceiver<WorkItem>) -> Result<(), AgentError> {
        while let Some(item) = channels::next(&from_queue).await {
            let body = match encode_node(&item.node_id, &item.node) {
                Ok(body) => body,
                Err(e) => {
                    error!(node_id = %item.node_id, error = %e, "Failed to encode node");
                    continue;
                }
            };
            match self.broker.send(Topic::Activities, body).await {
                Ok(()) => debug!(node_id = %item.node_id, "Published node"),
                Err(e) => error!(node_id = %item.node_id, error = %e, "Failed to publish node, dropping it"),
            }
        }
        Ok(())
    }

    /// Run admission control over every `ACTIVITIES` delivery.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be made, or ends while the
    /// broker is still connected.
    pub async fn recv_activity(&self) -> Result<(), AgentError> {
        let mut deliveries = self.broker.listen(Topic::Activities).await?;
        while let Some(delivery) = deliveries.next().await {
            self.admit(delivery).await;
        }
        self.stream_ended("ACTIVITIES")
    }

    /// Accept or reject one delivery.
    pub async fn admit(&self, delivery: Delivery) -> Admission {
        let (node_id, node) = match decode_node(&delivery.body) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable delivery");
                settle(delivery.ack().await);
                return Admission::Malformed;
            }
        };

        let capability = if is_sentinel(&node_id) {
            None
        } else {
            match node.activity.as_ref() {
                Some(submitted) => Some(submitted.activity.required_capability().to_string()),
                None => {
                    warn!(node_id = %node_id, "Dropping activity node without an activity");
                    settle(delivery.ack().await);
                    return Admission::Malformed;
                }
            }
        };

        let granted = capability
            .as_deref()
            .map_or(true, |c| self.config.has_capability(c));

        if granted {
            settle(delivery.ack().await);
            self.audit(&node_id, &node, RecordStatus::Accepted).await;
            debug!(node_id = %node_id, campaign_id = %node.campaign_id, "Accepted");
            if self.ready.send(WorkItem::new(&node_id, node)).await.is_err() {
                error!(node_id = %node_id, "Ready queue closed, accepted node lost");
            }
            return Admission::Accepted;
        }

        let capability = capability.unwrap_or_default();
        let count = delivery.delivery_count;
        if self
            .config
            .max_redeliveries
            .is_some_and(|max| count >= u64::from(max))
        {
            settle(delivery.ack().await);
            self.audit(&node_id, &node, RecordStatus::DeadLettered).await;
            error!(
                node_id = %node_id,
                campaign_id = %node.campaign_id,
                capability = %capability,
                deliveries = count,
                "No agent accepted activity, dead-lettering it"
            );
            let failed = ControlMessage::failed(
                &node_id,
                &node.campaign_id,
                format!("no agent with capability {capability} after {count} deliveries"),
            )
            .from_agent(&self.config.agent_id);
            if self.control_out.send(failed).await.is_err() {
                warn!("Control queue closed, dead-letter status dropped");
            }
            return Admission::DeadLettered;
        }

        debug!(node_id = %node_id, capability = %capability, deliveries = count, "Rejected");
        settle(delivery.nack().await);
        tokio::time::sleep(self.config.nack_backoff).await;
        Admission::Rejected
    }

    /// Route every `CONTROL` message to the ledger and monitors.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be made, or ends while the
    /// broker is still connected.
    pub async fn recv_control(&self) -> Result<(), AgentError> {
        let mut deliveries = self.broker.listen(Topic::Control).await?;
        while let Some(delivery) = deliveries.next().await {
            match ControlMessage::from_bytes(&delivery.body) {
                Ok(message) => self.router.route(message).await,
                Err(e) => warn!(error = %e, "Dropping malformed control message"),
            }
        }
        self.stream_ended("CONTROL")
    }

    /// Publish queued status messages on `CONTROL`.
    ///
    /// # Errors
    ///
    /// Never fails today; publish errors drop the message.
    pub async fn send_control(
        &self,
        from_queue: SharedReceiver<ControlMessage>,
    ) -> Result<(), AgentError> {
        while let Some(message) = channels::next(&from_queue).await {
            let body = match message.to_bytes() {
                Ok(body) => body,
                Err(e) => {
                    error!(error = %e, "Failed to encode control message");
                    continue;
                }
            };
            if let Err(e) = self.broker.send(Topic::Control, body).await {
                error!(
                    activity_id = %message.activity_id,
                    status = %message.status,
                    error = %e,
                    "Failed to publish control message"
                );
            }
        }
        Ok(())
    }

    async fn audit(&self, node_id: &str, node: &DagNode, status: RecordStatus) {
        let snapshot = match serde_json::to_value(node) {
            Ok(value) => value,
            Err(e) => {
                warn!(node_id = %node_id, error = %e, "Failed to snapshot node");
                serde_json::Value::Null
            }
        };
        let record = ActivityRecord::new(
            &self.config.agent_id,
            &node.campaign_id,
            node_id,
            status,
            snapshot,
        );
        if let Err(e) = self.store.record(record).await {
            error!(node_id = %node_id, error = %e, "Failed to write audit record");
        }
    }

    fn stream_ended(&self, topic: &'static str) -> Result<(), AgentError> {
        if self.broker.is_connected() {
            Err(AgentError::StreamEnded(topic))
        } else {
            info!(topic, "Broker closed, listener stopping");
            Ok(())
        }
    }
}

fn settle(result: Result<(), convoy_bus::BusError>) {
    if let Err(e) = result {
        warn!(error = %e, "Failed to settle delivery");
    }
}
