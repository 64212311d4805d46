//! Routing of inbound control messages to the ledger and live monitors.

use convoy_core::ControlMessage;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::ledger::StatusLedger;
use crate::monitor::MonitorSignal;

/// Intake queues of the monitors running on this agent, by campaign.
#[derive(Debug, Default)]
pub struct MonitorRegistry {
    monitors: RwLock<HashMap<String, mpsc::Sender<MonitorSignal>>>,
}

impl MonitorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a monitor. Returns `false` if the campaign already has one.
    pub async fn register(&self, campaign_id: &str, sender: mpsc::Sender<MonitorSignal>) -> bool {
        let mut monitors = self.monitors.write().await;
        if monitors.contains_key(campaign_id) {
            return false;
        }
        monitors.insert(campaign_id.to_string(), sender);
        true
    }

    pub async fn deregister(&self, campaign_id: &str) {
        self.monitors.write().await.remove(campaign_id);
    }

    pub async fn contains(&self, campaign_id: &str) -> bool {
        self.monitors.read().await.contains_key(campaign_id)
    }

    /// Hand `message` to the monitor of its campaign, if this agent runs one.
    pub async fn forward(&self, message: ControlMessage) {
        let sender = self.monitors.read().await.get(&message.campaign_id).cloned();
        if let Some(sender) = sender {
            let campaign_id = message.campaign_id.clone();
            if sender.send(MonitorSignal::Status(message)).await.is_err() {
                warn!(campaign_id = %campaign_id, "Monitor gone, dropping its registration");
                self.deregister(&campaign_id).await;
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.monitors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.monitors.read().await.is_empty()
    }
}

/// Fans inbound control messages out to the status ledger and the monitors.
#[derive(Debug, Clone)]
pub struct ControlRouter {
    ledger: Arc<StatusLedger>,
    monitors: Arc<MonitorRegistry>,
}

impl ControlRouter {
    #[must_use]
    pub fn new(ledger: Arc<StatusLedger>, monitors: Arc<MonitorRegistry>) -> Self {
        Self { ledger, monitors }
    }

    pub async fn route(&self, message: ControlMessage) {
        debug!(
            campaign_id = %message.campaign_id,
            activity_id = %message.activity_id,
            status = %message.status,
            "Routing control message"
        );
        self.ledger.observe(&message).await;
        self.monitors.forward(message).await;
    }
}
