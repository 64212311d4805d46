//! Status ledger behind the predecessor gate.
//!
//! Every control message the agent sees is recorded here, per campaign, so an
//! activity whose predecessors finished before it was dequeued still finds
//! their statuses.

use convoy_core::{ControlMessage, ControlStatus, MONITOR};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, RwLock};
use tracing::debug;

use crate::error::AgentError;

#[derive(Debug)]
struct CampaignStatuses {
    statuses: HashMap<String, ControlStatus>,
    heartbeat_seen: bool,
    last_seen: Instant,
}

impl Default for CampaignStatuses {
    fn default() -> Self {
        Self {
            statuses: HashMap::new(),
            heartbeat_seen: false,
            last_seen: Instant::now(),
        }
    }
}

/// Result of an opened gate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateOutcome {
    /// Predecessors that reported FAILED
    pub failed_predecessors: Vec<String>,
}

impl GateOutcome {
    /// Whether every predecessor succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed_predecessors.is_empty()
    }
}

/// Last-known status of every activity, keyed by campaign.
#[derive(Debug, Default)]
pub struct StatusLedger {
    campaigns: RwLock<HashMap<String, CampaignStatuses>>,
    changed: Notify,
}

impl StatusLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a control message and wake every waiting gate.
    ///
    /// A terminal status is never replaced by PROCESSING, so a late or
    /// redelivered message cannot reopen a finished activity.
    pub async fn observe(&self, message: &ControlMessage) {
        {
            let mut campaigns = self.campaigns.write().await;
            let campaign = campaigns.entry(message.campaign_id.clone()).or_default();
            campaign.last_seen = Instant::now();

            if message.is_heartbeat() {
                campaign.heartbeat_seen = true;
            } else {
                let current = campaign.statuses.get(&message.activity_id).copied();
                let keep_current = current.is_some_and(ControlStatus::is_terminal)
                    && !message.status.is_terminal();
                if !keep_current {
                    campaign
                        .statuses
                        .insert(message.activity_id.clone(), message.status);
                }
            }
        }
        debug!(
            campaign_id = %message.campaign_id,
            activity_id = %message.activity_id,
            status = %message.status,
            "Observed status"
        );
        self.changed.notify_waiters();
    }

    /// Last-known status of an activity.
    pub async fn status(&self, campaign_id: &str, activity_id: &str) -> Option<ControlStatus> {
        self.campaigns
            .read()
            .await
            .get(campaign_id)
            .and_then(|c| c.statuses.get(activity_id).copied())
    }

    /// Whether a heartbeat has been seen for the campaign.
    pub async fn heartbeat_seen(&self, campaign_id: &str) -> bool {
        self.campaigns
            .read()
            .await
            .get(campaign_id)
            .is_some_and(|c| c.heartbeat_seen)
    }

    async fn evaluate(&self, campaign_id: &str, predecessors: &[String]) -> Option<GateOutcome> {
        let campaigns = self.campaigns.read().await;
        let campaign = campaigns.get(campaign_id);
        let mut outcome = GateOutcome::default();

        for predecessor in predecessors {
            if predecessor == MONITOR {
                if !campaign.is_some_and(|c| c.heartbeat_seen) {
                    return None;
                }
                continue;
            }
            match campaign.and_then(|c| c.statuses.get(predecessor)) {
                Some(ControlStatus::Failed) => outcome.failed_predecessors.push(predecessor.clone()),
                Some(ControlStatus::Succeeded) => {}
                _ => return None,
            }
        }
        Some(outcome)
    }

    /// Wait until every predecessor is satisfied.
    ///
    /// `MONITOR` is satisfied by any heartbeat of the campaign, every other
    /// predecessor by a SUCCEEDED or FAILED status.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::GateTimeout`] if `timeout` expires first.
    pub async fn wait_for(
        &self,
        campaign_id: &str,
        predecessors: &[String],
        timeout: Option<Duration>,
    ) -> Result<GateOutcome, AgentError> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);

        loop {
            // Register before checking so a status observed in between still wakes us.
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(outcome) = self.evaluate(campaign_id, predecessors).await {
                return Ok(outcome);
            }

            match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, notified)
                    .await
                    .map_err(|_| AgentError::GateTimeout(predecessors.join(", ")))?,
                None => notified.await,
            }
        }
    }

    /// Drop everything known about a campaign.
    pub async fn forget(&self, campaign_id: &str) {
        self.campaigns.write().await.remove(campaign_id);
    }

    /// Drop campaigns not heard from within `retention`.
    pub async fn prune(&self, retention: Duration) -> usize {
        let mut campaigns = self.campaigns.write().await;
        let before = campaigns.len();
        campaigns.retain(|_, c| c.last_seen.elapsed() < retention);
        before - campaigns.len()
    }

    /// Number of campaigns tracked.
    pub async fn campaign_count(&self) -> usize {
        self.campaigns.read().await.len()
    }
}
