//! Per-campaign heartbeat monitor.
//!
//! Spawned when an agent dispatches a campaign's `MONITOR` node. It tracks
//! every activity of the campaign, emits a MONITORING heartbeat every
//! interval, and flags completion once nothing is PROCESSING. It only stops
//! on [`MonitorSignal::Kill`].

use convoy_core::{ControlMessage, ControlStatus, MONITOR};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Input of a monitor.
#[derive(Debug, Clone)]
pub enum MonitorSignal {
    /// A status update for one of the campaign's activities
    Status(ControlMessage),
    /// Stop the monitor
    Kill,
}

/// The monitor loop state.
pub struct Monitor {
    campaign_id: String,
    agent_id: String,
    statuses: HashMap<String, ControlStatus>,
    heartbeat_interval: Duration,
    intake: mpsc::Receiver<MonitorSignal>,
    control_out: mpsc::Sender<ControlMessage>,
    completed: watch::Sender<bool>,
}

impl Monitor {
    /// Start a monitor for `activity_ids` of `campaign_id`. `MONITOR` itself is
    /// never tracked.
    #[must_use]
    pub fn spawn(
        campaign_id: impl Into<String>,
        agent_id: impl Into<String>,
        activity_ids: &[String],
        heartbeat_interval: Duration,
        control_out: mpsc::Sender<ControlMessage>,
        capacity: usize,
    ) -> MonitorHandle {
        let campaign_id = campaign_id.into();
        let (sender, intake) = mpsc::channel(capacity);
        let (completed, completed_rx) = watch::channel(false);

        let monitor = Self {
            campaign_id: campaign_id.clone(),
            agent_id: agent_id.into(),
            statuses: activity_ids
                .iter()
                .filter(|id| id.as_str() != MONITOR)
                .map(|id| (id.clone(), ControlStatus::Processing))
                .collect(),
            heartbeat_interval,
            intake,
            control_out,
            completed,
        };

        MonitorHandle {
            campaign_id,
            sender,
            completed: completed_rx,
            task: tokio::spawn(monitor.run()),
        }
    }

    fn processing(&self) -> usize {
        self.statuses
            .values()
            .filter(|s| **s == ControlStatus::Processing)
            .count()
    }

    fn apply(&mut self, message: &ControlMessage) {
        if message.campaign_id != self.campaign_id {
            return;
        }
        if let Some(status) = self.statuses.get_mut(&message.activity_id) {
            if !status.is_terminal() && message.status != ControlStatus::Monitoring {
                *status = message.status;
            }
        }
    }

    async fn run(mut self) {
        info!(
            campaign_id = %self.campaign_id,
            activities = self.statuses.len(),
            "Monitor started"
        );

        let mut ticker = tokio::time::interval(self.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let remaining = self.processing();
            if remaining == 0 && !*self.completed.borrow() {
                info!(campaign_id = %self.campaign_id, "All activities finished");
                self.completed.send_replace(true);
            }

            tokio::select! {
                signal = self.intake.recv() => match signal {
                    Some(MonitorSignal::Status(message)) => self.apply(&message),
                    Some(MonitorSignal::Kill) | None => break,
                },
                _ = ticker.tick() => {
                    debug!(campaign_id = %self.campaign_id, remaining, "Heartbeat");
                    let heartbeat = ControlMessage::heartbeat(&self.campaign_id)
                        .from_agent(&self.agent_id)
                        .with_msg(format!("{remaining} activities processing"));
                    if self.control_out.send(heartbeat).await.is_err() {
                        warn!(campaign_id = %self.campaign_id, "Control queue closed, heartbeat dropped");
                    }
                }
            }
        }

        info!(campaign_id = %self.campaign_id, "Monitor stopped");
    }
}

/// Owner's view of a running monitor.
pub struct MonitorHandle {
    campaign_id: String,
    sender: mpsc::Sender<MonitorSignal>,
    completed: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    #[must_use]
    pub fn campaign_id(&self) -> &str {
        &self.campaign_id
    }

    /// Queue feeding the monitor.
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<MonitorSignal> {
        self.sender.clone()
    }

    /// Whether every tracked activity has reached a terminal status.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        *self.completed.borrow()
    }

    /// Resolve once the campaign is complete, or the monitor is gone.
    pub async fn wait_completed(&mut self) {
        let _ = self.completed.wait_for(|done| *done).await;
    }

    /// Send the kill signal and wait for the loop to exit.
    pub async fn kill(self) {
        let _ = self.sender.send(MonitorSignal::Kill).await;
        if let Err(e) = self.task.await {
            warn!(campaign_id = %self.campaign_id, error = %e, "Monitor task failed");
        }
    }

    /// Whether the loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
