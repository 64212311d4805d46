//! Control/status messages exchanged on the `CONTROL` channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::{MONITOR, TERMINATOR};
use crate::error::CoreError;

/// Status carried by a control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlStatus {
    /// Still running
    Processing,
    /// Finished successfully
    Succeeded,
    /// Finished with an error
    Failed,
    /// Campaign heartbeat
    Monitoring,
}

impl ControlStatus {
    /// SUCCEEDED or FAILED.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for ControlStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Processing => write!(f, "PROCESSING"),
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Monitoring => write!(f, "MONITORING"),
        }
    }
}

/// A status record for one activity (or one campaign heartbeat).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub status: ControlStatus,
    pub activity_id: String,
    pub campaign_id: String,
    #[serde(default)]
    pub msg: String,
    /// Agent that produced the message
    #[serde(default)]
    pub agent_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ControlMessage {
    /// Create a message with an empty `msg`.
    #[must_use]
    pub fn new(
        status: ControlStatus,
        activity_id: impl Into<String>,
        campaign_id: impl Into<String>,
    ) -> Self {
        Self {
            status,
            activity_id: activity_id.into(),
            campaign_id: campaign_id.into(),
            msg: String::new(),
            agent_id: None,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn processing(activity_id: impl Into<String>, campaign_id: impl Into<String>) -> Self {
        Self::new(ControlStatus::Processing, activity_id, campaign_id)
    }

    #[must_use]
    pub fn succeeded(activity_id: impl Into<String>, campaign_id: impl Into<String>) -> Self {
        Self::new(ControlStatus::Succeeded, activity_id, campaign_id)
    }

    #[must_use]
    pub fn failed(
        activity_id: impl Into<String>,
        campaign_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(ControlStatus::Failed, activity_id, campaign_id).with_msg(reason)
    }

    /// Heartbeat for a whole campaign.
    #[must_use]
    pub fn heartbeat(campaign_id: impl Into<String>) -> Self {
        Self::new(ControlStatus::Monitoring, MONITOR, campaign_id)
    }

    /// Campaign-level completion emitted when the `TERMINATOR` is reached.
    #[must_use]
    pub fn campaign_complete(campaign_id: impl Into<String>) -> Self {
        Self::succeeded(TERMINATOR, campaign_id).with_msg("campaign complete")
    }

    #[must_use]
    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = msg.into();
        self
    }

    #[must_use]
    pub fn from_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Whether this is a campaign heartbeat.
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.status == ControlStatus::Monitoring
    }

    /// Encode for the broker.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        serde_json::to_vec(self).map_err(|e| CoreError::SerializationError(e.to_string()))
    }

    /// Decode a broker body.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is not a control message.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        serde_json::from_slice(bytes).map_err(|e| CoreError::DeserializationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(ControlStatus::Succeeded.is_terminal());
        assert!(ControlStatus::Failed.is_terminal());
        assert!(!ControlStatus::Processing.is_terminal());
        assert!(!ControlStatus::Monitoring.is_terminal());
    }

    #[test]
    fn test_heartbeat_targets_monitor() {
        let hb = ControlMessage::heartbeat("camp-9").from_agent("agent-1");
        assert!(hb.is_heartbeat());
        assert_eq!(hb.activity_id, MONITOR);
        assert_eq!(hb.agent_id.as_deref(), Some("agent-1"));
    }

    #[test]
    fn test_wire_format() {
        let msg = ControlMessage::failed("a-1", "camp-1", "exit code 2");
        let bytes = msg.to_bytes().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["status"], "FAILED");
        assert_eq!(value["msg"], "exit code 2");

        assert_eq!(ControlMessage::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            ControlMessage::from_bytes(b"not json"),
            Err(CoreError::DeserializationError(_))
        ));
    }
}
