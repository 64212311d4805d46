//! Storage traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Lifecycle of an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Received from a campaign and forwarded to the broker
    Received,
    /// Admitted from the broker for local execution
    Accepted,
    /// Given up on after too many redeliveries
    DeadLettered,
}

/// One activity as seen by one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Agent-scoped id, see [`ActivityRecord::record_id`]
    pub record_id: String,
    pub agent_id: String,
    pub node_id: String,
    pub campaign_id: String,
    pub status: RecordStatus,
    /// Snapshot of the DAG node
    pub node: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActivityRecord {
    /// Create a record stamped with the current time.
    #[must_use]
    pub fn new(
        agent_id: &str,
        campaign_id: &str,
        node_id: &str,
        status: RecordStatus,
        node: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            record_id: Self::record_id(agent_id, campaign_id, node_id),
            agent_id: agent_id.to_string(),
            node_id: node_id.to_string(),
            campaign_id: campaign_id.to_string(),
            status,
            node,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record id for `node_id` of `campaign_id` as seen by `agent_id`.
    #[must_use]
    pub fn record_id(agent_id: &str, campaign_id: &str, node_id: &str) -> String {
        format!("{agent_id}:{campaign_id}:{node_id}")
    }
}

/// Audit store. Records are written by the agent and never read back on the
/// execution path.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Insert a new record, replacing one with the same id.
    async fn insert(&self, record: ActivityRecord) -> Result<(), StorageError>;

    /// Change the status of an existing record.
    ///
    /// Returns [`StorageError::NotFound`] if no record has this id.
    async fn update(&self, record_id: &str, status: RecordStatus) -> Result<(), StorageError>;

    /// Fetch a record.
    async fn get(&self, record_id: &str) -> Result<Option<ActivityRecord>, StorageError>;

    /// Update the status of `record` if it exists, insert it otherwise.
    async fn record(&self, record: ActivityRecord) -> Result<(), StorageError> {
        match self.update(&record.record_id, record.status).await {
            Err(StorageError::NotFound(_)) => self.insert(record).await,
            other => other,
        }
    }
}
