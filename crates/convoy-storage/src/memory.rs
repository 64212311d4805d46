//! In-memory audit store.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::traits::{ActivityRecord, ActivityStore, RecordStatus};

/// Audit store kept in process memory.
#[derive(Default)]
pub struct MemoryActivityStore {
    records: RwLock<HashMap<String, ActivityRecord>>,
}

impl MemoryActivityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// All records of a campaign, oldest first.
    pub async fn for_campaign(&self, campaign_id: &str) -> Vec<ActivityRecord> {
        let mut records: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.campaign_id == campaign_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        records
    }
}

#[async_trait]
impl ActivityStore for MemoryActivityStore {
    async fn insert(&self, record: ActivityRecord) -> Result<(), StorageError> {
        self.records
            .write()
            .await
            .insert(record.record_id.clone(), record);
        Ok(())
    }

    async fn update(&self, record_id: &str, status: RecordStatus) -> Result<(), StorageError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(record_id)
            .ok_or_else(|| StorageError::NotFound(record_id.to_string()))?;
        record.status = status;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn get(&self, record_id: &str) -> Result<Option<ActivityRecord>, StorageError> {
        Ok(self.records.read().await.get(record_id).cloned())
    }
}
