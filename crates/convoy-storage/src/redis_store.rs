//! Redis audit store.

use async_trait::async_trait;
use chrono::Utc;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tracing::{debug, info, instrument};

use crate::error::StorageError;
use crate::traits::{ActivityRecord, ActivityStore, RecordStatus};

/// Audit store backed by Redis, shareable by a whole fleet.
pub struct RedisActivityStore {
    conn: ConnectionManager,
}

impl RedisActivityStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns an error if connection fails.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        info!(url = %url, "Connecting to Redis");

        let client =
            Client::open(url).map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        info!("Connected to Redis");

        Ok(Self { conn })
    }

    async fn put(&self, record: &ActivityRecord) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();

        let serialized = serde_json::to_string(record)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        conn.set::<_, _, ()>(KeyPatterns::record(&record.record_id), serialized)
            .await
            .map_err(|e| StorageError::SetFailed(e.to_string()))?;

        conn.zadd::<_, _, _, ()>(
            KeyPatterns::campaign_index(&record.campaign_id),
            &record.record_id,
            record.created_at.timestamp_millis(),
        )
        .await
        .map_err(|e| StorageError::SetFailed(e.to_string()))
    }
}

#[async_trait]
impl ActivityStore for RedisActivityStore {
    #[instrument(skip(self, record), fields(record_id = %record.record_id))]
    async fn insert(&self, record: ActivityRecord) -> Result<(), StorageError> {
        debug!("Inserting audit record");
        self.put(&record).await
    }

    #[instrument(skip(self))]
    async fn update(&self, record_id: &str, status: RecordStatus) -> Result<(), StorageError> {
        let mut record = self
            .get(record_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(record_id.to_string()))?;
        record.status = status;
        record.updated_at = Utc::now();
        self.put(&record).await
    }

    async fn get(&self, record_id: &str) -> Result<Option<ActivityRecord>, StorageError> {
        let mut conn = self.conn.clone();

        let value: Option<String> = conn
            .get(KeyPatterns::record(record_id))
            .await
            .map_err(|e| StorageError::GetFailed(e.to_string()))?;

        value
            .map(|v| {
                serde_json::from_str(&v)
                    .map_err(|e| StorageError::DeserializationError(e.to_string()))
            })
            .transpose()
    }
}

/// Standard key patterns for Redis.
pub struct KeyPatterns;

impl KeyPatterns {
    /// Audit record key.
    #[must_use]
    pub fn record(record_id: &str) -> String {
        format!("convoy:records:{record_id}")
    }

    /// Sorted set of a campaign's record ids, scored by creation time.
    #[must_use]
    pub fn campaign_index(campaign_id: &str) -> String {
        format!("convoy:campaigns:{campaign_id}:records")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_patterns() {
        assert_eq!(KeyPatterns::record("a:c:n"), "convoy:records:a:c:n");
        assert_eq!(
            KeyPatterns::campaign_index("c"),
            "convoy:campaigns:c:records"
        );
    }

    #[tokio::test]
    #[ignore = "requires Redis server"]
    async fn test_roundtrip() {
        let store = RedisActivityStore::connect("redis://127.0.0.1/").await.unwrap();
        let record = ActivityRecord::new(
            "agent-1",
            &uuid::Uuid::new_v4().to_string(),
            "node-1",
            RecordStatus::Received,
            json!({}),
        );
        let id = record.record_id.clone();

        store.insert(record).await.unwrap();
        store.update(&id, RecordStatus::Accepted).await.unwrap();
        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, RecordStatus::Accepted);
    }
}
