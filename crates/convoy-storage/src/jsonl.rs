//! Append-only journal store.
//!
//! Each insert and status change is appended as one JSON line. Opening an
//! existing journal replays it, so records survive agent restarts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::error::StorageError;
use crate::traits::{ActivityRecord, ActivityStore, RecordStatus};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalEntry {
    Insert {
        record: ActivityRecord,
    },
    Update {
        record_id: String,
        status: RecordStatus,
        updated_at: DateTime<Utc>,
    },
}

struct Journal {
    file: File,
    records: HashMap<String, ActivityRecord>,
}

/// Audit store backed by a JSON-lines file.
pub struct JsonlActivityStore {
    path: PathBuf,
    journal: Mutex<Journal>,
}

impl JsonlActivityStore {
    /// Open (or create) the journal at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or read.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let (records, torn) = Self::replay(&path).await?;
        info!(path = %path.display(), records = records.len(), "Opened audit journal");

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        if torn {
            file.write_all(b"\n").await?;
        }

        Ok(Self {
            path,
            journal: Mutex::new(Journal { file, records }),
        })
    }

    /// Journal location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rebuild the record map. Also reports whether the last line is
    /// unterminated, so the next append starts on a fresh line.
    async fn replay(
        path: &Path,
    ) -> Result<(HashMap<String, ActivityRecord>, bool), StorageError> {
        let mut records = HashMap::new();
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((records, false)),
            Err(e) => return Err(e.into()),
        };
        let torn = !contents.is_empty() && !contents.ends_with('\n');

        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEntry>(line) {
                Ok(JournalEntry::Insert { record }) => {
                    records.insert(record.record_id.clone(), record);
                }
                Ok(JournalEntry::Update {
                    record_id,
                    status,
                    updated_at,
                }) => {
                    if let Some(record) = records.get_mut(&record_id) {
                        record.status = status;
                        record.updated_at = updated_at;
                    }
                }
                // A crash can leave a torn last line.
                Err(e) => warn!(error = %e, "Skipping unreadable journal line"),
            }
        }
        Ok((records, torn))
    }

    async fn append(file: &mut File, entry: &JournalEntry) -> Result<(), StorageError> {
        let mut line = serde_json::to_vec(entry)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        line.push(b'\n');
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ActivityStore for JsonlActivityStore {
    #[instrument(skip(self, record), fields(record_id = %record.record_id))]
    async fn insert(&self, record: ActivityRecord) -> Result<(), StorageError> {
        let mut journal = self.journal.lock().await;
        let entry = JournalEntry::Insert { record };
        Self::append(&mut journal.file, &entry).await?;
        if let JournalEntry::Insert { record } = entry {
            journal.records.insert(record.record_id.clone(), record);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update(&self, record_id: &str, status: RecordStatus) -> Result<(), StorageError> {
        let mut journal = self.journal.lock().await;
        if !journal.records.contains_key(record_id) {
            return Err(StorageError::NotFound(record_id.to_string()));
        }

        let updated_at = Utc::now();
        let entry = JournalEntry::Update {
            record_id: record_id.to_string(),
            status,
            updated_at,
        };
        Self::append(&mut journal.file, &entry).await?;

        if let Some(record) = journal.records.get_mut(record_id) {
            record.status = status;
            record.updated_at = updated_at;
        }
        Ok(())
    }

    async fn get(&self, record_id: &str) -> Result<Option<ActivityRecord>, StorageError> {
        Ok(self.journal.lock().await.records.get(record_id).cloned())
    }
}
