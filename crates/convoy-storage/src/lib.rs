//! # convoy-storage
//!
//! Audit stores recording every activity an agent receives and accepts.
//!
//! - [`MemoryActivityStore`] - process-local, for tests
//! - [`JsonlActivityStore`] - append-only journal file
//! - `RedisActivityStore` - shared Redis instance (feature `redis`)

mod error;
mod jsonl;
mod memory;
mod traits;

#[cfg(feature = "redis")]
mod redis_store;

pub use error::StorageError;
pub use jsonl::JsonlActivityStore;
pub use memory::MemoryActivityStore;
pub use traits::{ActivityRecord, ActivityStore, RecordStatus};

#[cfg(feature = "redis")]
pub use redis_store::{KeyPatterns, RedisActivityStore};
