//! Job Record Store — durable key-value state for evaluation jobs.
//!
//! Every write is a full-record overwrite guarded by compare-and-set on the
//! record's `revision`, so the read-modify-write pattern used by the pipeline
//! is safe even when a stalled job is redelivered and two workers race.

mod memory;
mod redis_store;

pub use memory::MemoryJobStore;
pub use redis_store::RedisJobStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::jobs::JobRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} already exists")]
    AlreadyExists(String),

    #[error("job {0} not found")]
    NotFound(String),

    /// The stored revision no longer matches the revision the caller read.
    /// Another writer owns the record now; the caller must not retry blindly.
    #[error("job {0} was modified concurrently")]
    Conflict(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists a new record. Fails with `AlreadyExists` if the id is in use.
    async fn create(&self, record: &JobRecord) -> Result<(), StoreError>;

    /// Loads the current record for `id`.
    async fn get(&self, id: &str) -> Result<JobRecord, StoreError>;

    /// Compare-and-set full-record overwrite keyed on `record.revision`.
    /// On success the stored revision is bumped and the stored record is
    /// returned; callers must continue from the returned record.
    async fn update(&self, record: &JobRecord) -> Result<JobRecord, StoreError>;
}
