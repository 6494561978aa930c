//! Work queue with exclusive, time-bounded processing leases.
//!
//! A consumer claims one job at a time and must `ack` within the lease
//! duration. Leases that expire without an ack are "stalled": the reaper
//! returns them to the pending queue up to a bounded redelivery cap, after
//! which the job is handed back as exhausted and never redelivered.
//!
//! Lease tokens fence releases: a slow worker whose lease already expired
//! and was redelivered cannot ack or nack the newer holder's lease.

mod memory;
mod redis_queue;

pub use memory::MemoryJobQueue;
pub use redis_queue::RedisJobQueue;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The lease was no longer held under the caller's token — the job
    /// stalled and was redelivered (or already acked) in the meantime.
    #[error("lease on job {0} is no longer held")]
    LeaseLost(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// An exclusive claim on one job, valid until `deadline`.
#[derive(Debug, Clone)]
pub struct Lease {
    pub job_id: String,
    pub token: String,
    pub deadline: DateTime<Utc>,
}

/// Outcome of one stall scan.
#[derive(Debug, Default)]
pub struct StallSweep {
    /// Jobs whose lease expired and were returned to the pending queue.
    pub requeued: Vec<String>,
    /// Jobs that exceeded the redelivery cap; the caller must fail them.
    pub exhausted: Vec<String>,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Appends a job reference to the pending queue.
    async fn enqueue(&self, job_id: &str) -> Result<(), QueueError>;

    /// Claims the oldest pending job, holding a lease for `lease_ttl`.
    /// Returns `None` when the queue is empty.
    async fn claim(&self, lease_ttl: Duration) -> Result<Option<Lease>, QueueError>;

    /// Acknowledges successful processing and releases the lease.
    async fn ack(&self, lease: &Lease) -> Result<(), QueueError>;

    /// Releases the lease after a failed attempt without requeueing.
    /// The job record already carries the failure; only stalls redeliver.
    async fn nack(&self, lease: &Lease) -> Result<(), QueueError>;

    /// Scans for expired leases. Each stalled job is requeued unless its
    /// stall count now exceeds `max_stalls`, in which case it is returned
    /// in `exhausted`.
    async fn reap_stalled(&self, max_stalls: u32) -> Result<StallSweep, QueueError>;
}
