#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::queue::{JobQueue, Lease, QueueError, StallSweep};

struct HeldLease {
    token: String,
    deadline: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    pending: VecDeque<String>,
    leases: HashMap<String, HeldLease>,
    stalls: HashMap<String, u32>,
}

/// In-process queue backed by a mutex-guarded state. Used by tests and
/// single-process deployments without Redis.
#[derive(Default)]
pub struct MemoryJobQueue {
    inner: Mutex<Inner>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job_id: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.pending.push_back(job_id.to_string());
        Ok(())
    }

    async fn claim(&self, lease_ttl: Duration) -> Result<Option<Lease>, QueueError> {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        let job_id = match inner.pending.pop_front() {
            Some(id) => id,
            None => return Ok(None),
        };
        let token = Uuid::new_v4().to_string();
        let deadline = Utc::now()
            + chrono::Duration::from_std(lease_ttl).unwrap_or_else(|_| chrono::Duration::zero());
        inner.leases.insert(
            job_id.clone(),
            HeldLease {
                token: token.clone(),
                deadline,
            },
        );
        Ok(Some(Lease {
            job_id,
            token,
            deadline,
        }))
    }

    async fn ack(&self, lease: &Lease) -> Result<(), QueueError> {
        self.release(lease)
    }

    async fn nack(&self, lease: &Lease) -> Result<(), QueueError> {
        self.release(lease)
    }

    async fn reap_stalled(&self, max_stalls: u32) -> Result<StallSweep, QueueError> {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        let now = Utc::now();
        let expired: Vec<String> = inner
            .leases
            .iter()
            .filter(|(_, held)| held.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        let mut sweep = StallSweep::default();
        for job_id in expired {
            inner.leases.remove(&job_id);
            let count = {
                let entry = inner.stalls.entry(job_id.clone()).or_insert(0);
                *entry += 1;
                *entry
            };
            if count > max_stalls {
                inner.stalls.remove(&job_id);
                sweep.exhausted.push(job_id);
            } else {
                inner.pending.push_back(job_id.clone());
                sweep.requeued.push(job_id);
            }
        }
        Ok(sweep)
    }
}

impl MemoryJobQueue {
    fn release(&self, lease: &Lease) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        match inner.leases.get(&lease.job_id) {
            Some(held) if held.token == lease.token => {
                inner.leases.remove(&lease.job_id);
                inner.stalls.remove(&lease.job_id);
                Ok(())
            }
            _ => Err(QueueError::LeaseLost(lease.job_id.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_claim_returns_jobs_in_fifo_order() {
        let queue = MemoryJobQueue::new();
        queue.enqueue("job_a").await.unwrap();
        queue.enqueue("job_b").await.unwrap();

        let first = queue.claim(Duration::from_secs(60)).await.unwrap().unwrap();
        let second = queue.claim(Duration::from_secs(60)).await.unwrap().unwrap();
        assert_eq!(first.job_id, "job_a");
        assert_eq!(second.job_id, "job_b");
        assert!(queue.claim(Duration::from_secs(60)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ack_releases_lease_and_clears_stall_count() {
        let queue = MemoryJobQueue::new();
        queue.enqueue("job_a").await.unwrap();
        let lease = queue.claim(Duration::from_secs(60)).await.unwrap().unwrap();
        queue.ack(&lease).await.unwrap();

        // Nothing left to reap or claim.
        let sweep = queue.reap_stalled(3).await.unwrap();
        assert!(sweep.requeued.is_empty());
        assert!(sweep.exhausted.is_empty());
        assert!(queue.claim(Duration::from_secs(60)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_lease_is_requeued() {
        let queue = MemoryJobQueue::new();
        queue.enqueue("job_a").await.unwrap();
        let _lease = queue.claim(Duration::ZERO).await.unwrap().unwrap();

        let sweep = queue.reap_stalled(3).await.unwrap();
        assert_eq!(sweep.requeued, vec!["job_a".to_string()]);

        // The job is claimable again by another worker.
        let redelivered = queue.claim(Duration::from_secs(60)).await.unwrap().unwrap();
        assert_eq!(redelivered.job_id, "job_a");
    }

    #[tokio::test]
    async fn test_stall_cap_exhausts_job() {
        let queue = MemoryJobQueue::new();
        queue.enqueue("job_a").await.unwrap();

        // Stall three times: each one redelivers.
        for _ in 0..3 {
            queue.claim(Duration::ZERO).await.unwrap().unwrap();
            let sweep = queue.reap_stalled(3).await.unwrap();
            assert_eq!(sweep.requeued, vec!["job_a".to_string()]);
        }

        // The fourth stall exceeds the cap.
        queue.claim(Duration::ZERO).await.unwrap().unwrap();
        let sweep = queue.reap_stalled(3).await.unwrap();
        assert!(sweep.requeued.is_empty());
        assert_eq!(sweep.exhausted, vec!["job_a".to_string()]);

        // Exhausted jobs are never redelivered.
        assert!(queue.claim(Duration::from_secs(60)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_lease_cannot_release_redelivered_job() {
        let queue = MemoryJobQueue::new();
        queue.enqueue("job_a").await.unwrap();
        let stale = queue.claim(Duration::ZERO).await.unwrap().unwrap();

        queue.reap_stalled(3).await.unwrap();
        let fresh = queue.claim(Duration::from_secs(60)).await.unwrap().unwrap();
        assert_ne!(stale.token, fresh.token);

        // The slow-but-not-dead worker's ack is fenced out.
        let err = queue.ack(&stale).await.unwrap_err();
        assert!(matches!(err, QueueError::LeaseLost(_)));

        // The current holder can still ack.
        queue.ack(&fresh).await.unwrap();
    }
}
