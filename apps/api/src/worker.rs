//! Queue Consumer — claims leased jobs and drives them through the
//! Orchestrator, plus the reaper task that recovers stalled leases.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::pipeline::Orchestrator;
use crate::queue::{JobQueue, QueueError};
use crate::store::{JobStore, StoreError};

/// Error recorded on jobs that exceeded the stalled-redelivery cap.
pub const STALLED_ERROR: &str = "stalled too many times: exceeded redelivery cap";

const IDLE_POLL: Duration = Duration::from_millis(500);

pub struct WorkerContext {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn JobQueue>,
    pub orchestrator: Arc<Orchestrator>,
    pub lease_duration: Duration,
    pub stall_scan_interval: Duration,
    pub max_stalls: u32,
}

/// One consumer slot: processes jobs end-to-end, one at a time, forever.
pub async fn run_worker(worker_id: usize, ctx: Arc<WorkerContext>) {
    info!(worker_id, "worker started");
    loop {
        match process_next(&ctx).await {
            Ok(true) => {}
            Ok(false) => tokio::time::sleep(IDLE_POLL).await,
            Err(e) => {
                warn!(worker_id, "queue error: {e}");
                tokio::time::sleep(IDLE_POLL).await;
            }
        }
    }
}

/// Claims and processes at most one job. Returns whether a job was claimed.
pub async fn process_next(ctx: &WorkerContext) -> Result<bool, QueueError> {
    let lease = match ctx.queue.claim(ctx.lease_duration).await? {
        Some(lease) => lease,
        None => return Ok(false),
    };
    let job_id = lease.job_id.clone();
    info!(%job_id, deadline = %lease.deadline, "processing evaluation job");

    match ctx.orchestrator.run(&job_id).await {
        Ok(()) => {
            if let Err(e) = ctx.queue.ack(&lease).await {
                // Lease already stalled and was redelivered; the terminal
                // record makes the duplicate attempt a no-op.
                warn!(%job_id, "ack failed: {e}");
            }
        }
        Err(e) => {
            // The record already carries the failure; release without
            // requeueing. Only stalls redeliver.
            warn!(%job_id, "evaluation failed: {e}");
            if let Err(release_err) = ctx.queue.nack(&lease).await {
                warn!(%job_id, "nack failed: {release_err}");
            }
        }
    }
    Ok(true)
}

/// Periodically sweeps expired leases, requeueing stalled jobs and failing
/// those that exceeded the redelivery cap.
pub async fn run_stall_reaper(ctx: Arc<WorkerContext>) {
    info!(
        interval_secs = ctx.stall_scan_interval.as_secs(),
        max_stalls = ctx.max_stalls,
        "stall reaper started"
    );
    let mut ticker = tokio::time::interval(ctx.stall_scan_interval);
    loop {
        ticker.tick().await;
        sweep_stalled(&ctx).await;
    }
}

pub(crate) async fn sweep_stalled(ctx: &WorkerContext) {
    let sweep = match ctx.queue.reap_stalled(ctx.max_stalls).await {
        Ok(sweep) => sweep,
        Err(e) => {
            warn!("stall sweep failed: {e}");
            return;
        }
    };
    for job_id in &sweep.requeued {
        warn!(%job_id, "lease stalled, job requeued");
    }
    for job_id in &sweep.exhausted {
        fail_exhausted(ctx.store.as_ref(), job_id).await;
    }
}

/// Marks a stall-exhausted job failed. Retries once on CAS conflict in case
/// the last slow worker wrote concurrently; a terminal record ends the loop.
async fn fail_exhausted(store: &dyn JobStore, job_id: &str) {
    for _ in 0..2 {
        let mut record = match store.get(job_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(%job_id, "cannot load stall-exhausted job: {e}");
                return;
            }
        };
        if record.status.is_terminal() {
            return;
        }
        record.fail(STALLED_ERROR);
        match store.update(&record).await {
            Ok(_) => {
                warn!(%job_id, "job exceeded stall cap, marked failed");
                return;
            }
            Err(StoreError::Conflict(_)) => continue,
            Err(e) => {
                warn!(%job_id, "could not persist stall failure: {e}");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::documents::{DocumentError, DocumentRef, DocumentSource};
    use crate::embeddings::{Embedder, EmbeddingError};
    use crate::extract::{DocumentExtractor, ExtractError};
    use crate::jobs::{JobInput, JobRecord, JobStatus};
    use crate::llm_client::{ChatMessage, CompletionClient, CompletionOptions, LlmError};
    use crate::queue::MemoryJobQueue;
    use crate::retrieval::{RetrievalError, Retriever, Snippet};
    use crate::store::MemoryJobStore;

    const CV_JSON: &str = r#"{"technical_skills":5,"experience_level":4,"achievements":4,"cultural_fit":4,"cv_match_rate":0.86,"cv_feedback":"Strong backend profile"}"#;
    const PROJECT_JSON: &str = r#"{"correctness":5,"code_quality":4,"resilience":4,"documentation":4,"creativity":5,"project_score":4.4,"project_feedback":"Solid"}"#;
    const SYNTHESIS_JSON: &str = r#"{"overall_summary":"Good fit.","recommendation":"Hire"}"#;

    struct MemoryDocs(HashMap<String, Vec<u8>>);

    #[async_trait]
    impl DocumentSource for MemoryDocs {
        async fn resolve(&self, id: &str) -> Result<DocumentRef, DocumentError> {
            if !self.0.contains_key(id) {
                return Err(DocumentError::Missing(id.to_string()));
            }
            Ok(DocumentRef {
                id: id.to_string(),
                original_name: format!("{id}.pdf"),
                storage_path: format!("/tmp/{id}.pdf").into(),
            })
        }

        async fn read(&self, reference: &DocumentRef) -> Result<Vec<u8>, DocumentError> {
            self.0
                .get(&reference.id)
                .cloned()
                .ok_or_else(|| DocumentError::Missing(reference.id.clone()))
        }
    }

    struct PlainTextExtractor;

    impl DocumentExtractor for PlainTextExtractor {
        fn extract_text(&self, bytes: &[u8]) -> Result<String, ExtractError> {
            Ok(String::from_utf8_lossy(bytes).into_owned())
        }
    }

    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![0.1; 8])
        }
    }

    struct StubRetriever;

    #[async_trait]
    impl Retriever for StubRetriever {
        async fn search(
            &self,
            _collection: &str,
            _vector: &[f32],
            _top_k: usize,
        ) -> Result<Vec<Snippet>, RetrievalError> {
            Ok(vec![Snippet {
                text: "reference snippet".to_string(),
                metadata: serde_json::Value::Null,
            }])
        }
    }

    struct ScriptedLlm(std::sync::Mutex<std::collections::VecDeque<String>>);

    #[async_trait]
    impl CompletionClient for ScriptedLlm {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _opts: CompletionOptions,
        ) -> Result<String, LlmError> {
            Ok(self
                .0
                .lock()
                .unwrap()
                .pop_front()
                .expect("script ran out of responses"))
        }
    }

    fn context(store: Arc<MemoryJobStore>, responses: &[&str], with_docs: bool) -> WorkerContext {
        let docs = if with_docs {
            MemoryDocs(
                [
                    ("cv1".to_string(), b"cv text".to_vec()),
                    ("proj1".to_string(), b"project text".to_vec()),
                ]
                .into_iter()
                .collect(),
            )
        } else {
            MemoryDocs(HashMap::new())
        };
        let orchestrator = Orchestrator::new(
            store.clone(),
            Arc::new(docs),
            Arc::new(PlainTextExtractor),
            Arc::new(StubEmbedder),
            Arc::new(StubRetriever),
            Arc::new(ScriptedLlm(std::sync::Mutex::new(
                responses.iter().map(|s| s.to_string()).collect(),
            ))),
            "system_docs".to_string(),
        );
        WorkerContext {
            store,
            queue: Arc::new(MemoryJobQueue::new()),
            orchestrator: Arc::new(orchestrator),
            lease_duration: Duration::from_secs(60),
            stall_scan_interval: Duration::from_millis(10),
            max_stalls: 3,
        }
    }

    async fn seed_job(store: &MemoryJobStore) -> String {
        let record = JobRecord::queued(JobInput {
            job_title: "Backend Engineer".to_string(),
            cv_document_id: "cv1".to_string(),
            project_document_id: "proj1".to_string(),
        });
        store.create(&record).await.unwrap();
        record.id
    }

    #[tokio::test]
    async fn test_process_next_completes_and_acks() {
        let store = Arc::new(MemoryJobStore::new());
        let ctx = context(store.clone(), &[CV_JSON, PROJECT_JSON, SYNTHESIS_JSON], true);
        let job_id = seed_job(&store).await;
        ctx.queue.enqueue(&job_id).await.unwrap();

        assert!(process_next(&ctx).await.unwrap());
        assert_eq!(
            store.get(&job_id).await.unwrap().status,
            JobStatus::Completed
        );

        // Lease released: nothing stalled, nothing pending.
        sweep_stalled(&ctx).await;
        assert!(!process_next(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_queue_reports_idle() {
        let store = Arc::new(MemoryJobStore::new());
        let ctx = context(store, &[], true);
        assert!(!process_next(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_job_is_not_requeued() {
        let store = Arc::new(MemoryJobStore::new());
        // No documents: the pipeline fails with DocumentMissing.
        let ctx = context(store.clone(), &[], false);
        let job_id = seed_job(&store).await;
        ctx.queue.enqueue(&job_id).await.unwrap();

        assert!(process_next(&ctx).await.unwrap());
        let record = store.get(&job_id).await.unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.error.is_some());

        // The nack released the lease without redelivery.
        sweep_stalled(&ctx).await;
        assert!(!process_next(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_stall_cap_marks_job_failed() {
        let store = Arc::new(MemoryJobStore::new());
        let mut ctx = context(store.clone(), &[], true);
        ctx.lease_duration = Duration::ZERO;
        let job_id = seed_job(&store).await;
        ctx.queue.enqueue(&job_id).await.unwrap();

        // A crashing worker claims but never acks; each sweep redelivers
        // until the cap is exceeded.
        for _ in 0..4 {
            ctx.queue.claim(ctx.lease_duration).await.unwrap().unwrap();
            sweep_stalled(&ctx).await;
        }

        let record = store.get(&job_id).await.unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.error.unwrap().contains("stalled too many times"));

        // Never redelivered again.
        assert!(ctx
            .queue
            .claim(Duration::from_secs(60))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_reaper_does_not_overwrite_terminal_record() {
        let store = Arc::new(MemoryJobStore::new());
        let ctx = context(store.clone(), &[CV_JSON, PROJECT_JSON, SYNTHESIS_JSON], true);
        let job_id = seed_job(&store).await;
        ctx.queue.enqueue(&job_id).await.unwrap();

        assert!(process_next(&ctx).await.unwrap());
        let completed = store.get(&job_id).await.unwrap();
        assert_eq!(completed.status, JobStatus::Completed);

        // Even if the reaper were handed this id, the terminal status wins.
        fail_exhausted(store.as_ref(), &job_id).await;
        let after = store.get(&job_id).await.unwrap();
        assert_eq!(after.status, JobStatus::Completed);
        assert_eq!(after.revision, completed.revision);
    }
}
