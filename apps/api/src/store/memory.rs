#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::jobs::JobRecord;
use crate::store::{JobStore, StoreError};

/// In-process store backed by a mutex-guarded map. Used by tests and
/// single-process deployments without Redis.
#[derive(Default)]
pub struct MemoryJobStore {
    records: Mutex<HashMap<String, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, record: &JobRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().expect("store mutex poisoned");
        if records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id.clone()));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<JobRecord, StoreError> {
        let records = self.records.lock().expect("store mutex poisoned");
        records
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn update(&self, record: &JobRecord) -> Result<JobRecord, StoreError> {
        let mut records = self.records.lock().expect("store mutex poisoned");
        let stored = records
            .get_mut(&record.id)
            .ok_or_else(|| StoreError::NotFound(record.id.clone()))?;
        if stored.revision != record.revision {
            return Err(StoreError::Conflict(record.id.clone()));
        }
        let mut next = record.clone();
        next.revision += 1;
        *stored = next.clone();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobInput, JobRecord, JobStatus};

    fn queued_record() -> JobRecord {
        JobRecord::queued(JobInput {
            job_title: "Backend Engineer".to_string(),
            cv_document_id: "cv1".to_string(),
            project_document_id: "proj1".to_string(),
        })
    }

    #[tokio::test]
    async fn test_create_then_get_roundtrips() {
        let store = MemoryJobStore::new();
        let record = queued_record();
        store.create(&record).await.unwrap();

        let loaded = store.get(&record.id).await.unwrap();
        assert_eq!(loaded.status, JobStatus::Queued);
        assert_eq!(loaded.revision, 0);
    }

    #[tokio::test]
    async fn test_create_duplicate_id_rejected() {
        let store = MemoryJobStore::new();
        let record = queued_record();
        store.create(&record).await.unwrap();

        let err = store.create(&record).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryJobStore::new();
        let err = store.get("job_missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_bumps_revision() {
        let store = MemoryJobStore::new();
        let mut record = queued_record();
        store.create(&record).await.unwrap();

        record.begin_processing();
        let stored = store.update(&record).await.unwrap();
        assert_eq!(stored.revision, 1);
        assert_eq!(stored.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_stale_revision_conflicts() {
        let store = MemoryJobStore::new();
        let mut record = queued_record();
        store.create(&record).await.unwrap();

        // First writer wins.
        record.begin_processing();
        store.update(&record).await.unwrap();

        // A second writer still holding revision 0 must lose.
        let mut stale = record.clone();
        stale.fail("stale write");
        let err = store.update(&stale).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let stored = store.get(&record.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Processing);
    }
}
