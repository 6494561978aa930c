//! Uploaded document references.
//!
//! Uploads are written to the upload directory alongside a `{id}.meta.json`
//! sidecar describing the original filename and storage path. References are
//! created once at upload time and read-only to the pipeline.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document {0} not found")]
    Missing(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: String,
    pub original_name: String,
    pub storage_path: PathBuf,
}

/// Read side of the document store, as seen by the pipeline.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Resolves an uploaded document id to its reference.
    async fn resolve(&self, id: &str) -> Result<DocumentRef, DocumentError>;

    /// Reads the raw bytes behind a reference.
    async fn read(&self, reference: &DocumentRef) -> Result<Vec<u8>, DocumentError>;
}

/// Filesystem-backed document store used by the upload endpoint and the
/// pipeline alike.
pub struct FsDocumentStore {
    upload_dir: PathBuf,
}

impl FsDocumentStore {
    pub fn new(upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
        }
    }

    /// Creates the upload directory if it does not exist yet.
    pub async fn ensure_dir(&self) -> Result<(), DocumentError> {
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        Ok(())
    }

    /// Persists one uploaded file and its metadata sidecar, returning the
    /// new reference.
    pub async fn save(
        &self,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<DocumentRef, DocumentError> {
        let id = Uuid::new_v4().to_string();
        let extension = Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("pdf");
        let storage_path = self.upload_dir.join(format!("{id}.{extension}"));

        tokio::fs::write(&storage_path, bytes).await?;

        let reference = DocumentRef {
            id: id.clone(),
            original_name: original_name.to_string(),
            storage_path,
        };
        let meta = serde_json::to_vec(&reference)?;
        tokio::fs::write(self.meta_path(&id), meta).await?;

        Ok(reference)
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.upload_dir.join(format!("{id}.meta.json"))
    }
}

#[async_trait]
impl DocumentSource for FsDocumentStore {
    async fn resolve(&self, id: &str) -> Result<DocumentRef, DocumentError> {
        let meta = match tokio::fs::read(self.meta_path(id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DocumentError::Missing(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&meta)?)
    }

    async fn read(&self, reference: &DocumentRef) -> Result<Vec<u8>, DocumentError> {
        match tokio::fs::read(&reference.storage_path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DocumentError::Missing(reference.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_then_resolve_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDocumentStore::new(dir.path());

        let saved = store.save("resume.pdf", b"pdf bytes").await.unwrap();
        assert_eq!(saved.original_name, "resume.pdf");

        let resolved = store.resolve(&saved.id).await.unwrap();
        assert_eq!(resolved.storage_path, saved.storage_path);

        let bytes = store.read(&resolved).await.unwrap();
        assert_eq!(bytes, b"pdf bytes");
    }

    #[tokio::test]
    async fn test_resolve_unknown_id_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDocumentStore::new(dir.path());

        let err = store.resolve("nope").await.unwrap_err();
        assert!(matches!(err, DocumentError::Missing(_)));
    }

    #[tokio::test]
    async fn test_extension_defaults_to_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDocumentStore::new(dir.path());

        let saved = store.save("resume", b"bytes").await.unwrap();
        assert!(saved
            .storage_path
            .to_string_lossy()
            .ends_with(".pdf"));
    }
}
