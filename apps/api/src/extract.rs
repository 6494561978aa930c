//! Document Extraction Collaborator — uploaded bytes to plain text.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unreadable document: {0}")]
    Unreadable(String),
}

pub trait DocumentExtractor: Send + Sync {
    fn extract_text(&self, bytes: &[u8]) -> Result<String, ExtractError>;
}

/// PDF text extraction via `pdf-extract`. Corrupt or non-PDF input surfaces
/// as `Unreadable`, which is fatal to the job.
pub struct PdfTextExtractor;

impl DocumentExtractor for PdfTextExtractor {
    fn extract_text(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| ExtractError::Unreadable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_bytes_are_unreadable() {
        let err = PdfTextExtractor
            .extract_text(b"definitely not a pdf")
            .unwrap_err();
        assert!(matches!(err, ExtractError::Unreadable(_)));
    }
}
