//! Pipeline Orchestrator — drives one evaluation job through its stages.
//!
//! Flow: parse_files → retrieve_cv_context → cv_scoring →
//!       retrieve_project_context → project_scoring → synthesis → done.
//!
//! The job record is written after every stage transition through the
//! store's compare-and-set contract, so a stalled-then-redelivered job can
//! never be clobbered by the slow worker that lost it. Any unrecoverable
//! error is caught once at the top level, persisted on the record, and
//! re-raised to the queue consumer.

pub mod prompts;
pub mod rubric;
pub mod structured;

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::documents::{DocumentError, DocumentSource};
use crate::embeddings::{Embedder, EmbeddingError};
use crate::extract::{DocumentExtractor, ExtractError};
use crate::jobs::{EvaluationResult, JobRecord, PipelineStep};
use crate::llm_client::{CompletionClient, LlmError};
use crate::pipeline::rubric::{
    CvAssessment, CvEvaluation, ProjectAssessment, ProjectEvaluation, SynthesisAssessment,
};
use crate::pipeline::structured::structured_call;
use crate::retrieval::{RetrievalError, Retriever, Snippet};
use crate::store::{JobStore, StoreError};

/// Snippets fetched per retrieval stage.
const TOP_K: usize = 5;

/// Only this many leading characters of the document text go into the
/// embedding query. The scoring prompt always receives the full text —
/// the truncation is a retrieval cost bound, not a scoring one.
const EMBED_QUERY_PREFIX_CHARS: usize = 2000;

const SCORING_TEMPERATURE: f32 = 0.1;
const SYNTHESIS_TEMPERATURE: f32 = 0.2;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("uploaded document missing: {0}")]
    DocumentMissing(String),

    #[error("unreadable document: {0}")]
    UnreadableDocument(String),

    #[error("document error: {0}")]
    Document(DocumentError),

    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(#[from] EmbeddingError),

    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(#[from] RetrievalError),

    #[error("llm transport failure: {0}")]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<DocumentError> for PipelineError {
    fn from(e: DocumentError) -> Self {
        match e {
            DocumentError::Missing(id) => PipelineError::DocumentMissing(id),
            other => PipelineError::Document(other),
        }
    }
}

impl From<ExtractError> for PipelineError {
    fn from(e: ExtractError) -> Self {
        match e {
            ExtractError::Unreadable(msg) => PipelineError::UnreadableDocument(msg),
        }
    }
}

pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    documents: Arc<dyn DocumentSource>,
    extractor: Arc<dyn DocumentExtractor>,
    embedder: Arc<dyn Embedder>,
    retriever: Arc<dyn Retriever>,
    llm: Arc<dyn CompletionClient>,
    collection: String,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn JobStore>,
        documents: Arc<dyn DocumentSource>,
        extractor: Arc<dyn DocumentExtractor>,
        embedder: Arc<dyn Embedder>,
        retriever: Arc<dyn Retriever>,
        llm: Arc<dyn CompletionClient>,
        collection: String,
    ) -> Self {
        Self {
            store,
            documents,
            extractor,
            embedder,
            retriever,
            llm,
            collection,
        }
    }

    /// Processes one job end-to-end. Re-running a terminal job is a no-op,
    /// which makes stalled-redelivery double-processing safe.
    pub async fn run(&self, job_id: &str) -> Result<(), PipelineError> {
        let mut record = self.store.get(job_id).await?;
        if record.status.is_terminal() {
            info!(job_id, status = %record.status, "job already terminal, skipping");
            return Ok(());
        }

        record.begin_processing();
        record = self.store.update(&record).await?;

        match self.evaluate(&mut record).await {
            Ok(result) => {
                record.complete(result);
                self.store.update(&record).await?;
                info!(job_id, "evaluation completed");
                Ok(())
            }
            Err(e) => {
                if matches!(e, PipelineError::Store(StoreError::Conflict(_))) {
                    // Another worker owns the record now; do not overwrite.
                    warn!(job_id, "lost record ownership mid-flight, abandoning attempt");
                    return Err(e);
                }
                warn!(job_id, "evaluation failed: {e}");
                record.fail(e.to_string());
                if let Err(write_err) = self.store.update(&record).await {
                    warn!(job_id, "could not persist failure: {write_err}");
                }
                Err(e)
            }
        }
    }

    async fn evaluate(&self, record: &mut JobRecord) -> Result<EvaluationResult, PipelineError> {
        // parse_files — `begin_processing` already set the step label.
        let cv_ref = self.documents.resolve(&record.input.cv_document_id).await?;
        let project_ref = self
            .documents
            .resolve(&record.input.project_document_id)
            .await?;
        let cv_bytes = self.documents.read(&cv_ref).await?;
        let project_bytes = self.documents.read(&project_ref).await?;
        let cv_text = self.extractor.extract_text(&cv_bytes)?;
        let project_text = self.extractor.extract_text(&project_bytes)?;

        // CV sub-pipeline.
        self.advance(record, PipelineStep::RetrieveCvContext).await?;
        let cv_query = format!(
            "{} {}",
            record.input.job_title,
            text_prefix(&cv_text, EMBED_QUERY_PREFIX_CHARS)
        );
        let cv_context = self.retrieve(&cv_query).await?;

        self.advance(record, PipelineStep::CvScoring).await?;
        let cv_prompt = prompts::CV_SCORING_PROMPT_TEMPLATE
            .replace("{job_title}", &record.input.job_title)
            .replace("{context}", &snippet_block(&cv_context))
            .replace("{cv_text}", &cv_text);
        let cv_parsed: Option<CvAssessment> = structured_call(
            self.llm.as_ref(),
            prompts::CV_SCORING_SYSTEM,
            cv_prompt,
            SCORING_TEMPERATURE,
        )
        .await?;
        let cv = CvEvaluation::resolve(cv_parsed);

        // Project sub-pipeline.
        self.advance(record, PipelineStep::RetrieveProjectContext)
            .await?;
        let project_query = format!(
            "{} {}",
            text_prefix(&project_text, EMBED_QUERY_PREFIX_CHARS),
            record.input.job_title
        );
        let project_context = self.retrieve(&project_query).await?;

        self.advance(record, PipelineStep::ProjectScoring).await?;
        let project_prompt = prompts::PROJECT_SCORING_PROMPT_TEMPLATE
            .replace("{context}", &snippet_block(&project_context))
            .replace("{project_text}", &project_text);
        let project_parsed: Option<ProjectAssessment> = structured_call(
            self.llm.as_ref(),
            prompts::PROJECT_SCORING_SYSTEM,
            project_prompt,
            SCORING_TEMPERATURE,
        )
        .await?;
        let project = ProjectEvaluation::resolve(project_parsed);

        // Synthesis is a strict barrier: it takes both resolved results by
        // value and cannot be constructed before they exist.
        self.advance(record, PipelineStep::Synthesis).await?;
        let synthesis = self.synthesize(&cv, &project).await?;

        self.advance(record, PipelineStep::Done).await?;

        Ok(EvaluationResult {
            cv_match_rate: cv.cv_match_rate,
            cv_feedback: cv.cv_feedback,
            project_score: project.project_score,
            project_feedback: project.project_feedback,
            overall_summary: synthesis.overall_summary,
            recommendation: synthesis.recommendation,
        })
    }

    async fn synthesize(
        &self,
        cv: &CvEvaluation,
        project: &ProjectEvaluation,
    ) -> Result<SynthesisAssessment, PipelineError> {
        let prompt = prompts::SYNTHESIS_PROMPT_TEMPLATE
            .replace(
                "{cv_json}",
                &serde_json::to_string(cv).unwrap_or_default(),
            )
            .replace(
                "{project_json}",
                &serde_json::to_string(project).unwrap_or_default(),
            );
        let parsed: Option<SynthesisAssessment> = structured_call(
            self.llm.as_ref(),
            prompts::SYNTHESIS_SYSTEM,
            prompt,
            SYNTHESIS_TEMPERATURE,
        )
        .await?;
        Ok(parsed.unwrap_or_default())
    }

    async fn retrieve(&self, query: &str) -> Result<Vec<Snippet>, PipelineError> {
        let vector = self.embedder.embed(query).await?;
        Ok(self
            .retriever
            .search(&self.collection, &vector, TOP_K)
            .await?)
    }

    async fn advance(
        &self,
        record: &mut JobRecord,
        step: PipelineStep,
    ) -> Result<(), PipelineError> {
        record.step = Some(step);
        *record = self.store.update(record).await?;
        Ok(())
    }
}

fn text_prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn snippet_block(snippets: &[Snippet]) -> String {
    snippets
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join("\n---\n")
}
