//! Job Record — the durable state of one evaluation request.
//!
//! The record is the single source of truth a caller can poll. Status only
//! moves forward (`queued → processing → completed | failed`) and exactly one
//! of `result` / `error` is set once the record leaves `processing`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Observability label for the pipeline stage currently running.
/// Present only while `status = processing`; never used to resume a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    ParseFiles,
    RetrieveCvContext,
    CvScoring,
    RetrieveProjectContext,
    ProjectScoring,
    Synthesis,
    Done,
}

impl std::fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PipelineStep::ParseFiles => "parse_files",
            PipelineStep::RetrieveCvContext => "retrieve_cv_context",
            PipelineStep::CvScoring => "cv_scoring",
            PipelineStep::RetrieveProjectContext => "retrieve_project_context",
            PipelineStep::ProjectScoring => "project_scoring",
            PipelineStep::Synthesis => "synthesis",
            PipelineStep::Done => "done",
        };
        f.write_str(label)
    }
}

/// Immutable evaluation input, set once when the job is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInput {
    pub job_title: String,
    pub cv_document_id: String,
    pub project_document_id: String,
}

/// Final structured score, present only on completed jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Weighted CV rubric score normalized to [0, 1].
    pub cv_match_rate: f64,
    pub cv_feedback: String,
    /// Weighted project rubric score in [1, 5]; 0 when the scoring output
    /// was unusable and the stage degraded to defaults.
    pub project_score: f64,
    pub project_feedback: String,
    pub overall_summary: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<PipelineStep>,
    pub input: JobInput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<EvaluationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Monotonic revision bumped by every store write; basis for the store's
    /// compare-and-set contract.
    pub revision: u64,
}

impl JobRecord {
    /// Creates a fresh queued record with a collision-resistant id.
    pub fn queued(input: JobInput) -> Self {
        Self {
            id: new_job_id(),
            status: JobStatus::Queued,
            step: None,
            input,
            result: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
            revision: 0,
        }
    }

    pub fn begin_processing(&mut self) {
        self.status = JobStatus::Processing;
        self.step = Some(PipelineStep::ParseFiles);
    }

    pub fn complete(&mut self, result: EvaluationResult) {
        self.status = JobStatus::Completed;
        self.step = None;
        self.result = Some(result);
        self.error = None;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.step = None;
        self.result = None;
        self.error = Some(message.into());
        self.completed_at = Some(Utc::now());
    }
}

fn new_job_id() -> String {
    format!("job_{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input() -> JobInput {
        JobInput {
            job_title: "Backend Engineer".to_string(),
            cv_document_id: "cv1".to_string(),
            project_document_id: "proj1".to_string(),
        }
    }

    #[test]
    fn test_new_record_is_queued_without_result_or_error() {
        let record = JobRecord::queued(sample_input());
        assert_eq!(record.status, JobStatus::Queued);
        assert!(record.id.starts_with("job_"));
        assert!(record.step.is_none());
        assert!(record.result.is_none());
        assert!(record.error.is_none());
        assert!(record.completed_at.is_none());
    }

    #[test]
    fn test_complete_clears_error_and_stamps_completed_at() {
        let mut record = JobRecord::queued(sample_input());
        record.begin_processing();
        record.complete(EvaluationResult {
            cv_match_rate: 0.86,
            cv_feedback: "Strong backend profile".to_string(),
            project_score: 4.2,
            project_feedback: "Solid".to_string(),
            overall_summary: "Good candidate".to_string(),
            recommendation: "Interview".to_string(),
        });
        assert_eq!(record.status, JobStatus::Completed);
        assert!(record.result.is_some());
        assert!(record.error.is_none());
        assert!(record.completed_at.is_some());
    }

    #[test]
    fn test_fail_clears_result() {
        let mut record = JobRecord::queued(sample_input());
        record.begin_processing();
        record.fail("uploaded files missing");
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.result.is_none());
        assert_eq!(record.error.as_deref(), Some("uploaded files missing"));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let record = JobRecord::queued(sample_input());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "queued");
        // absent optional fields are omitted entirely
        assert!(json.get("result").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_step_labels_match_wire_format() {
        assert_eq!(PipelineStep::RetrieveCvContext.to_string(), "retrieve_cv_context");
        assert_eq!(
            serde_json::to_value(PipelineStep::ParseFiles).unwrap(),
            "parse_files"
        );
    }
}
