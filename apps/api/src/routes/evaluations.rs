use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::AppError;
use crate::jobs::{JobInput, JobRecord, JobStatus};
use crate::state::AppState;

#[derive(Serialize)]
pub struct UploadResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cv_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

/// POST /upload
/// Multipart fields `cv` and `project`; each saved file gets a document id.
pub async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut response = UploadResponse {
        cv_id: None,
        project_id: None,
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Upload(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name != "cv" && name != "project" {
            continue;
        }
        let original_name = field
            .file_name()
            .map(|f| f.to_string())
            .unwrap_or_else(|| format!("{name}.pdf"));
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Upload(e.to_string()))?;

        let saved = state
            .documents
            .save(&original_name, &bytes)
            .await
            .map_err(|e| AppError::Upload(e.to_string()))?;
        info!(document_id = %saved.id, field = %name, "stored uploaded document");

        match name.as_str() {
            "cv" => response.cv_id = Some(saved.id),
            _ => response.project_id = Some(saved.id),
        }
    }

    if response.cv_id.is_none() && response.project_id.is_none() {
        return Err(AppError::Validation(
            "multipart body must contain a 'cv' or 'project' file field".to_string(),
        ));
    }

    Ok(Json(response))
}

#[derive(Deserialize)]
pub struct EvaluateRequest {
    pub job_title: String,
    pub cv_id: String,
    pub project_id: String,
}

#[derive(Serialize)]
pub struct EvaluateResponse {
    pub id: String,
    pub status: JobStatus,
}

/// POST /evaluate
/// Creates a queued job record and places the job reference on the queue.
pub async fn handle_evaluate(
    State(state): State<AppState>,
    Json(req): Json<EvaluateRequest>,
) -> Result<(StatusCode, Json<EvaluateResponse>), AppError> {
    if req.job_title.trim().is_empty() {
        return Err(AppError::Validation("job_title must not be empty".to_string()));
    }
    if req.cv_id.trim().is_empty() || req.project_id.trim().is_empty() {
        return Err(AppError::Validation(
            "cv_id and project_id must not be empty".to_string(),
        ));
    }

    let record = JobRecord::queued(JobInput {
        job_title: req.job_title,
        cv_document_id: req.cv_id,
        project_document_id: req.project_id,
    });
    state.store.create(&record).await?;
    state.queue.enqueue(&record.id).await?;
    info!(job_id = %record.id, "evaluation job queued");

    Ok((
        StatusCode::ACCEPTED,
        Json(EvaluateResponse {
            id: record.id,
            status: record.status,
        }),
    ))
}

#[derive(Serialize)]
pub struct ResultResponse {
    pub id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<crate::jobs::PipelineStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<crate::jobs::EvaluationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /result/:id
/// Poll endpoint: status plus the result or error once terminal.
pub async fn handle_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ResultResponse>, AppError> {
    let record = state.store.get(&id).await?;

    let mut response = ResultResponse {
        id: record.id,
        status: record.status,
        step: record.step,
        result: None,
        error: None,
    };
    match record.status {
        JobStatus::Completed => response.result = record.result,
        JobStatus::Failed => response.error = record.error,
        _ => {}
    }
    Ok(Json(response))
}
