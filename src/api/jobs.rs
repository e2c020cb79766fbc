use super::error::ApiError;
use super::AppState;
use crate::core::{FailureCategory, GenerationJob, JobId, JobRequest, JobStatus, Mode, OwnerId};
use crate::gateway::UploadPurpose;
use crate::storage::Store;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Public view of a job record.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobView {
    pub id: JobId,
    pub owner_id: OwnerId,
    pub status: JobStatus,
    pub failure: Option<FailureCategory>,
    pub mode: Mode,
    pub photo_key: String,
    pub output_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&GenerationJob> for JobView {
    fn from(job: &GenerationJob) -> Self {
        Self {
            id: job.id(),
            owner_id: job.owner_id().clone(),
            status: job.status(),
            failure: job.failure(),
            mode: job.mode(),
            photo_key: job.photo_key().to_string(),
            output_key: job.output_key().map(str::to_string),
            created_at: job.created_at(),
            updated_at: job.updated_at(),
        }
    }
}

pub(super) async fn submit_job<S: Store>(
    State(state): State<AppState<S>>,
    payload: Result<Json<JobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<JobView>), ApiError> {
    let Json(request) = payload?;
    let job = state.scheduler.submit_job(request).await?;
    Ok((StatusCode::ACCEPTED, Json(JobView::from(&job))))
}

pub(super) async fn get_job<S: Store>(
    State(state): State<AppState<S>>,
    Path(id): Path<JobId>,
) -> Result<Json<JobView>, ApiError> {
    match state.scheduler.store().get_job(id).await? {
        Some(job) => Ok(Json(JobView::from(&job))),
        None => Err(ApiError::NotFound(format!("Job {} not found", id))),
    }
}

pub(super) async fn list_owner_jobs<S: Store>(
    State(state): State<AppState<S>>,
    Path(owner_id): Path<String>,
) -> Result<Json<Vec<JobView>>, ApiError> {
    let jobs = state
        .scheduler
        .store()
        .list_jobs_for_owner(&OwnerId::new(owner_id))
        .await?;
    Ok(Json(jobs.iter().map(JobView::from).collect()))
}

#[derive(Debug, Deserialize)]
pub(super) struct UploadRequest {
    file_name: String,
    content_type: String,
    purpose: UploadPurpose,
}

#[derive(Debug, Serialize)]
pub(super) struct UploadTicket {
    url: String,
    key: String,
}

pub(super) async fn create_upload<S: Store>(
    State(state): State<AppState<S>>,
    payload: Result<Json<UploadRequest>, JsonRejection>,
) -> Result<Json<UploadTicket>, ApiError> {
    let Json(request) = payload?;
    if request.content_type.trim().is_empty() {
        return Err(ApiError::BadRequest("content_type is required".to_string()));
    }

    let key = request.purpose.new_key(&request.file_name);
    let url = state
        .assets
        .upload_url(&key, &request.content_type, state.upload_url_ttl)
        .await?;

    Ok(Json(UploadTicket { url, key }))
}

pub(super) async fn health_check() -> &'static str {
    "OK"
}
