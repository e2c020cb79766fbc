use super::error::ApiError;
use super::AppState;
use crate::core::JobStatus;
use crate::executor::{CallbackOutcome, JobOutcome};
use crate::storage::Store;
use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

/// Webhook target of the asynchronous portrait-avatar provider.
///
/// The body is read raw: envelope problems are answered as 400 by the
/// correlator instead of by the JSON extractor.
///
/// A duplicate delivery that arrives while the first is still being handled
/// is answered 409: the first may yet fail, so the provider must not treat
/// the duplicate as acknowledged.
pub(super) async fn portrait_avatar<S: Store>(
    State(state): State<AppState<S>>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let outcome = state.correlator.handle_payload(&body).await?;

    let body = match outcome {
        CallbackOutcome::Applied { job_id, outcome } => match outcome {
            JobOutcome::Completed { output_key } => json!({
                "message": "Webhook processed",
                "job_id": job_id,
                "status": JobStatus::Completed,
                "output_key": output_key,
            }),
            JobOutcome::Failed(category) => json!({
                "message": "Webhook processed",
                "job_id": job_id,
                "status": JobStatus::Failed,
                "failure": category,
            }),
            _ => json!({ "message": "Webhook processed", "job_id": job_id }),
        },
        CallbackOutcome::Ignored { job_id, status } => json!({
            "message": "Status ignored",
            "job_id": job_id,
            "status": status,
        }),
        CallbackOutcome::AlreadyProcessed { job_id, status } => json!({
            "message": "Already processed",
            "job_id": job_id,
            "status": status,
        }),
        CallbackOutcome::InProgress { job_id } => {
            let body = json!({
                "message": "Already being processed",
                "job_id": job_id,
            });
            return Ok((StatusCode::CONFLICT, Json(body)));
        }
    };

    Ok((StatusCode::OK, Json(body)))
}
