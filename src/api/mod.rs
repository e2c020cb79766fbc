//! HTTP boundary.
//!
//! | Route | |
//! |---|---|
//! | `POST /jobs` | submit a generation job (202 with the queued record) |
//! | `GET /jobs/{id}` | job status, failure category and output key |
//! | `GET /owners/{owner_id}/jobs` | an owner's jobs, newest first |
//! | `POST /uploads` | presigned upload URL and storage key for an input file |
//! | `POST /webhooks/portrait-avatar` | asynchronous provider callbacks |
//! | `GET /health` | liveness |
//!
//! Callback responses: 200 when processed or a no-op, 400 for a malformed
//! envelope or unknown handle, 500 when importing the result failed.

use crate::executor::{CallbackCorrelator, JobScheduler};
use crate::gateway::AssetStore;
use crate::storage::Store;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

mod callbacks;
mod error;
mod jobs;

pub use error::ApiError;
pub use jobs::JobView;

/// Default lifetime of presigned upload URLs.
pub const DEFAULT_UPLOAD_URL_TTL: Duration = Duration::from_secs(600);

/// Shared state of the HTTP handlers.
pub struct AppState<S: Store> {
    pub scheduler: JobScheduler<S>,
    pub correlator: Arc<CallbackCorrelator<S>>,
    pub assets: Arc<dyn AssetStore>,
    pub upload_url_ttl: Duration,
}

impl<S: Store> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            scheduler: self.scheduler.clone(),
            correlator: self.correlator.clone(),
            assets: self.assets.clone(),
            upload_url_ttl: self.upload_url_ttl,
        }
    }
}

/// Builds the application router.
pub fn router<S: Store>(state: AppState<S>) -> Router {
    Router::new()
        .route("/health", get(jobs::health_check))
        .route("/jobs", post(jobs::submit_job::<S>))
        .route("/jobs/{id}", get(jobs::get_job::<S>))
        .route("/owners/{owner_id}/jobs", get(jobs::list_owner_jobs::<S>))
        .route("/uploads", post(jobs::create_upload::<S>))
        .route(
            "/webhooks/portrait-avatar",
            post(callbacks::portrait_avatar::<S>),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
