//! Job submission.
//!
//! The scheduler validates a request, persists it as a `queued` job, reserves
//! its place in the owner's admission line and hands its id to the worker
//! queue. Reserving here, before any execution task starts, is what makes
//! admission follow submission order.

use super::admission::AdmissionController;
use super::error::{ExecutionError, Result};
use crate::core::{GenerationJob, JobId, JobRequest};
use crate::storage::Store;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Submits generation jobs for execution by a [`Worker`](super::Worker).
///
/// # Example
///
/// ```
/// use eikon::core::JobRequest;
/// use eikon::executor::{AdmissionController, JobScheduler};
/// use eikon::storage::InMemoryJobStore;
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (sender, mut receiver) = mpsc::channel(16);
/// let scheduler = JobScheduler::new(
///     Arc::new(InMemoryJobStore::new()),
///     Arc::new(AdmissionController::default()),
///     sender,
/// );
///
/// let job = scheduler
///     .submit_job(JobRequest {
///         owner_id: "user-1".into(),
///         photo_key: "ptv/face.png".to_string(),
///         script: Some("Hello there".to_string()),
///         audio_key: None,
///         voice_key: None,
///         mode: Default::default(),
///         enhancement: true,
///     })
///     .await?;
///
/// assert_eq!(receiver.recv().await, Some(job.id()));
/// # Ok(())
/// # }
/// ```
pub struct JobScheduler<S: Store> {
    store: Arc<S>,
    admission: Arc<AdmissionController>,
    queue: mpsc::Sender<JobId>,
}

impl<S: Store> JobScheduler<S> {
    pub fn new(
        store: Arc<S>,
        admission: Arc<AdmissionController>,
        queue: mpsc::Sender<JobId>,
    ) -> Self {
        Self {
            store,
            admission,
            queue,
        }
    }

    /// Validates and persists a job, then enqueues it.
    ///
    /// # Errors
    ///
    /// - [`ExecutionError::Invalid`] if the request is malformed (nothing stored)
    /// - [`ExecutionError::Storage`] if the insert fails
    /// - [`ExecutionError::QueueClosed`] if no worker is listening. The job is
    ///   stored as `queued` and is picked up by the next worker's recovery.
    pub async fn submit_job(&self, request: JobRequest) -> Result<GenerationJob> {
        let job = request.into_job()?;
        self.store.insert_job(&job).await?;
        self.admission.reserve(job.owner_id(), job.id());

        info!(
            job_id = %job.id(),
            owner = %job.owner_id(),
            mode = job.mode().as_str(),
            "Job submitted"
        );

        if self.queue.send(job.id()).await.is_err() {
            self.admission.release(job.id());
            return Err(ExecutionError::QueueClosed);
        }

        Ok(job)
    }

    /// Returns a reference to the underlying storage.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

impl<S: Store> Clone for JobScheduler<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            admission: self.admission.clone(),
            queue: self.queue.clone(),
        }
    }
}
