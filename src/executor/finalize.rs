//! Terminal transitions shared by the engine and the callback correlator.
//!
//! Completion order: debit first, then the conditional `processing ->
//! completed` write. A debit failure therefore never leaves a job marked
//! completed. If the completion write loses to a concurrent writer that
//! already moved the job to `failed`, the debit is refunded.

use super::admission::AdmissionController;
use super::engine::JobOutcome;
use super::error::{ExecutionError, Result};
use crate::core::{FailureCategory, GenerationJob, JobId, JobStatus};
use crate::storage::{Debit, Store};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub(crate) struct Finalizer<S> {
    store: Arc<S>,
    admission: Arc<AdmissionController>,
}

impl<S: Store> Finalizer<S> {
    pub(crate) fn new(store: Arc<S>, admission: Arc<AdmissionController>) -> Self {
        Self { store, admission }
    }

    async fn reload(&self, id: JobId) -> Result<GenerationJob> {
        self.store
            .get_job(id)
            .await?
            .ok_or(ExecutionError::JobNotFound(id))
    }

    /// Charges one credit and moves the job to `completed` with `output_key`.
    pub(crate) async fn complete(&self, job: &GenerationJob, output_key: &str) -> Result<JobOutcome> {
        let id = job.id();
        let owner = job.owner_id();

        match self.store.debit_one(owner, id).await? {
            Debit::Charged { remaining } => {
                debug!(job_id = %id, %owner, remaining, "Credit debited");
            }
            Debit::AlreadyCharged => {
                debug!(job_id = %id, %owner, "Credit already debited by an earlier attempt");
            }
            Debit::InsufficientBalance => {
                warn!(job_id = %id, %owner, "Balance exhausted before completion");
                return self.fail(job, FailureCategory::InsufficientCredits).await;
            }
        }

        // The loser of a conditional update retries it once.
        for _ in 0..2 {
            if self.store.complete_job(id, output_key).await? {
                self.admission.release(id);
                info!(job_id = %id, %owner, output_key, "Job completed");
                return Ok(JobOutcome::Completed {
                    output_key: output_key.to_string(),
                });
            }

            let current = self.reload(id).await?;
            match current.status() {
                JobStatus::Completed => {
                    // The other writer shares the job-keyed charge taken above.
                    self.admission.release(id);
                    return Ok(JobOutcome::AlreadyTerminal(JobStatus::Completed));
                }
                status if status.is_terminal() => {
                    self.admission.release(id);
                    if self.store.refund(owner, id).await? {
                        warn!(job_id = %id, %owner, %status, "Completion lost to a terminal write; credit refunded");
                    }
                    return Ok(JobOutcome::AlreadyTerminal(status));
                }
                _ => {}
            }
        }

        error!(job_id = %id, "Completion abandoned after repeated conflicts");
        Err(ExecutionError::ConflictAbandoned(id))
    }

    /// Moves the job to `failed` with `category`. No credit stays charged.
    pub(crate) async fn fail(&self, job: &GenerationJob, category: FailureCategory) -> Result<JobOutcome> {
        let id = job.id();

        for _ in 0..2 {
            if self
                .store
                .transition(id, JobStatus::Processing, JobStatus::Failed, Some(category))
                .await?
            {
                self.admission.release(id);
                if self.store.refund(job.owner_id(), id).await? {
                    warn!(job_id = %id, owner = %job.owner_id(), "Charged job failed; credit refunded");
                }
                warn!(job_id = %id, owner = %job.owner_id(), %category, "Job failed");
                return Ok(JobOutcome::Failed(category));
            }

            let status = self.reload(id).await?.status();
            if status.is_terminal() {
                self.admission.release(id);
                return Ok(JobOutcome::AlreadyTerminal(status));
            }
        }

        error!(job_id = %id, %category, "Failure transition abandoned after repeated conflicts");
        Err(ExecutionError::ConflictAbandoned(id))
    }
}
