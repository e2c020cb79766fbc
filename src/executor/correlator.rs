//! Completion of asynchronous jobs from provider webhooks.
//!
//! Callbacks are correlated through the `external_handle` column, so any
//! process sharing the store can service a callback for a job submitted by
//! another. A callback may race the persistence of its own handle; unknown
//! handles are looked up again for a short grace period before being rejected.

use super::admission::AdmissionController;
use super::claims::ClaimSet;
use super::engine::JobOutcome;
use super::error::{CallbackError, ExecutionError};
use super::finalize::Finalizer;
use super::retry_helper::retry_with_policy;
use crate::core::{FailureCategory, GenerationJob, JobId, JobStatus, RetryPolicy};
use crate::gateway::{AssetStore, CallbackNotice, ProviderOutcome};
use crate::storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// Default time an unknown handle is looked up again before it is rejected.
pub const DEFAULT_UNKNOWN_HANDLE_GRACE: Duration = Duration::from_millis(2000);

const LOOKUP_INTERVAL: Duration = Duration::from_millis(100);

/// What a callback did to its job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The callback drove the job to a terminal state.
    Applied { job_id: JobId, outcome: JobOutcome },
    /// Informational status; the job was not touched.
    Ignored { job_id: JobId, status: String },
    /// The job was already terminal; nothing was done.
    AlreadyProcessed { job_id: JobId, status: JobStatus },
    /// A duplicate of this callback is being handled right now.
    InProgress { job_id: JobId },
}

pub struct CallbackCorrelator<S: Store> {
    store: Arc<S>,
    assets: Arc<dyn AssetStore>,
    finalizer: Finalizer<S>,
    claims: ClaimSet,
    retry_policy: RetryPolicy,
    grace: Duration,
}

impl<S: Store> CallbackCorrelator<S> {
    pub fn new(
        store: Arc<S>,
        assets: Arc<dyn AssetStore>,
        admission: Arc<AdmissionController>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            finalizer: Finalizer::new(store.clone(), admission),
            store,
            assets,
            claims: ClaimSet::default(),
            retry_policy,
            grace: DEFAULT_UNKNOWN_HANDLE_GRACE,
        }
    }

    /// Sets how long an unknown handle is looked up again before rejection.
    pub fn with_unknown_handle_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Parses a raw webhook body and handles it.
    pub async fn handle_payload(&self, raw: &[u8]) -> Result<CallbackOutcome, CallbackError> {
        let notice = CallbackNotice::parse(raw)?;
        self.handle_callback(notice).await
    }

    /// Drives the job holding `notice.handle` according to the provider's outcome.
    pub async fn handle_callback(
        &self,
        notice: CallbackNotice,
    ) -> Result<CallbackOutcome, CallbackError> {
        let span = info_span!("handle_callback", handle = %notice.handle);
        self.process(notice).instrument(span).await
    }

    async fn lookup(&self, handle: &str) -> Result<GenerationJob, CallbackError> {
        let deadline = Instant::now() + self.grace;
        loop {
            if let Some(job) = self.store.find_by_external_handle(handle).await? {
                return Ok(job);
            }

            let now = Instant::now();
            if now >= deadline {
                warn!("Callback for unknown handle rejected");
                return Err(CallbackError::UnknownHandle(handle.to_string()));
            }
            tokio::time::sleep(LOOKUP_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn process(&self, notice: CallbackNotice) -> Result<CallbackOutcome, CallbackError> {
        let job_id = self.lookup(&notice.handle).await?.id();

        let Some(_claim) = self.claims.claim(job_id) else {
            debug!(%job_id, "Duplicate callback while the first is being handled");
            return Ok(CallbackOutcome::InProgress { job_id });
        };

        // Re-read under the claim; a concurrent duplicate may have finished it.
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(ExecutionError::JobNotFound(job_id))?;

        if job.status().is_terminal() {
            debug!(%job_id, status = %job.status(), "Callback for terminal job ignored");
            return Ok(CallbackOutcome::AlreadyProcessed {
                job_id,
                status: job.status(),
            });
        }

        let outcome = match notice.outcome {
            ProviderOutcome::Progress(status) => {
                debug!(%job_id, %status, "Informational callback ignored");
                return Ok(CallbackOutcome::Ignored { job_id, status });
            }
            ProviderOutcome::Failed(status) => {
                info!(%job_id, %status, "Provider reported failure");
                self.finalizer
                    .fail(&job, FailureCategory::ProviderFailed)
                    .await?
            }
            ProviderOutcome::Malformed(reason) => {
                warn!(%job_id, %reason, "Finished callback without a result");
                let outcome = self
                    .finalizer
                    .fail(&job, FailureCategory::MalformedResponse)
                    .await?;
                if let JobOutcome::Failed(_) = outcome {
                    return Err(CallbackError::MissingOutput { job_id, reason });
                }
                outcome
            }
            ProviderOutcome::Finished { video_url } => {
                let imported = retry_with_policy("import_remote_asset", self.retry_policy, |_| {
                    self.assets.import_remote_asset(&video_url)
                })
                .await;

                match imported {
                    Ok(output_key) => self.finalizer.complete(&job, &output_key).await?,
                    Err(source) => {
                        warn!(%job_id, error = %source, "Result import failed");
                        let outcome = self
                            .finalizer
                            .fail(&job, FailureCategory::ImportFailed)
                            .await?;
                        if let JobOutcome::Failed(_) = outcome {
                            return Err(CallbackError::ImportFailed { job_id, source });
                        }
                        outcome
                    }
                }
            }
        };

        Ok(match outcome {
            JobOutcome::AlreadyTerminal(status) => CallbackOutcome::AlreadyProcessed { job_id, status },
            outcome => CallbackOutcome::Applied { job_id, outcome },
        })
    }
}
