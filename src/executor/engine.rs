//! The step execution engine.
//!
//! [`Engine::execute`] drives one job through its pipeline:
//!
//! ```text
//! load ─> balance check ─┬─> no_credits
//!                        └─> admit ─> processing ─> [speech] ─┬─> video (sync) ─> completed | failed
//!                                                             └─> presign ─> submit (async) ─> awaiting callback
//! ```
//!
//! Each sub-step persists its artifact (`derived_audio_key`,
//! `external_handle`) before the next one starts, and re-entry skips any step
//! whose artifact is already stored. Calling `execute` again after a crash,
//! or while another call is running, never repeats a persisted side effect.

use super::admission::AdmissionController;
use super::claims::ClaimSet;
use super::error::{ExecutionError, Result};
use super::finalize::Finalizer;
use super::retry_helper::retry_with_policy;
use crate::core::{FailureCategory, GenerationJob, JobId, JobStatus, Mode, RetryPolicy};
use crate::gateway::{AssetStore, GatewayError, PortraitSubmission, SynthesisGateway};
use crate::storage::{Store, StorageError};
use futures::future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// How a call to [`Engine::execute`] left the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Finished inline; one credit was charged.
    Completed { output_key: String },
    /// Failed; nothing was charged.
    Failed(FailureCategory),
    /// Balance was empty at the start; the pipeline never ran.
    NoCredits,
    /// Submitted to the asynchronous provider; a callback will finish it.
    AwaitingCallback { handle: String },
    /// The job was already terminal; nothing was done.
    AlreadyTerminal(JobStatus),
    /// Another task in this process is driving the job right now.
    InProgress,
}

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Applied to every provider and storage-capability call.
    pub retry_policy: RetryPolicy,
    /// Webhook target handed to the asynchronous provider.
    pub callback_url: String,
    /// Lifetime of the read URLs handed to the asynchronous provider.
    pub read_url_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::STANDARD,
            callback_url: "http://localhost:3000/webhooks/portrait-avatar".to_string(),
            read_url_ttl: Duration::from_secs(3600),
        }
    }
}

/// Category persisted when a step fails with `error`.
fn categorize(error: &GatewayError, step: FailureCategory) -> FailureCategory {
    match error {
        GatewayError::Malformed(_) => FailureCategory::MalformedResponse,
        GatewayError::Provider(_) => FailureCategory::ProviderFailed,
        _ => step,
    }
}

/// Drives generation jobs to a terminal or awaiting-callback state.
pub struct Engine<S: Store> {
    store: Arc<S>,
    gateway: Arc<dyn SynthesisGateway>,
    assets: Arc<dyn AssetStore>,
    admission: Arc<AdmissionController>,
    finalizer: Finalizer<S>,
    claims: ClaimSet,
    config: EngineConfig,
}

impl<S: Store> Engine<S> {
    pub fn new(
        store: Arc<S>,
        gateway: Arc<dyn SynthesisGateway>,
        assets: Arc<dyn AssetStore>,
        admission: Arc<AdmissionController>,
        config: EngineConfig,
    ) -> Self {
        Self {
            finalizer: Finalizer::new(store.clone(), admission.clone()),
            store,
            gateway,
            assets,
            admission,
            claims: ClaimSet::default(),
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs the job's pipeline from wherever it stopped.
    ///
    /// Step failures become the job's `failed` state and are reported as
    /// [`JobOutcome::Failed`]. `Err` means storage trouble; the job is left
    /// resumable and gives up its admission slot (or its place in line), so a
    /// stalled job never blocks its owner's later jobs. Executing it again
    /// re-admits it.
    pub async fn execute(&self, job_id: JobId) -> Result<JobOutcome> {
        let Some(_claim) = self.claims.claim(job_id) else {
            debug!(%job_id, "Job already executing in this process");
            return Ok(JobOutcome::InProgress);
        };

        let result = self
            .run(job_id)
            .instrument(info_span!("execute_job", %job_id))
            .await;

        if let Err(e) = &result {
            if self.admission.release(job_id) {
                warn!(%job_id, error = %e, "Execution interrupted; admission released");
            }
        }
        result
    }

    async fn load(&self, id: JobId) -> Result<GenerationJob> {
        self.store
            .get_job(id)
            .await?
            .ok_or(ExecutionError::JobNotFound(id))
    }

    async fn run(&self, job_id: JobId) -> Result<JobOutcome> {
        let job = self.load(job_id).await?;

        match job.status() {
            JobStatus::Queued => self.start(job).await,
            JobStatus::Processing => self.resume(job).await,
            status => {
                debug!(%status, "Job already terminal");
                self.admission.release(job_id);
                Ok(JobOutcome::AlreadyTerminal(status))
            }
        }
    }

    /// `queued` -> `no_credits` | `processing`.
    async fn start(&self, job: GenerationJob) -> Result<JobOutcome> {
        let id = job.id();
        let owner = job.owner_id();

        let balance = self.store.check_balance(owner).await?;
        if balance <= 0 {
            if self
                .store
                .transition(id, JobStatus::Queued, JobStatus::NoCredits, None)
                .await?
            {
                info!(%owner, balance, "Insufficient balance; job marked no_credits");
                self.admission.release(id);
                return Ok(JobOutcome::NoCredits);
            }
            return self.settle(id).await;
        }

        if !self.admission.admit(owner, id).await {
            return self.settle(id).await;
        }

        if self
            .store
            .transition(id, JobStatus::Queued, JobStatus::Processing, None)
            .await?
        {
            info!(%owner, mode = job.mode().as_str(), "Job processing");
        }

        let job = self.load(id).await?;
        if job.status() != JobStatus::Processing {
            return self.settle(id).await;
        }
        self.resume(job).await
    }

    /// Re-reads a job after losing a conditional update.
    async fn settle(&self, id: JobId) -> Result<JobOutcome> {
        let status = self.load(id).await?.status();
        if status.is_terminal() {
            self.admission.release(id);
            return Ok(JobOutcome::AlreadyTerminal(status));
        }

        warn!(job_id = %id, %status, "Conditional update lost to a concurrent writer");
        Err(ExecutionError::ConflictAbandoned(id))
    }

    /// Continues a `processing` job from its last persisted artifact.
    async fn resume(&self, mut job: GenerationJob) -> Result<JobOutcome> {
        // Re-acquires the slot after a restart; a no-op when already held.
        if !self.admission.admit(job.owner_id(), job.id()).await {
            return self.settle(job.id()).await;
        }

        if job.needs_speech_synthesis() {
            match self.synthesize_speech(&job).await? {
                Ok(updated) => job = updated,
                Err(outcome) => return Ok(outcome),
            }
        }

        let Some(audio_key) = job.driving_audio_key().map(str::to_owned) else {
            error!("Processing job has no driving audio");
            return self
                .finalizer
                .fail(&job, FailureCategory::SpeechSynthesis)
                .await;
        };

        match job.mode() {
            Mode::Standard => self.run_sync_branch(&job, &audio_key).await,
            Mode::Experimental => self.run_async_branch(&job, &audio_key).await,
        }
    }

    /// Synthesizes and persists speech. `Ok(Err(_))` is a terminal outcome.
    async fn synthesize_speech(
        &self,
        job: &GenerationJob,
    ) -> Result<std::result::Result<GenerationJob, JobOutcome>> {
        let script = job.script().unwrap_or_default();
        let voice = job.voice_key();

        let audio_key = match retry_with_policy("synthesize_speech", self.config.retry_policy, |_| {
            self.gateway.synthesize_speech(script, voice)
        })
        .await
        {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "Speech synthesis failed");
                let category = categorize(&e, FailureCategory::SpeechSynthesis);
                return Ok(Err(self.finalizer.fail(job, category).await?));
            }
        };

        if self.store.record_derived_audio(job.id(), &audio_key).await? {
            debug!(%audio_key, "Derived audio recorded");
        }

        // Either ours or a concurrent writer's; the stored value wins.
        let job = self.load(job.id()).await?;
        if job.status() != JobStatus::Processing || job.derived_audio_key().is_none() {
            return self.settle(job.id()).await.map(Err);
        }
        Ok(Ok(job))
    }

    async fn run_sync_branch(&self, job: &GenerationJob, audio_key: &str) -> Result<JobOutcome> {
        // Audio-driven jobs have no script; the provider gets an empty transcript.
        let transcript = job.script().unwrap_or_default();
        let photo_key = job.photo_key();

        let result = retry_with_policy("synthesize_video", self.config.retry_policy, |_| {
            self.gateway
                .synthesize_video(transcript, photo_key, audio_key)
        })
        .await;

        match result {
            Ok(video_key) => self.finalizer.complete(job, &video_key).await,
            Err(e) => {
                warn!(error = %e, "Video synthesis failed");
                let category = categorize(&e, FailureCategory::VideoSynthesis);
                self.finalizer.fail(job, category).await
            }
        }
    }

    async fn run_async_branch(&self, job: &GenerationJob, audio_key: &str) -> Result<JobOutcome> {
        if let Some(handle) = job.external_handle() {
            debug!(handle, "Already submitted; awaiting callback");
            return Ok(JobOutcome::AwaitingCallback {
                handle: handle.to_string(),
            });
        }

        let policy = self.config.retry_policy;
        let ttl = self.config.read_url_ttl;
        let photo_key = job.photo_key();

        // Independent of each other; issued concurrently.
        let urls = future::try_join(
            retry_with_policy("presign_photo", policy, |_| {
                self.assets.read_url(photo_key, ttl)
            }),
            retry_with_policy("presign_audio", policy, |_| {
                self.assets.read_url(audio_key, ttl)
            }),
        )
        .await;

        let (photo_url, audio_url) = match urls {
            Ok(urls) => urls,
            Err(e) => {
                warn!(error = %e, "Read URL issuance failed");
                let category = categorize(&e, FailureCategory::Presign);
                return self.finalizer.fail(job, category).await;
            }
        };

        let submission = PortraitSubmission {
            photo_url,
            audio_url,
            enhancement: job.enhancement(),
            callback_url: self.config.callback_url.clone(),
        };

        let handle = match retry_with_policy("submit_portrait_job", policy, |_| {
            self.gateway.submit_portrait_job(&submission)
        })
        .await
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "Async submission failed");
                let category = categorize(&e, FailureCategory::AsyncSubmission);
                return self.finalizer.fail(job, category).await;
            }
        };

        match self.store.record_external_handle(job.id(), &handle).await {
            Ok(true) => {
                info!(%handle, "Submitted to async provider; awaiting callback");
                Ok(JobOutcome::AwaitingCallback { handle })
            }
            Ok(false) => {
                let current = self.load(job.id()).await?;
                match current.external_handle() {
                    Some(existing) if current.status() == JobStatus::Processing => {
                        warn!(
                            orphaned = %handle,
                            handle = existing,
                            "Concurrent submission already recorded a handle"
                        );
                        Ok(JobOutcome::AwaitingCallback {
                            handle: existing.to_string(),
                        })
                    }
                    _ => self.settle(job.id()).await,
                }
            }
            Err(StorageError::HandleConflict { holder, .. }) => {
                error!(%handle, %holder, "Provider returned a handle owned by another job");
                self.finalizer
                    .fail(job, FailureCategory::MalformedResponse)
                    .await
            }
            Err(e) => Err(e.into()),
        }
    }
}
