//! Background worker that executes submitted jobs.
//!
//! On start the worker recovers what a previous process left behind:
//!
//! - `queued` jobs and `processing` jobs without an external handle are
//!   executed again; the engine resumes them from their last persisted step
//! - `processing` jobs holding an external handle are waiting for a callback;
//!   they only take back their admission slot
//!
//! Then it executes every job id received on its queue, each in its own task.
//! An execution that fails on transient storage trouble is driven again under
//! the worker's re-drive policy; the engine releases the job's admission slot
//! on such errors, so a stalled job never starves its owner's later jobs.
//! Shutdown aborts in-flight executions. That is safe: every step's artifact
//! is persisted before the next step starts, so recovery resumes them.

use super::engine::Engine;
use super::error::Result;
use crate::core::{JobId, JobStatus, RetryPolicy, RetryableError};
use crate::storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Ids of jobs to re-execute after a restart, oldest first.
///
/// Also re-admits jobs that are waiting for a callback so the per-owner cap
/// accounts for them until they reach a terminal state.
pub async fn recover_incomplete_jobs<S: Store>(engine: &Engine<S>) -> Result<Vec<JobId>> {
    let jobs = engine.store().get_incomplete_jobs().await?;
    let mut runnable = Vec::with_capacity(jobs.len());
    let mut awaiting = 0usize;

    for job in jobs {
        if job.status() == JobStatus::Processing && job.external_handle().is_some() {
            awaiting += 1;
            if !engine.admission().try_admit(job.owner_id(), job.id()) {
                warn!(
                    job_id = %job.id(),
                    owner = %job.owner_id(),
                    "No admission slot for job awaiting callback"
                );
            }
            continue;
        }
        // Oldest first, so recovered jobs keep their submission order.
        engine.admission().reserve(job.owner_id(), job.id());
        runnable.push(job.id());
    }

    if !runnable.is_empty() || awaiting > 0 {
        info!(
            runnable = runnable.len(),
            awaiting_callback = awaiting,
            "Recovered incomplete jobs"
        );
    }
    Ok(runnable)
}

/// Backoff between executions of a job that failed on storage trouble.
///
/// Schedule: immediate, 1s, 2s, 4s, 8s. After that the job is left for the
/// next start's recovery.
pub const DEFAULT_REDRIVE_POLICY: RetryPolicy = RetryPolicy {
    max_attempts: 5,
    initial_delay: Duration::from_secs(1),
    max_delay: Duration::from_secs(30),
    backoff_multiplier: 2.0,
    attempt_timeout: RetryPolicy::STANDARD.attempt_timeout,
};

/// Executes jobs received on a queue.
pub struct Worker<S: Store> {
    engine: Arc<Engine<S>>,
    queue: mpsc::Receiver<JobId>,
    redrive: RetryPolicy,
}

/// Handle to a running worker.
pub struct WorkerHandle {
    cancellation_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    /// Stops the worker, aborting in-flight executions, and waits for it to exit.
    pub async fn shutdown(self) {
        self.cancellation_token.cancel();
        if let Err(e) = self.handle.await {
            error!("Worker task failed: {}", e);
        }
    }

    /// Waits for the worker to exit on its own (its queue closed and drained).
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            error!("Worker task failed: {}", e);
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

fn spawn_job<S: Store>(
    active: &mut JoinSet<()>,
    engine: &Arc<Engine<S>>,
    redrive: RetryPolicy,
    job_id: JobId,
) {
    let engine = engine.clone();
    active.spawn(async move {
        let mut attempt = 1;
        loop {
            let error = match engine.execute(job_id).await {
                Ok(outcome) => {
                    debug!(%job_id, ?outcome, "Job execution returned");
                    return;
                }
                Err(e) => e,
            };

            // `attempt_timeout` is not applied here; every step bounds its own calls.
            let delay = if error.is_retryable() {
                redrive.delay_for_attempt(attempt)
            } else {
                None
            };

            match delay {
                Some(delay) => {
                    warn!(
                        %job_id,
                        attempt,
                        error = %error,
                        ?delay,
                        "Job execution failed; driving it again"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    error!(
                        %job_id,
                        attempt,
                        error = %error,
                        "Job execution failed; job left for recovery"
                    );
                    return;
                }
            }
        }
    });
}

impl<S: Store> Worker<S> {
    pub fn new(engine: Arc<Engine<S>>, queue: mpsc::Receiver<JobId>) -> Self {
        Self {
            engine,
            queue,
            redrive: DEFAULT_REDRIVE_POLICY,
        }
    }

    /// Overrides how often and how fast a failed execution is driven again.
    pub fn with_redrive_policy(mut self, redrive: RetryPolicy) -> Self {
        self.redrive = redrive;
        self
    }

    /// Starts the worker in the background.
    pub fn start(self) -> WorkerHandle {
        let cancellation_token = CancellationToken::new();
        let worker_token = cancellation_token.clone();
        let Worker {
            engine,
            mut queue,
            redrive,
        } = self;

        info!("Starting worker");

        let handle = tokio::spawn(async move {
            let mut active: JoinSet<()> = JoinSet::new();

            match recover_incomplete_jobs(&engine).await {
                Ok(ids) => {
                    for id in ids {
                        spawn_job(&mut active, &engine, redrive, id);
                    }
                }
                Err(e) => error!("Recovery of incomplete jobs failed: {}", e),
            }

            let mut queue_closed = false;
            loop {
                if queue_closed && active.is_empty() {
                    info!("Job queue closed and drained");
                    break;
                }

                tokio::select! {
                    biased;

                    _ = worker_token.cancelled() => {
                        info!(in_flight = active.len(), "Worker received shutdown signal");
                        break;
                    }

                    Some(joined) = active.join_next() => {
                        if let Err(e) = joined {
                            error!("Job task panicked or was cancelled: {}", e);
                        }
                    }

                    next = queue.recv(), if !queue_closed => match next {
                        Some(job_id) => spawn_job(&mut active, &engine, redrive, job_id),
                        None => queue_closed = true,
                    },
                }
            }

            active.shutdown().await;
        });

        WorkerHandle {
            cancellation_token,
            handle,
        }
    }
}
