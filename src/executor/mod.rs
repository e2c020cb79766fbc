//! Execution layer: admission, the step engine, callback correlation and the worker.
//!
//! - [`AdmissionController`]: per-owner FIFO concurrency cap
//! - [`Engine`]: drives a job through its pipeline, resumable at every step
//! - [`CallbackCorrelator`]: finishes asynchronous jobs from provider webhooks
//! - [`JobScheduler`] / [`Worker`]: the submission path and its executor

mod admission;
mod claims;
mod correlator;
mod engine;
mod error;
mod finalize;
mod retry_helper;
mod scheduler;
mod worker;

pub use admission::{AdmissionController, DEFAULT_MAX_ACTIVE_PER_OWNER};
pub use correlator::{CallbackCorrelator, CallbackOutcome, DEFAULT_UNKNOWN_HANDLE_GRACE};
pub use engine::{Engine, EngineConfig, JobOutcome};
pub use error::{CallbackError, ExecutionError, Result};
pub use retry_helper::{retry_with_policy, AttemptTimedOut};
pub use scheduler::JobScheduler;
pub use worker::{recover_incomplete_jobs, Worker, WorkerHandle, DEFAULT_REDRIVE_POLICY};
