use crate::core::{CoreError, JobId, RetryableError};
use crate::gateway::GatewayError;
use crate::storage::StorageError;
use thiserror::Error;

/// Execution layer error type.
///
/// Ordinary job-processing failures never surface here: they are converted
/// into the job's `failed` state. What remains is infrastructure trouble
/// (storage unreachable) and requests that name a job that does not exist.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecutionError {
    /// A storage operation failed. The job stays resumable.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The submission failed validation.
    #[error("invalid submission: {0}")]
    Invalid(#[from] CoreError),

    /// No job with this id exists.
    #[error("job not found: id={0}")]
    JobNotFound(JobId),

    /// A conditional update kept losing to a concurrent writer and was abandoned.
    #[error("conflicting update on job {0} abandoned")]
    ConflictAbandoned(JobId),

    /// The worker is no longer accepting jobs.
    #[error("job queue closed")]
    QueueClosed,
}

pub type Result<T> = std::result::Result<T, ExecutionError>;

/// Whether executing the job again may get further.
impl RetryableError for ExecutionError {
    fn is_retryable(&self) -> bool {
        match self {
            ExecutionError::Storage(e) => e.is_retryable(),
            ExecutionError::ConflictAbandoned(_) => true,
            _ => false,
        }
    }
}

/// Errors reported back to the provider that posted a webhook.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CallbackError {
    /// The envelope could not be understood at all.
    #[error("malformed callback: {0}")]
    Malformed(String),

    /// No job holds this external handle, even after the grace period.
    #[error("no job holds external handle {0}")]
    UnknownHandle(String),

    /// A `finished` callback carried no result location. The job was failed.
    #[error("callback for job {job_id} has no result: {reason}")]
    MissingOutput { job_id: JobId, reason: String },

    /// Copying the result into storage failed. The job was failed.
    #[error("importing result for job {job_id} failed: {source}")]
    ImportFailed {
        job_id: JobId,
        #[source]
        source: GatewayError,
    },

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl From<StorageError> for CallbackError {
    fn from(e: StorageError) -> Self {
        CallbackError::Execution(ExecutionError::Storage(e))
    }
}

impl From<GatewayError> for CallbackError {
    fn from(e: GatewayError) -> Self {
        CallbackError::Malformed(e.to_string())
    }
}
