use crate::core::{CoreError, JobId, RetryableError};
use thiserror::Error;

/// Storage layer error type.
///
/// Wraps the underlying database errors while keeping the domain conflicts
/// (duplicate ids, handle collisions) distinguishable for callers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// A database operation failed.
    #[cfg(feature = "sqlite")]
    #[error("database operation failed: {0}")]
    Database(#[from] sqlx::Error),

    /// A persisted value could not be parsed back into a domain type.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Failed to open or configure the backing store.
    #[error("connection error: {0}")]
    Connection(String),

    /// A persisted column held a value that cannot be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// The requested job was not found in storage.
    #[error("job not found: id={0}")]
    JobNotFound(JobId),

    /// A job with this id already exists.
    #[error("job already exists: id={0}")]
    DuplicateJob(JobId),

    /// The external handle is already held by a different job.
    #[error("external handle {handle} already belongs to job {holder}")]
    HandleConflict { handle: String, holder: JobId },
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl RetryableError for StorageError {
    fn is_retryable(&self) -> bool {
        match self {
            #[cfg(feature = "sqlite")]
            StorageError::Database(err) => match err {
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => true,
                // SQLITE_BUSY, SQLITE_LOCKED
                sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("5") | Some("6")),
                _ => false,
            },
            StorageError::Connection(_) => true,
            _ => false,
        }
    }
}
