//! Storage layer for the eikon orchestrator.
//!
//! This module provides trait-based interfaces for the two durable resources
//! the orchestrator mutates, with multiple backend implementations:
//!
//! - [`JobStore`]: generation job records, keyed by job id with a secondary
//!   lookup by external provider handle
//! - [`CreditLedger`]: per-owner credit balances with an atomic,
//!   job-keyed debit
//!
//! Backends:
//!
//! - [`SqliteJobStore`]: Persistent SQLite-based storage with connection pooling
//! - [`InMemoryJobStore`]: Fast in-memory storage for testing and development
//!
//! Every mutation that the state machine depends on is conditional
//! (compare-and-set on the current status), so two writers racing on the same
//! job can never both win.
//!
//! # Example
//!
//! ```
//! use eikon::storage::{CreditLedger, InMemoryJobStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryJobStore::new();
//! store.grant(&"user-1".into(), 3).await?;
//! assert_eq!(store.check_balance(&"user-1".into()).await?, 3);
//! # Ok(())
//! # }
//! ```

use crate::core::{FailureCategory, GenerationJob, JobId, JobStatus, OwnerId};
use async_trait::async_trait;

mod error;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub mod memory;

pub use error::{Result, StorageError};
pub use memory::InMemoryJobStore;

#[cfg(feature = "sqlite")]
pub use sqlite::{PoolConfig, SqliteJobStore};

/// Durable table of generation jobs.
///
/// Implementations must be thread-safe and every `bool`-returning mutation
/// must be atomic: it returns `true` only if the precondition held and the
/// write was applied, `false` if the precondition did not hold (nothing
/// written).
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a freshly created job.
    ///
    /// Returns `StorageError::DuplicateJob` if the id is already present.
    async fn insert_job(&self, job: &GenerationJob) -> Result<()>;

    /// Get a job by id.
    async fn get_job(&self, id: JobId) -> Result<Option<GenerationJob>>;

    /// Find the job currently holding an external provider handle.
    async fn find_by_external_handle(&self, handle: &str) -> Result<Option<GenerationJob>>;

    /// All jobs of one owner, newest first.
    async fn list_jobs_for_owner(&self, owner: &OwnerId) -> Result<Vec<GenerationJob>>;

    /// All jobs not yet in a terminal state, oldest first.
    async fn get_incomplete_jobs(&self) -> Result<Vec<GenerationJob>>;

    /// Compare-and-set the status from `from` to `to`.
    ///
    /// `failure` is persisted alongside a transition to `failed`.
    /// Returns `StorageError::Core` if the state machine forbids `from -> to`.
    async fn transition(
        &self,
        id: JobId,
        from: JobStatus,
        to: JobStatus,
        failure: Option<FailureCategory>,
    ) -> Result<bool>;

    /// Persist synthesized speech. Applies only while `processing` and unset.
    async fn record_derived_audio(&self, id: JobId, audio_key: &str) -> Result<bool>;

    /// Persist the external handle of an async submission.
    ///
    /// Applies only while `processing` and unset. Returns
    /// `StorageError::HandleConflict` if a different job already holds `handle`.
    async fn record_external_handle(&self, id: JobId, handle: &str) -> Result<bool>;

    /// Compare-and-set `processing -> completed`, storing the output reference
    /// in the same write.
    async fn complete_job(&self, id: JobId, output_key: &str) -> Result<bool>;
}

/// Outcome of a job-keyed debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Debit {
    /// One credit was taken for this job.
    Charged { remaining: i64 },
    /// This job was already charged; the balance was not touched.
    AlreadyCharged,
    /// The balance was zero; nothing was taken.
    InsufficientBalance,
}

/// Per-owner credit balances.
///
/// The authoritative enforcement is [`debit_one`](CreditLedger::debit_one):
/// conditional on a positive balance and keyed by job id, so a job is charged
/// at most once no matter how many times its completion is attempted.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Current balance. Unknown owners have a balance of zero.
    async fn check_balance(&self, owner: &OwnerId) -> Result<i64>;

    /// Atomically take one credit from `owner` on behalf of `job`.
    async fn debit_one(&self, owner: &OwnerId, job: JobId) -> Result<Debit>;

    /// Undo the debit taken for `job`. Returns false if there was none.
    async fn refund(&self, owner: &OwnerId, job: JobId) -> Result<bool>;

    /// Whether a debit is currently recorded for `job`.
    async fn is_charged(&self, job: JobId) -> Result<bool>;

    /// Add credits to an owner's balance, returning the new balance.
    async fn grant(&self, owner: &OwnerId, amount: i64) -> Result<i64>;
}

/// Everything the orchestrator needs from persistence.
pub trait Store: JobStore + CreditLedger + 'static {}

impl<T: JobStore + CreditLedger + 'static> Store for T {}
