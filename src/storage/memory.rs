use super::{error::Result, error::StorageError, CreditLedger, Debit, JobStore};
use crate::core::{FailureCategory, GenerationJob, JobId, JobStatus, OwnerId};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// In-memory job store and credit ledger using DashMap for concurrent access.
///
/// DashMap shards its locks, so conditional updates on different jobs never
/// contend while updates on the same job serialize on that job's shard. This
/// makes the compare-and-set semantics of [`JobStore`] hold across tasks.
///
/// Lock order is always `handles` before `jobs`, and `charges` before
/// `balances`; no method holds locks from both pairs.
///
/// Only suitable for single-process deployments and tests; nothing survives
/// a restart.
pub struct InMemoryJobStore {
    /// Job records keyed by job id
    jobs: DashMap<JobId, GenerationJob>,
    /// Secondary index: external handle -> job id
    handles: DashMap<String, JobId>,
    /// Credit balances keyed by owner
    balances: DashMap<OwnerId, i64>,
    /// Debits taken, keyed by the job they paid for
    charges: DashMap<JobId, OwnerId>,
}

impl InMemoryJobStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
            handles: DashMap::new(),
            balances: DashMap::new(),
            charges: DashMap::new(),
        }
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert_job(&self, job: &GenerationJob) -> Result<()> {
        match self.jobs.entry(job.id()) {
            Entry::Occupied(_) => Err(StorageError::DuplicateJob(job.id())),
            Entry::Vacant(slot) => {
                slot.insert(job.clone());
                Ok(())
            }
        }
    }

    async fn get_job(&self, id: JobId) -> Result<Option<GenerationJob>> {
        Ok(self.jobs.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_by_external_handle(&self, handle: &str) -> Result<Option<GenerationJob>> {
        let Some(id) = self.handles.get(handle).map(|entry| *entry.value()) else {
            return Ok(None);
        };
        self.get_job(id).await
    }

    async fn list_jobs_for_owner(&self, owner: &OwnerId) -> Result<Vec<GenerationJob>> {
        let mut jobs: Vec<GenerationJob> = self
            .jobs
            .iter()
            .filter(|entry| entry.value().owner_id() == owner)
            .map(|entry| entry.value().clone())
            .collect();

        jobs.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(jobs)
    }

    async fn get_incomplete_jobs(&self) -> Result<Vec<GenerationJob>> {
        let mut jobs: Vec<GenerationJob> = self
            .jobs
            .iter()
            .filter(|entry| !entry.value().status().is_terminal())
            .map(|entry| entry.value().clone())
            .collect();

        jobs.sort_by_key(|job| job.created_at());
        Ok(jobs)
    }

    async fn transition(
        &self,
        id: JobId,
        from: JobStatus,
        to: JobStatus,
        failure: Option<FailureCategory>,
    ) -> Result<bool> {
        from.check_transition(to)?;

        let mut job = self.jobs.get_mut(&id).ok_or(StorageError::JobNotFound(id))?;
        if job.status != from {
            return Ok(false);
        }
        job.status = to;
        if to == JobStatus::Failed {
            job.failure = failure;
        }
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn record_derived_audio(&self, id: JobId, audio_key: &str) -> Result<bool> {
        let mut job = self.jobs.get_mut(&id).ok_or(StorageError::JobNotFound(id))?;
        if job.status != JobStatus::Processing || job.derived_audio_key.is_some() {
            return Ok(false);
        }
        job.derived_audio_key = Some(audio_key.to_string());
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn record_external_handle(&self, id: JobId, handle: &str) -> Result<bool> {
        match self.handles.entry(handle.to_string()) {
            Entry::Occupied(existing) => {
                let holder = *existing.get();
                if holder != id {
                    return Err(StorageError::HandleConflict {
                        handle: handle.to_string(),
                        holder,
                    });
                }
                // Already recorded for this job
                Ok(false)
            }
            Entry::Vacant(slot) => {
                let mut job = self.jobs.get_mut(&id).ok_or(StorageError::JobNotFound(id))?;
                if job.status != JobStatus::Processing || job.external_handle.is_some() {
                    return Ok(false);
                }
                job.external_handle = Some(handle.to_string());
                job.updated_at = Utc::now();
                slot.insert(id);
                Ok(true)
            }
        }
    }

    async fn complete_job(&self, id: JobId, output_key: &str) -> Result<bool> {
        let mut job = self.jobs.get_mut(&id).ok_or(StorageError::JobNotFound(id))?;
        if job.status != JobStatus::Processing {
            return Ok(false);
        }
        job.status = JobStatus::Completed;
        job.output_key = Some(output_key.to_string());
        job.updated_at = Utc::now();
        Ok(true)
    }
}

#[async_trait]
impl CreditLedger for InMemoryJobStore {
    async fn check_balance(&self, owner: &OwnerId) -> Result<i64> {
        Ok(self.balances.get(owner).map(|b| *b.value()).unwrap_or(0))
    }

    async fn debit_one(&self, owner: &OwnerId, job: JobId) -> Result<Debit> {
        match self.charges.entry(job) {
            Entry::Occupied(_) => Ok(Debit::AlreadyCharged),
            Entry::Vacant(slot) => {
                let remaining = {
                    let Some(mut balance) = self.balances.get_mut(owner) else {
                        return Ok(Debit::InsufficientBalance);
                    };
                    if *balance <= 0 {
                        return Ok(Debit::InsufficientBalance);
                    }
                    *balance -= 1;
                    *balance
                };
                slot.insert(owner.clone());
                Ok(Debit::Charged { remaining })
            }
        }
    }

    async fn refund(&self, owner: &OwnerId, job: JobId) -> Result<bool> {
        if self.charges.remove_if(&job, |_, charged| charged == owner).is_none() {
            return Ok(false);
        }
        *self.balances.entry(owner.clone()).or_insert(0) += 1;
        Ok(true)
    }

    async fn is_charged(&self, job: JobId) -> Result<bool> {
        Ok(self.charges.contains_key(&job))
    }

    async fn grant(&self, owner: &OwnerId, amount: i64) -> Result<i64> {
        let mut balance = self.balances.entry(owner.clone()).or_insert(0);
        *balance += amount;
        Ok(*balance)
    }
}
