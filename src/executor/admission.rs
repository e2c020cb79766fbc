//! Per-owner concurrency cap.
//!
//! Each owner gets a semaphore with `max_active` permits. A permit is tied to
//! a job id, not to the task that acquired it: it stays held while the job
//! waits for a provider callback and is released only when the job reaches a
//! terminal state, possibly by a different task than the one that admitted it.
//!
//! Waiting jobs are served in submission order. [`AdmissionController::reserve`]
//! takes a place in the owner's line synchronously, at submission time, so the
//! order does not depend on which execution task reaches
//! [`admit`](AdmissionController::admit) first. Only the job at the front of
//! the line waits on the semaphore.

use crate::core::{JobId, OwnerId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Default number of simultaneously processing jobs per owner.
pub const DEFAULT_MAX_ACTIVE_PER_OWNER: usize = 5;

struct OwnerSlots {
    semaphore: Arc<Semaphore>,
    /// Signalled whenever the front of the owner's line changes.
    turn: Notify,
}

enum Place {
    Front,
    Behind,
    Gone,
}

/// Withdraws a reservation if `admit` is dropped before it completes.
struct PlaceGuard<'a> {
    controller: &'a AdmissionController,
    job: JobId,
    armed: bool,
}

impl Drop for PlaceGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.controller.withdraw(self.job);
        }
    }
}

pub struct AdmissionController {
    max_active: usize,
    owners: DashMap<OwnerId, Arc<OwnerSlots>>,
    /// Reserved jobs waiting for a slot, in submission order.
    lines: DashMap<OwnerId, VecDeque<JobId>>,
    reserved: DashMap<JobId, OwnerId>,
    permits: DashMap<JobId, OwnedSemaphorePermit>,
}

impl AdmissionController {
    pub fn new(max_active: usize) -> Self {
        Self {
            max_active: max_active.max(1),
            owners: DashMap::new(),
            lines: DashMap::new(),
            reserved: DashMap::new(),
            permits: DashMap::new(),
        }
    }

    pub fn max_active(&self) -> usize {
        self.max_active
    }

    fn slots(&self, owner: &OwnerId) -> Arc<OwnerSlots> {
        self.owners
            .entry(owner.clone())
            .or_insert_with(|| {
                Arc::new(OwnerSlots {
                    semaphore: Arc::new(Semaphore::new(self.max_active)),
                    turn: Notify::new(),
                })
            })
            .clone()
    }

    /// Takes `job`'s place at the back of `owner`'s line.
    ///
    /// Call in submission order. A no-op for a job that is already reserved or
    /// admitted.
    pub fn reserve(&self, owner: &OwnerId, job: JobId) {
        if self.permits.contains_key(&job) {
            return;
        }
        if let Entry::Vacant(slot) = self.reserved.entry(job) {
            slot.insert(owner.clone());
            self.lines.entry(owner.clone()).or_default().push_back(job);
            debug!(%owner, job_id = %job, "Admission reserved");
        }
    }

    fn place(&self, owner: &OwnerId, job: JobId) -> Place {
        match self.lines.get(owner) {
            Some(line) if line.front() == Some(&job) => Place::Front,
            Some(line) if line.contains(&job) => Place::Behind,
            _ => Place::Gone,
        }
    }

    /// Drops `job` from its owner's line. True if it was waiting.
    fn withdraw(&self, job: JobId) -> bool {
        let Some((_, owner)) = self.reserved.remove(&job) else {
            return false;
        };
        if let Some(mut line) = self.lines.get_mut(&owner) {
            line.retain(|queued| *queued != job);
        }
        self.slots(&owner).turn.notify_waiters();
        true
    }

    /// Waits for a slot for `job`, in submission order per owner.
    ///
    /// A job that was never [`reserve`](Self::reserve)d joins the back of the
    /// line here. Idempotent: a job that already holds a permit returns `true`
    /// immediately. Returns `false` if the reservation was withdrawn by
    /// [`release`](Self::release) while waiting.
    pub async fn admit(&self, owner: &OwnerId, job: JobId) -> bool {
        if self.permits.contains_key(&job) {
            return true;
        }
        self.reserve(owner, job);

        let slots = self.slots(owner);
        let mut guard = PlaceGuard {
            controller: self,
            job,
            armed: true,
        };

        loop {
            let turn = slots.turn.notified();
            tokio::pin!(turn);
            turn.as_mut().enable();

            match self.place(owner, job) {
                Place::Front => break,
                Place::Behind => turn.await,
                Place::Gone => {
                    guard.armed = false;
                    return self.permits.contains_key(&job);
                }
            }
        }

        // Owner semaphores are never closed.
        let Ok(permit) = slots.semaphore.clone().acquire_owned().await else {
            return false;
        };
        guard.armed = false;

        if !self.withdraw(job) {
            // Released while acquiring; the permit drops here.
            return false;
        }
        self.permits.entry(job).or_insert(permit);
        debug!(%owner, job_id = %job, "Job admitted");
        true
    }

    /// Takes a slot for `job` only if one is free right now, bypassing the line.
    pub fn try_admit(&self, owner: &OwnerId, job: JobId) -> bool {
        if self.permits.contains_key(&job) {
            return true;
        }

        match self.slots(owner).semaphore.clone().try_acquire_owned() {
            Ok(permit) => {
                self.withdraw(job);
                self.permits.entry(job).or_insert(permit);
                true
            }
            Err(_) => false,
        }
    }

    /// Returns `job`'s slot to its owner, or gives up its place in line.
    /// False if it held neither.
    pub fn release(&self, job: JobId) -> bool {
        let withdrawn = self.withdraw(job);
        let released = self.permits.remove(&job).is_some();
        if released {
            debug!(job_id = %job, "Admission permit released");
        }
        released || withdrawn
    }

    pub fn is_admitted(&self, job: JobId) -> bool {
        self.permits.contains_key(&job)
    }

    /// Whether `job` holds a place in line without a slot yet.
    pub fn is_waiting(&self, job: JobId) -> bool {
        self.reserved.contains_key(&job)
    }

    /// Number of jobs currently holding a slot for `owner`.
    pub fn active(&self, owner: &OwnerId) -> usize {
        self.owners
            .get(owner)
            .map(|s| self.max_active - s.semaphore.available_permits())
            .unwrap_or(0)
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ACTIVE_PER_OWNER)
    }
}
