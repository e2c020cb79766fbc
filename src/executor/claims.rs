use crate::core::JobId;
use dashmap::DashSet;

/// Set of jobs some task in this process is currently driving.
///
/// Cross-process exclusion comes from the store's conditional updates; this
/// only stops one process from running the same job twice side by side.
#[derive(Default)]
pub(crate) struct ClaimSet {
    claimed: DashSet<JobId>,
}

/// Held while driving a job. Dropping it releases the claim.
pub(crate) struct Claim<'a> {
    set: &'a DashSet<JobId>,
    id: JobId,
}

impl ClaimSet {
    pub(crate) fn claim(&self, id: JobId) -> Option<Claim<'_>> {
        // Built lazily: a rejected Claim would remove the holder's entry on drop.
        self.claimed.insert(id).then(|| Claim {
            set: &self.claimed,
            id,
        })
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}
