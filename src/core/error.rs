use super::job::JobStatus;
use thiserror::Error;

/// Core error type for the eikon orchestrator.
///
/// Covers request validation and the parsing of persisted enum values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CoreError {
    /// The submission carried both a script and an audio reference, or neither.
    #[error("exactly one of script or audio must be supplied")]
    AmbiguousDrivingSource,

    /// The submission did not reference a photo.
    #[error("a photo reference is required")]
    MissingPhoto,

    /// The submission did not name an owner.
    #[error("an owner id is required")]
    MissingOwner,

    /// An invalid status string was encountered during parsing.
    #[error("invalid job status: {0}")]
    InvalidStatus(String),

    /// An invalid mode string was encountered during parsing.
    #[error("invalid job mode: {0}")]
    InvalidMode(String),

    /// An invalid failure category string was encountered during parsing.
    #[error("invalid failure category: {0}")]
    InvalidFailureCategory(String),

    /// A status change that the job state machine does not allow.
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: JobStatus, to: JobStatus },
}

pub type Result<T> = std::result::Result<T, CoreError>;
