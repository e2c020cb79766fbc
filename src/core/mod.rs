//! Core types for the eikon job orchestrator.
//!
//! This module provides the fundamental building blocks every other layer
//! speaks in:
//!
//! # Domain Model
//! - [`GenerationJob`]: One request to synthesize a talking-portrait video
//! - [`JobStatus`]: The externally visible state (`queued` → `processing` → terminal)
//! - [`JobRequest`]: The unvalidated submission; [`JobRequest::into_job`] enforces
//!   the "exactly one of script/audio" rule
//! - [`FailureCategory`]: Short, persisted reason attached to `failed` jobs
//!
//! # Error Handling
//! - [`CoreError`]: Validation and parsing errors
//!
//! # Retry Behavior
//! - [`RetryPolicy`]: Attempt budget, exponential backoff and per-attempt timeout
//! - [`RetryableError`]: Lets an error type decide whether another attempt can help
//!
//! # Example
//!
//! ```
//! use eikon::core::{JobRequest, JobStatus, Mode};
//!
//! let request = JobRequest {
//!     owner_id: "user-1".into(),
//!     photo_key: "ptv/photo.png".to_string(),
//!     script: Some("Hello there".to_string()),
//!     audio_key: None,
//!     voice_key: None,
//!     mode: Mode::Standard,
//!     enhancement: true,
//! };
//!
//! let job = request.into_job().unwrap();
//! assert_eq!(job.status(), JobStatus::Queued);
//! assert!(job.needs_speech_synthesis());
//! ```

mod error;
mod job;
pub mod retry;

pub use error::{CoreError, Result};
pub use job::{
    DrivingSource, FailureCategory, GenerationJob, JobId, JobRequest, JobStatus, Mode, OwnerId,
};
pub use retry::{RetryPolicy, RetryableError};
