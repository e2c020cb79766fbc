//! Eikon: durable orchestration of talking-portrait video generation
//!
//! `eikon` (εἰκών, Greek for "likeness" or "portrait") accepts requests to
//! animate a photo with a script or an audio clip, and drives each request
//! through a multi-step pipeline of slow, unreliable third-party synthesis
//! calls to exactly one terminal state.
//!
//! # Features
//!
//! - **Durable steps**: every sub-step persists its artifact; re-execution resumes, never repeats
//! - **Two completion models**: inline results from synchronous providers, webhook callbacks
//!   from asynchronous ones, correlated by external handle
//! - **Exactly-once charging**: a job-keyed atomic debit, taken only on success
//! - **Fair admission**: a FIFO concurrency cap per owner, held until the job is terminal
//! - **Retry logic**: bounded attempts with exponential backoff and per-attempt timeouts
//!
//! # Quick Start
//!
//! ```no_run
//! use eikon::prelude::*;
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! # async fn example(
//! #     gateway: Arc<dyn SynthesisGateway>,
//! #     assets: Arc<dyn AssetStore>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(SqliteJobStore::new("eikon.db").await?);
//! let admission = Arc::new(AdmissionController::default());
//! let engine = Arc::new(Engine::new(
//!     store.clone(),
//!     gateway,
//!     assets,
//!     admission.clone(),
//!     EngineConfig::default(),
//! ));
//!
//! let (sender, receiver) = mpsc::channel(1024);
//! let worker = Worker::new(engine, receiver).start();
//! let scheduler = JobScheduler::new(store, admission, sender);
//!
//! let job = scheduler
//!     .submit_job(JobRequest {
//!         owner_id: "user-1".into(),
//!         photo_key: "ptv/face.png".to_string(),
//!         script: Some("Hello from my portrait".to_string()),
//!         audio_key: None,
//!         voice_key: Some("samples/voices/jeff.mp3".to_string()),
//!         mode: Mode::Standard,
//!         enhancement: true,
//!     })
//!     .await?;
//! println!("submitted {}", job.id());
//!
//! worker.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! Each module hides a design decision that is likely to change:
//!
//! - [`core`]: job model, state machine and retry policy
//! - [`storage`]: job records and credit ledger (hides database choice and schema)
//! - [`gateway`]: providers and object storage (hides wire formats)
//! - [`executor`]: admission, step engine, callback correlation
//! - [`api`]: HTTP boundary
//! - [`config`]: environment configuration of the server

pub mod api;
pub mod config;
pub mod core;
pub mod executor;
pub mod gateway;
pub mod storage;

// Re-export commonly used types for convenience
pub use crate::core::{
    CoreError, FailureCategory, GenerationJob, JobId, JobRequest, JobStatus, Mode, OwnerId,
    RetryPolicy, RetryableError,
};

pub use executor::{
    AdmissionController, CallbackCorrelator, CallbackError, CallbackOutcome, Engine,
    EngineConfig, ExecutionError, JobOutcome, JobScheduler, Worker, WorkerHandle,
};

pub use gateway::{AssetStore, CallbackNotice, GatewayError, SynthesisGateway};

pub use storage::{
    CreditLedger, Debit, InMemoryJobStore, JobStore, Result as StorageResult, StorageError,
    Store,
};

#[cfg(feature = "sqlite")]
pub use storage::SqliteJobStore;

/// Prelude module for convenient glob imports
///
/// # Example
///
/// ```
/// use eikon::prelude::*;
/// ```
pub mod prelude {
    pub use crate::core::{
        CoreError, DrivingSource, FailureCategory, GenerationJob, JobId, JobRequest, JobStatus,
        Mode, OwnerId, RetryPolicy, RetryableError,
    };

    pub use crate::executor::{
        AdmissionController, CallbackCorrelator, CallbackError, CallbackOutcome, Engine,
        EngineConfig, ExecutionError, JobOutcome, JobScheduler, Worker, WorkerHandle,
    };

    pub use crate::gateway::{
        AssetStore, CallbackNotice, GatewayError, PortraitSubmission, ProviderOutcome,
        SynthesisGateway, UploadPurpose,
    };

    pub use crate::storage::{
        CreditLedger, Debit, InMemoryJobStore, JobStore, StorageError, Store,
    };

    #[cfg(feature = "sqlite")]
    pub use crate::storage::SqliteJobStore;
}
