//! Boundary to the external synthesis providers and object storage.
//!
//! Two call shapes:
//!
//! - *synchronous*: [`SynthesisGateway::synthesize_speech`] and
//!   [`SynthesisGateway::synthesize_video`] block until the provider returns
//!   the key of the stored artifact
//! - *asynchronous*: [`SynthesisGateway::submit_portrait_job`] returns an
//!   external handle immediately; the result arrives later as a webhook,
//!   parsed by [`CallbackNotice::parse`]
//!
//! Implementations do not retry or time out on their own. The executor wraps
//! every call in its retry policy, and [`GatewayError`] tells it which
//! failures are worth another attempt.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod assets;
mod callback;
mod error;
mod http;

pub use assets::{AssetStore, UploadPurpose};
pub use callback::{CallbackNotice, ProviderOutcome, URL_OUTPUT_KEY};
pub use error::{GatewayError, Result};
pub use http::{HttpAssetStore, HttpGatewayConfig, HttpSynthesisGateway, ModalAuth};

/// Everything the asynchronous portrait-avatar provider needs for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortraitSubmission {
    /// Time-limited read URL of the source photo.
    pub photo_url: String,
    /// Time-limited read URL of the driving audio.
    pub audio_url: String,
    /// Run face enhancement on the output.
    pub enhancement: bool,
    /// Where the provider posts the completion webhook.
    pub callback_url: String,
}

/// Inference providers, as consumed by the orchestrator.
#[async_trait]
pub trait SynthesisGateway: Send + Sync {
    /// Synthesize speech for `script`, optionally cloning `voice_key`.
    /// Returns the storage key of the audio.
    async fn synthesize_speech(&self, script: &str, voice_key: Option<&str>) -> Result<String>;

    /// Animate `photo_key` with `audio_key`. Returns the storage key of the video.
    async fn synthesize_video(
        &self,
        transcript: &str,
        photo_key: &str,
        audio_key: &str,
    ) -> Result<String>;

    /// Submit an asynchronous portrait-avatar job. Returns the external handle.
    async fn submit_portrait_job(&self, submission: &PortraitSubmission) -> Result<String>;
}
