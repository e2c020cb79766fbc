use super::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a generation job. Assigned at creation, never reused.
pub type JobId = Uuid;

/// Identifier of the account that submitted a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OwnerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// =============================================================================
// STATUS
// =============================================================================

/// Externally visible job status.
///
/// ```text
/// queued ──┬──> processing ──┬──> completed
///          │                 └──> failed
///          └──> no_credits
/// ```
///
/// Terminal states never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    NoCredits,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::NoCredits => "no_credits",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::NoCredits
        )
    }

    /// Returns true if the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Queued, JobStatus::NoCredits)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    /// Like [`can_transition_to`](Self::can_transition_to) but as a `Result`.
    pub fn check_transition(&self, next: JobStatus) -> Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(CoreError::IllegalTransition {
                from: *self,
                to: next,
            })
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "no_credits" => Ok(JobStatus::NoCredits),
            _ => Err(CoreError::InvalidStatus(s.to_string())),
        }
    }
}

// =============================================================================
// MODE
// =============================================================================

/// Which pipeline branch a job runs.
///
/// `Standard` calls the synchronous photo-to-video provider and finishes inline.
/// `Experimental` submits to the asynchronous portrait-avatar provider and is
/// completed later by a webhook callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Standard,
    Experimental,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Standard => "standard",
            Mode::Experimental => "experimental",
        }
    }
}

impl FromStr for Mode {
    type Err = CoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "standard" => Ok(Mode::Standard),
            "experimental" => Ok(Mode::Experimental),
            _ => Err(CoreError::InvalidMode(s.to_string())),
        }
    }
}

// =============================================================================
// FAILURE CATEGORY
// =============================================================================

/// Short reason persisted alongside a `failed` status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    SpeechSynthesis,
    VideoSynthesis,
    Presign,
    AsyncSubmission,
    MalformedResponse,
    ProviderFailed,
    ImportFailed,
    InsufficientCredits,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::SpeechSynthesis => "speech_synthesis",
            FailureCategory::VideoSynthesis => "video_synthesis",
            FailureCategory::Presign => "presign",
            FailureCategory::AsyncSubmission => "async_submission",
            FailureCategory::MalformedResponse => "malformed_response",
            FailureCategory::ProviderFailed => "provider_failed",
            FailureCategory::ImportFailed => "import_failed",
            FailureCategory::InsufficientCredits => "insufficient_credits",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureCategory {
    type Err = CoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "speech_synthesis" => Ok(FailureCategory::SpeechSynthesis),
            "video_synthesis" => Ok(FailureCategory::VideoSynthesis),
            "presign" => Ok(FailureCategory::Presign),
            "async_submission" => Ok(FailureCategory::AsyncSubmission),
            "malformed_response" => Ok(FailureCategory::MalformedResponse),
            "provider_failed" => Ok(FailureCategory::ProviderFailed),
            "import_failed" => Ok(FailureCategory::ImportFailed),
            "insufficient_credits" => Ok(FailureCategory::InsufficientCredits),
            _ => Err(CoreError::InvalidFailureCategory(s.to_string())),
        }
    }
}

// =============================================================================
// INPUTS
// =============================================================================

/// What drives the avatar's speech: a script to synthesize or a ready audio clip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DrivingSource {
    Script { text: String },
    Audio { key: String },
}

/// An unvalidated job submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub owner_id: OwnerId,
    pub photo_key: String,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub audio_key: Option<String>,
    #[serde(default)]
    pub voice_key: Option<String>,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_enhancement")]
    pub enhancement: bool,
}

fn default_enhancement() -> bool {
    true
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl JobRequest {
    /// Validates the request and creates a `queued` job with a fresh id.
    ///
    /// # Errors
    /// - [`CoreError::MissingOwner`] / [`CoreError::MissingPhoto`] for blank references
    /// - [`CoreError::AmbiguousDrivingSource`] unless exactly one of script/audio is present
    pub fn into_job(self) -> Result<GenerationJob> {
        if self.owner_id.as_str().trim().is_empty() {
            return Err(CoreError::MissingOwner);
        }
        if self.photo_key.trim().is_empty() {
            return Err(CoreError::MissingPhoto);
        }

        let source = match (non_empty(self.script), non_empty(self.audio_key)) {
            (Some(text), None) => DrivingSource::Script { text },
            (None, Some(key)) => DrivingSource::Audio { key },
            _ => return Err(CoreError::AmbiguousDrivingSource),
        };

        let now = Utc::now();
        Ok(GenerationJob {
            id: Uuid::new_v4(),
            owner_id: self.owner_id,
            photo_key: self.photo_key,
            source,
            voice_key: non_empty(self.voice_key),
            mode: self.mode,
            enhancement: self.enhancement,
            derived_audio_key: None,
            external_handle: None,
            output_key: None,
            status: JobStatus::Queued,
            failure: None,
            created_at: now,
            updated_at: now,
        })
    }
}

// =============================================================================
// JOB RECORD
// =============================================================================

/// A generation job record.
///
/// Fields set at creation (`id`, `owner_id`, inputs, `voice_key`, `mode`) are
/// immutable. Pipeline artifacts (`derived_audio_key`, `external_handle`,
/// `output_key`) are written once by the storage layer's conditional updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationJob {
    pub(crate) id: JobId,
    pub(crate) owner_id: OwnerId,
    pub(crate) photo_key: String,
    pub(crate) source: DrivingSource,
    pub(crate) voice_key: Option<String>,
    pub(crate) mode: Mode,
    pub(crate) enhancement: bool,
    pub(crate) derived_audio_key: Option<String>,
    pub(crate) external_handle: Option<String>,
    pub(crate) output_key: Option<String>,
    pub(crate) status: JobStatus,
    pub(crate) failure: Option<FailureCategory>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl GenerationJob {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn owner_id(&self) -> &OwnerId {
        &self.owner_id
    }

    pub fn photo_key(&self) -> &str {
        &self.photo_key
    }

    pub fn source(&self) -> &DrivingSource {
        &self.source
    }

    /// The script text, if the job was submitted with one.
    pub fn script(&self) -> Option<&str> {
        match &self.source {
            DrivingSource::Script { text } => Some(text),
            DrivingSource::Audio { .. } => None,
        }
    }

    pub fn voice_key(&self) -> Option<&str> {
        self.voice_key.as_deref()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn enhancement(&self) -> bool {
        self.enhancement
    }

    pub fn derived_audio_key(&self) -> Option<&str> {
        self.derived_audio_key.as_deref()
    }

    pub fn external_handle(&self) -> Option<&str> {
        self.external_handle.as_deref()
    }

    pub fn output_key(&self) -> Option<&str> {
        self.output_key.as_deref()
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn failure(&self) -> Option<FailureCategory> {
        self.failure
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// True when speech must be synthesized before the video step can run.
    pub fn needs_speech_synthesis(&self) -> bool {
        matches!(self.source, DrivingSource::Script { .. }) && self.derived_audio_key.is_none()
    }

    /// The audio that drives the video: supplied by the user or derived from the script.
    pub fn driving_audio_key(&self) -> Option<&str> {
        match &self.source {
            DrivingSource::Audio { key } => Some(key),
            DrivingSource::Script { .. } => self.derived_audio_key.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> JobRequest {
        JobRequest {
            owner_id: "owner".into(),
            photo_key: "ptv/photo.png".to_string(),
            script: Some("hello".to_string()),
            audio_key: None,
            voice_key: Some("samples/voices/jeff.mp3".to_string()),
            mode: Mode::Standard,
            enhancement: true,
        }
    }

    #[test]
    fn test_script_request_creates_queued_job() {
        let job = request().into_job().unwrap();
        assert_eq!(job.status(), JobStatus::Queued);
        assert_eq!(job.script(), Some("hello"));
        assert!(job.needs_speech_synthesis());
        assert_eq!(job.driving_audio_key(), None);
        assert!(job.output_key().is_none());
    }

    #[test]
    fn test_audio_request_skips_speech() {
        let mut req = request();
        req.script = None;
        req.audio_key = Some("ptv/audio.wav".to_string());

        let job = req.into_job().unwrap();
        assert!(!job.needs_speech_synthesis());
        assert_eq!(job.driving_audio_key(), Some("ptv/audio.wav"));
    }

    #[test]
    fn test_both_or_neither_source_rejected() {
        let mut both = request();
        both.audio_key = Some("ptv/audio.wav".to_string());
        assert_eq!(
            both.into_job().unwrap_err(),
            CoreError::AmbiguousDrivingSource
        );

        let mut neither = request();
        neither.script = Some("   ".to_string());
        assert_eq!(
            neither.into_job().unwrap_err(),
            CoreError::AmbiguousDrivingSource
        );
    }

    #[test]
    fn test_missing_photo_rejected() {
        let mut req = request();
        req.photo_key = String::new();
        assert_eq!(req.into_job().unwrap_err(), CoreError::MissingPhoto);
    }

    #[test]
    fn test_transitions_are_monotonic() {
        use JobStatus::*;
        assert!(Queued.can_transition_to(Processing));
        assert!(Queued.can_transition_to(NoCredits));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));

        assert!(!Processing.can_transition_to(Queued));
        assert!(!Processing.can_transition_to(NoCredits));
        assert!(!Queued.can_transition_to(Completed));
        for terminal in [Completed, Failed, NoCredits] {
            assert!(terminal.is_terminal());
            for next in [Queued, Processing, Completed, Failed, NoCredits] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_status_strings() {
        for status in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::NoCredits,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("no credits".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_request_defaults_from_json() {
        let req: JobRequest = serde_json::from_str(
            r#"{"owner_id":"u1","photo_key":"ptv/a.png","audio_key":"ptv/a.wav"}"#,
        )
        .unwrap();
        assert_eq!(req.mode, Mode::Standard);
        assert!(req.enhancement);
        assert!(req.script.is_none());
    }
}
