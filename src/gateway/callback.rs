//! Parsing of asynchronous provider webhooks.
//!
//! The provider posts a loosely typed envelope:
//!
//! ```json
//! {"body": {"job_id": "h1", "status": "finished",
//!           "outputs": [{"data": [{"Key": "url", "Value": "https://..."}]}]}}
//! ```
//!
//! Everything past this module sees only [`CallbackNotice`]; untyped maps stop here.

use super::error::{GatewayError, Result};
use serde::Deserialize;

/// Output key that carries the finished video's location.
pub const URL_OUTPUT_KEY: &str = "url";

#[derive(Debug, Deserialize)]
struct Envelope {
    body: Body,
}

#[derive(Debug, Deserialize)]
struct Body {
    #[serde(default)]
    job_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    outputs: Option<Vec<OutputGroup>>,
}

#[derive(Debug, Deserialize)]
struct OutputGroup {
    #[serde(default)]
    data: Vec<OutputEntry>,
}

#[derive(Debug, Deserialize)]
struct OutputEntry {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value", default)]
    value: serde_json::Value,
}

/// What the provider says happened to a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOutcome {
    /// Finished and the result location was found.
    Finished { video_url: String },
    /// Reported `finished` but without a usable `url` output.
    Malformed(String),
    /// Reported `error` or `failed`.
    Failed(String),
    /// Any other status: informational, not meaningful to the job state machine.
    Progress(String),
}

/// A parsed webhook: which handle it concerns and what happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackNotice {
    pub handle: String,
    pub outcome: ProviderOutcome,
}

impl CallbackNotice {
    /// Parses a raw webhook body.
    ///
    /// Fails only when the envelope itself is unusable (not JSON, no `body`,
    /// missing or empty `job_id`). A `finished` status without a URL output is
    /// a successful parse with [`ProviderOutcome::Malformed`]: the handle is
    /// known and the job it belongs to must be failed.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(raw)
            .map_err(|e| GatewayError::Malformed(format!("callback envelope: {e}")))?;
        let body = envelope.body;

        let handle = body
            .job_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| GatewayError::Malformed("callback missing job_id".to_string()))?;

        let status = body.status.unwrap_or_default();
        let outcome = match status.as_str() {
            "finished" => match find_url(body.outputs.as_deref().unwrap_or_default()) {
                Some(video_url) => ProviderOutcome::Finished { video_url },
                None => ProviderOutcome::Malformed(format!(
                    "finished callback has no '{URL_OUTPUT_KEY}' output"
                )),
            },
            "error" | "failed" => ProviderOutcome::Failed(status),
            _ => ProviderOutcome::Progress(status),
        };

        Ok(Self { handle, outcome })
    }
}

/// The first non-empty string value tagged `url`, across all output groups.
fn find_url(outputs: &[OutputGroup]) -> Option<String> {
    outputs
        .iter()
        .flat_map(|group| group.data.iter())
        .filter(|entry| entry.key == URL_OUTPUT_KEY)
        .find_map(|entry| match &entry.value {
            serde_json::Value::String(url) if !url.trim().is_empty() => Some(url.clone()),
            _ => None,
        })
}
