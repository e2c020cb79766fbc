use super::assets::AssetStore;
use super::error::{GatewayError, Result};
use super::{PortraitSubmission, SynthesisGateway};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Function name of the asynchronous portrait-avatar model.
const PORTRAIT_FUNCTION: &str = "sieve/portrait-avatar";

/// Proxy-auth headers for the self-hosted GPU endpoints.
#[derive(Debug, Clone, Default)]
pub struct ModalAuth {
    pub key: Option<String>,
    pub secret: Option<String>,
}

impl ModalAuth {
    fn apply(&self, mut request: RequestBuilder) -> RequestBuilder {
        if let Some(key) = &self.key {
            request = request.header("Modal-Key", key);
        }
        if let Some(secret) = &self.secret {
            request = request.header("Modal-Secret", secret);
        }
        request
    }
}

/// Endpoints and credentials of the synthesis providers.
#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    pub speech_endpoint: String,
    pub video_endpoint: String,
    pub portrait_endpoint: String,
    /// Model backend requested from the portrait provider.
    pub portrait_backend: String,
    pub provider_api_key: Option<String>,
    pub auth: ModalAuth,
}

fn build_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| GatewayError::Transport(e.to_string()))
}

/// Sends `request` and decodes a JSON success body.
async fn send_json<R: DeserializeOwned>(request: RequestBuilder) -> Result<R> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GatewayError::status(status.as_u16(), body));
    }

    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| GatewayError::Malformed(e.to_string()))
}

fn require(field: &str, value: String) -> Result<String> {
    if value.trim().is_empty() {
        Err(GatewayError::Malformed(format!("empty '{field}' in response")))
    } else {
        Ok(value)
    }
}

#[derive(Deserialize)]
struct SpeechResponse {
    s3_key: String,
}

#[derive(Deserialize)]
struct VideoResponse {
    video_s3_key: String,
}

#[derive(Deserialize)]
struct PortraitJobResponse {
    id: String,
}

/// [`SynthesisGateway`] over the providers' JSON HTTP APIs.
pub struct HttpSynthesisGateway {
    client: Client,
    config: HttpGatewayConfig,
}

impl HttpSynthesisGateway {
    pub fn new(config: HttpGatewayConfig) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            config,
        })
    }
}

#[async_trait]
impl SynthesisGateway for HttpSynthesisGateway {
    async fn synthesize_speech(&self, script: &str, voice_key: Option<&str>) -> Result<String> {
        debug!(endpoint = %self.config.speech_endpoint, "Requesting speech synthesis");
        let request = self
            .config
            .auth
            .apply(self.client.post(&self.config.speech_endpoint))
            .json(&json!({ "text": script, "voice_S3_key": voice_key }));

        let response: SpeechResponse = send_json(request).await?;
        require("s3_key", response.s3_key)
    }

    async fn synthesize_video(
        &self,
        transcript: &str,
        photo_key: &str,
        audio_key: &str,
    ) -> Result<String> {
        debug!(endpoint = %self.config.video_endpoint, "Requesting video synthesis");
        let request = self
            .config
            .auth
            .apply(self.client.post(&self.config.video_endpoint))
            .json(&json!({
                "transcript": transcript,
                "photo_s3_key": photo_key,
                "audio_s3_key": audio_key,
            }));

        let response: VideoResponse = send_json(request).await?;
        require("video_s3_key", response.video_s3_key)
    }

    async fn submit_portrait_job(&self, submission: &PortraitSubmission) -> Result<String> {
        debug!(endpoint = %self.config.portrait_endpoint, "Submitting portrait-avatar job");
        let enhancement = if submission.enhancement {
            "codeformer"
        } else {
            "none"
        };

        let mut request = self.client.post(&self.config.portrait_endpoint).json(&json!({
            "function": PORTRAIT_FUNCTION,
            "inputs": {
                "source_image": { "url": submission.photo_url },
                "driving_audio": { "url": submission.audio_url },
                "backend": self.config.portrait_backend,
                "enhancement": enhancement,
            },
            "webhooks": [{ "type": "job.complete", "url": submission.callback_url }],
        }));
        if let Some(key) = &self.config.provider_api_key {
            request = request.header("X-API-Key", key);
        }

        let response: PortraitJobResponse = send_json(request).await?;
        require("id", response.id)
    }
}

#[derive(Serialize)]
struct PresignRequest<'a> {
    key: &'a str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<&'a str>,
    expires_in: u64,
}

#[derive(Deserialize)]
struct PresignResponse {
    url: String,
}

#[derive(Deserialize)]
struct ImportResponse {
    s3_key: String,
}

/// [`AssetStore`] backed by a presigning service and an import worker.
pub struct HttpAssetStore {
    client: Client,
    presign_endpoint: String,
    import_endpoint: String,
    auth: ModalAuth,
}

impl HttpAssetStore {
    pub fn new(
        presign_endpoint: impl Into<String>,
        import_endpoint: impl Into<String>,
        auth: ModalAuth,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            presign_endpoint: presign_endpoint.into(),
            import_endpoint: import_endpoint.into(),
            auth,
        })
    }

    async fn presign(
        &self,
        key: &str,
        method: &str,
        content_type: Option<&str>,
        ttl: Duration,
    ) -> Result<String> {
        let request = self
            .auth
            .apply(self.client.post(&self.presign_endpoint))
            .json(&PresignRequest {
                key,
                method,
                content_type,
                expires_in: ttl.as_secs(),
            });

        let response: PresignResponse = send_json(request).await?;
        require("url", response.url)
    }
}

#[async_trait]
impl AssetStore for HttpAssetStore {
    async fn upload_url(&self, key: &str, content_type: &str, ttl: Duration) -> Result<String> {
        self.presign(key, "PUT", Some(content_type), ttl).await
    }

    async fn read_url(&self, key: &str, ttl: Duration) -> Result<String> {
        self.presign(key, "GET", None, ttl).await
    }

    async fn import_remote_asset(&self, remote_url: &str) -> Result<String> {
        debug!(endpoint = %self.import_endpoint, "Importing remote asset");
        let request = self
            .auth
            .apply(self.client.post(&self.import_endpoint))
            .json(&json!({ "video_url": remote_url }));

        let response: ImportResponse = send_json(request).await?;
        require("s3_key", response.s3_key)
    }
}
