use super::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Object storage under this system's control.
///
/// Keys are opaque strings (`ptv/…`, `tts/…`, `sieve/…`). URLs handed out are
/// ephemeral and expire after `ttl`.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// A URL the client can `PUT` the object to.
    async fn upload_url(&self, key: &str, content_type: &str, ttl: Duration) -> Result<String>;

    /// A URL a third party can `GET` the object from.
    async fn read_url(&self, key: &str, ttl: Duration) -> Result<String>;

    /// Copy a remote object into storage, returning its new key.
    async fn import_remote_asset(&self, remote_url: &str) -> Result<String>;
}

/// What an uploaded file will be used for. Decides its storage folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadPurpose {
    Photo,
    Audio,
    VoiceClone,
}

impl UploadPurpose {
    pub fn folder(&self) -> &'static str {
        match self {
            UploadPurpose::Photo | UploadPurpose::Audio => "ptv",
            UploadPurpose::VoiceClone => "tts",
        }
    }

    /// A fresh storage key for a file named `file_name`: `{folder}/{uuid}.{ext}`.
    ///
    /// The client-supplied name contributes only its extension.
    pub fn new_key(&self, file_name: &str) -> String {
        let id = Uuid::new_v4();
        let ext = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()));

        match ext {
            Some(ext) => format!("{}/{}.{}", self.folder(), id, ext.to_ascii_lowercase()),
            None => format!("{}/{}", self.folder(), id),
        }
    }
}
