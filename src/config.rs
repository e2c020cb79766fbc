//! Environment-driven configuration for the server binary.
//!
//! Values come from the process environment, after loading a `.env` file from
//! the working directory if one exists. Unset keys take their defaults; a key
//! that is set but malformed is an error.

use crate::core::RetryPolicy;
use crate::executor::{EngineConfig, DEFAULT_MAX_ACTIVE_PER_OWNER, DEFAULT_UNKNOWN_HANDLE_GRACE};
use crate::gateway::{HttpGatewayConfig, ModalAuth};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} is required")]
    Missing { key: &'static str },

    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Endpoints of the storage capability.
#[derive(Debug, Clone)]
pub struct AssetConfig {
    pub presign_endpoint: String,
    pub import_endpoint: String,
    pub read_url_ttl: Duration,
    pub upload_url_ttl: Duration,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// SQLite file path, or `:memory:`.
    pub database_url: String,
    pub max_active_per_owner: usize,
    pub retry_policy: RetryPolicy,
    pub callback_url: String,
    pub unknown_handle_grace: Duration,
    pub gateway: HttpGatewayConfig,
    pub assets: AssetConfig,
}

impl Config {
    /// Loads `.env` (if present) and reads the process environment.
    pub fn from_env() -> Result<Self> {
        // A missing .env file is normal outside development.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let retry_policy = RetryPolicy {
            max_attempts: env.parse_or("EIKON_RETRY_MAX_ATTEMPTS", RetryPolicy::STANDARD.max_attempts)?,
            initial_delay: Duration::from_millis(env.parse_or("EIKON_RETRY_INITIAL_DELAY_MS", 1000)?),
            max_delay: Duration::from_millis(env.parse_or("EIKON_RETRY_MAX_DELAY_MS", 30_000)?),
            backoff_multiplier: RetryPolicy::STANDARD.backoff_multiplier,
            attempt_timeout: Duration::from_secs(env.parse_or("EIKON_ATTEMPT_TIMEOUT_SECS", 900)?),
        };
        if retry_policy.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "EIKON_RETRY_MAX_ATTEMPTS",
                value: "0".to_string(),
                reason: "at least one attempt is required".to_string(),
            });
        }

        let auth = ModalAuth {
            key: env.get("MODAL_KEY"),
            secret: env.get("MODAL_SECRET"),
        };

        Ok(Self {
            bind_addr: env.parse_or("EIKON_BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?,
            database_url: env.get("EIKON_DATABASE_URL").unwrap_or_else(|| "eikon.db".to_string()),
            max_active_per_owner: env.parse_or("EIKON_MAX_ACTIVE_PER_OWNER", DEFAULT_MAX_ACTIVE_PER_OWNER)?,
            retry_policy,
            callback_url: env.require("EIKON_CALLBACK_URL")?,
            unknown_handle_grace: Duration::from_millis(env.parse_or(
                "EIKON_UNKNOWN_HANDLE_GRACE_MS",
                DEFAULT_UNKNOWN_HANDLE_GRACE.as_millis() as u64,
            )?),
            gateway: HttpGatewayConfig {
                speech_endpoint: env.require("TEXT_TO_SPEECH_ENDPOINT")?,
                video_endpoint: env.require("PHOTO_TO_VIDEO_ENDPOINT")?,
                portrait_endpoint: env.require("PORTRAIT_AVATAR_ENDPOINT")?,
                portrait_backend: env
                    .get("PORTRAIT_AVATAR_BACKEND")
                    .unwrap_or_else(|| "hedra".to_string()),
                provider_api_key: env.get("PROVIDER_API_KEY"),
                auth,
            },
            assets: AssetConfig {
                presign_endpoint: env.require("ASSET_PRESIGN_ENDPOINT")?,
                import_endpoint: env.require("ASSET_IMPORT_ENDPOINT")?,
                read_url_ttl: Duration::from_secs(env.parse_or("EIKON_READ_URL_TTL_SECS", 3600)?),
                upload_url_ttl: Duration::from_secs(env.parse_or("EIKON_UPLOAD_URL_TTL_SECS", 600)?),
            },
        })
    }

    /// The engine settings implied by this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            retry_policy: self.retry_policy,
            callback_url: self.callback_url.clone(),
            read_url_ttl: self.assets.read_url_ttl,
        }
    }
}

struct Lookup<F>(F);

impl<F: Fn(&str) -> Option<String>> Lookup<F> {
    /// A set, non-blank value.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn require(&self, key: &'static str) -> Result<String> {
        self.get(key).ok_or(ConfigError::Missing { key })
    }

    fn parse_or<T>(&self, key: &'static str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(value) => {
                let parsed = value.trim().parse::<T>();
                parsed.map_err(|e| ConfigError::Invalid {
                    key,
                    reason: e.to_string(),
                    value,
                })
            }
        }
    }
}
