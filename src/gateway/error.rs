use crate::core::RetryableError;
use std::time::Duration;
use thiserror::Error;

/// Errors raised at the provider boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum GatewayError {
    /// The call did not finish within its attempt timeout.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// Connection refused, reset, DNS failure and the like.
    #[error("transport error: {0}")]
    Transport(String),

    /// The provider answered with a non-success HTTP status.
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body did not carry the fields the contract requires.
    #[error("malformed provider response: {0}")]
    Malformed(String),

    /// The provider explicitly reported that the work failed.
    #[error("provider reported failure: {0}")]
    Provider(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        GatewayError::Status {
            status,
            body: body.into(),
        }
    }
}

impl RetryableError for GatewayError {
    fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Timeout(_) | GatewayError::Transport(_) => true,
            GatewayError::Status { status, .. } => *status >= 500 || *status == 429,
            GatewayError::Malformed(_) | GatewayError::Provider(_) => false,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GatewayError::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            GatewayError::status(status.as_u16(), err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}
