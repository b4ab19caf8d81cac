//! Error types for the Apertis SDK

use serde::Deserialize;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the SDK
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error (also used for a transport that fails mid-stream)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// API error returned by the Apertis server
    #[error("API error: {0}")]
    Api(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The requested model kind is not offered by the provider
    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    /// Timeout error
    #[error("Request timeout")]
    Timeout,
}

impl Error {
    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new API error
    pub fn api(msg: impl Into<String>) -> Self {
        Error::Api(msg.into())
    }

    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a new unsupported model error
    pub fn unsupported_model(msg: impl Into<String>) -> Self {
        Error::UnsupportedModel(msg.into())
    }

    /// Create a timeout error
    pub fn timeout() -> Self {
        Error::Timeout
    }

    /// Builds an API error from a failed response's status and body.
    ///
    /// Apertis reports failures as `{"error": {"message": ..., "type": ..., "code": ...}}`.
    /// When the body matches that shape the upstream message is used; otherwise the raw
    /// body text is kept so nothing is lost.
    pub fn from_response_body(status: reqwest::StatusCode, body: &str) -> Self {
        match serde_json::from_str::<ApiErrorBody>(body) {
            Ok(parsed) => {
                let detail = &parsed.error;
                match detail.code.as_deref() {
                    Some(code) => Error::api(format!("{} ({}): {}", status, code, detail.message)),
                    None => Error::api(format!("{}: {}", status, detail.message)),
                }
            }
            Err(_) => Error::api(format!("{}: {}", status, body)),
        }
    }
}

/// Error payload returned by the Apertis API on non-2xx responses
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

/// Inner error object of [`ApiErrorBody`]
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorDetail {
    pub message: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub param: Option<String>,
}
