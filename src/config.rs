//! Configuration for the Apertis provider and its models

use crate::{Error, Result};
use std::env;

/// Endpoint used when neither the settings nor the environment name one
pub const DEFAULT_BASE_URL: &str = "https://api.apertis.ai/v1";

/// Environment variable consulted when no API key is configured
pub const API_KEY_ENV_VAR: &str = "APERTIS_API_KEY";

/// Environment variable consulted when no base URL is configured
pub const BASE_URL_ENV_VAR: &str = "APERTIS_BASE_URL";

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Provider-wide settings
#[derive(Clone)]
pub struct ProviderSettings {
    /// API key; when `None` it is read from `APERTIS_API_KEY` on every request
    pub api_key: Option<String>,

    /// API root, e.g. `https://api.apertis.ai/v1`
    pub base_url: Option<String>,

    /// Extra headers sent with every request
    pub headers: Vec<(String, String)>,

    /// Request timeout in seconds
    pub timeout: u64,
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("base_url", &self.base_url)
            .field("headers", &format!("{} headers", self.headers.len()))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            headers: Vec::new(),
            timeout: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ProviderSettings {
    /// Create a new builder for ProviderSettings
    pub fn builder() -> ProviderSettingsBuilder {
        ProviderSettingsBuilder::default()
    }

    /// The configured or environment base URL, without a trailing slash
    pub fn resolved_base_url(&self) -> String {
        get_base_url(self.base_url.as_deref())
    }
}

/// Builder for ProviderSettings
#[derive(Default)]
pub struct ProviderSettingsBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    headers: Vec<(String, String)>,
    timeout: Option<u64>,
}

impl std::fmt::Debug for ProviderSettingsBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettingsBuilder")
            .field("base_url", &self.base_url)
            .field("headers", &format!("{} headers", self.headers.len()))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ProviderSettingsBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<ProviderSettings> {
        if self.timeout == Some(0) {
            return Err(Error::config("timeout must be greater than zero"));
        }

        if let Some(url) = &self.base_url {
            if url.trim().is_empty() {
                return Err(Error::config("base_url cannot be empty"));
            }
        }

        Ok(ProviderSettings {
            api_key: self.api_key,
            base_url: self.base_url,
            headers: self.headers,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS),
        })
    }
}

/// Settings for chat models
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatSettings {
    /// End-user identifier forwarded for abuse monitoring
    pub user: Option<String>,
    /// Return log probabilities of the output tokens
    pub logprobs: Option<bool>,
    /// Number of most likely tokens to return per position
    pub top_logprobs: Option<u8>,
}

/// Settings for legacy completion models
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionSettings {
    /// Echo the prompt back in addition to the completion
    pub echo: Option<bool>,
    /// Number of most likely tokens to return log probabilities for
    pub logprobs: Option<u32>,
    /// Text that comes after the inserted completion
    pub suffix: Option<String>,
    pub user: Option<String>,
}

/// Settings for embedding models
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingSettings {
    /// Largest batch accepted by a single `embed` call
    pub max_embeddings_per_call: usize,
    pub supports_parallel_calls: bool,
    /// Output dimensionality, for models that support shortening
    pub dimensions: Option<u32>,
    pub user: Option<String>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            max_embeddings_per_call: 2048,
            supports_parallel_calls: true,
            dimensions: None,
            user: None,
        }
    }
}

/// Get the base URL from an explicit value, the environment, or the default
///
/// Priority:
/// 1. `explicit` parameter
/// 2. APERTIS_BASE_URL environment variable
/// 3. [`DEFAULT_BASE_URL`]
///
/// A trailing slash is removed so paths can be appended directly.
///
/// # Examples
///
/// ```rust
/// use apertis::get_base_url;
///
/// assert_eq!(get_base_url(Some("http://localhost:8080/v1/")), "http://localhost:8080/v1");
/// ```
pub fn get_base_url(explicit: Option<&str>) -> String {
    resolve_base_url(explicit, env::var(BASE_URL_ENV_VAR).ok())
}

fn resolve_base_url(explicit: Option<&str>, from_env: Option<String>) -> String {
    let url = match explicit {
        Some(url) => url.to_string(),
        None => from_env.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
    };
    without_trailing_slash(&url).to_string()
}

/// Resolve the API key from an explicit value or APERTIS_API_KEY
///
/// # Errors
///
/// Returns [`Error::Config`] when neither source provides a key.
pub fn load_api_key(explicit: Option<&str>) -> Result<String> {
    resolve_api_key(explicit, env::var(API_KEY_ENV_VAR).ok())
}

fn resolve_api_key(explicit: Option<&str>, from_env: Option<String>) -> Result<String> {
    if let Some(key) = explicit {
        return Ok(key.to_string());
    }

    from_env.filter(|key| !key.is_empty()).ok_or_else(|| {
        Error::config(format!(
            "Apertis API key is missing. Pass it using the 'api_key' setting or the {} environment variable.",
            API_KEY_ENV_VAR
        ))
    })
}

pub(crate) fn without_trailing_slash(url: &str) -> &str {
    url.strip_suffix('/').unwrap_or(url)
}
