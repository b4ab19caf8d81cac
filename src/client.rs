//! Apertis provider and its model clients.
//!
//! [`Apertis`] holds the provider-wide configuration (endpoint, credentials, extra
//! headers and the shared HTTP client) and hands out model clients:
//!
//! - [`ChatModel`]: `POST {base}/chat/completions`, text and tool calls
//! - [`CompletionModel`]: `POST {base}/completions`, plain text
//! - [`EmbeddingModel`]: `POST {base}/embeddings`
//!
//! Chat and completion models implement [`LanguageModel`], which offers a
//! single-shot [`generate`](LanguageModel::generate) and a normalized
//! [`stream`](LanguageModel::stream).
//!
//! # Streaming
//!
//! ```rust,no_run
//! use apertis::{Apertis, CallOptions, LanguageModel, ProviderSettings, StreamEvent};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = Apertis::new(ProviderSettings::default())?;
//!     let model = provider.language_model("gpt-4o-mini");
//!
//!     let options = CallOptions::builder()
//!         .system("You are a helpful assistant")
//!         .user("What's the capital of France?")
//!         .build()?;
//!
//!     let mut stream = model.stream(&options).await?;
//!     while let Some(event) = stream.next().await {
//!         match event? {
//!             StreamEvent::TextDelta { delta, .. } => print!("{}", delta),
//!             StreamEvent::ToolCall(call) => println!("\nTool called: {}", call.name),
//!             StreamEvent::Finish { finish_reason, .. } => println!("\n[{}]", finish_reason),
//!             _ => {}
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Error handling
//!
//! - **Configuration errors**: missing API key (resolved at request time), HTTP client
//!   construction failure
//! - **API errors**: non-2xx responses, parsed from the `{"error": {...}}` body
//! - **HTTP errors**: connection failures; a timeout maps to [`Error::Timeout`]
//! - **Stream errors**: a transport failure mid-stream is yielded as the last item,
//!   after everything that could still be flushed

use crate::config::{
    ChatSettings, CompletionSettings, EmbeddingSettings, ProviderSettings, load_api_key,
};
use crate::convert::{
    convert_to_openai_messages, convert_to_openai_tool_choice, convert_to_openai_tools,
    prompt_to_text,
};
use crate::fragment::{classify_chat_chunk, classify_completion_chunk};
use crate::normalizer::StreamNormalizer;
use crate::response::GenerateResult;
use crate::types::{
    CallMode, CallOptions, ChatChunk, ChatRequest, ChatResponse, CompletionChunk,
    CompletionRequest, CompletionResponse, EmbeddingRequest, EmbeddingResponse, ResponseFormat,
    StreamOptions,
};
use crate::utils::{EventStream, normalize_stream, parse_sse_stream};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

const CHAT_PROVIDER: &str = "apertis.chat";
const COMPLETION_PROVIDER: &str = "apertis.completion";
const EMBEDDING_PROVIDER: &str = "apertis.embedding";

/// A text-generating model
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider id, e.g. `apertis.chat`
    fn provider(&self) -> &str;

    fn model_id(&self) -> &str;

    /// Runs a non-streaming request.
    async fn generate(&self, options: &CallOptions) -> Result<GenerateResult>;

    /// Runs a streaming request and returns the normalized event stream.
    ///
    /// Request-level failures (connection, non-2xx status, missing key) are returned
    /// here; failures after the response started arrive as the stream's last item.
    async fn stream(&self, options: &CallOptions) -> Result<EventStream>;
}

/// Connection state shared by every model handed out by one provider
struct ProviderConfig {
    base_url: String,
    api_key: Option<String>,
    headers: Vec<(String, String)>,
    http_client: reqwest::Client,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("headers", &format!("{} headers", self.headers.len()))
            .finish()
    }
}

impl ProviderConfig {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Posts `body` as JSON and returns the response if its status is a success.
    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        // Resolved per request so the environment can change between calls
        let api_key = load_api_key(self.api_key.as_deref())?;
        let url = self.url(path);

        log::debug!("POST {}", url);

        let mut request = self.http_client.post(&url);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout()
                } else {
                    Error::Http(e)
                }
            })?;

        // Authentication failures, rate limits, unknown models, etc.
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|e| {
                log::warn!("Failed to read error response body: {}", e);
                "Unknown error (failed to read response body)".to_string()
            });
            return Err(Error::from_response_body(status, &body));
        }

        Ok(response)
    }
}

/// The Apertis provider.
///
/// Cheap to clone; all models created from one provider share its HTTP client.
#[derive(Debug, Clone)]
pub struct Apertis {
    config: Arc<ProviderConfig>,
}

impl Apertis {
    /// Creates a provider from `settings`.
    ///
    /// The base URL falls back to `APERTIS_BASE_URL` and then
    /// `https://api.apertis.ai/v1`. The API key is not checked here; it is resolved
    /// (from the settings or `APERTIS_API_KEY`) when a request is made.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the HTTP client cannot be built.
    pub fn new(settings: ProviderSettings) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout))
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config: Arc::new(ProviderConfig {
                base_url: settings.resolved_base_url(),
                api_key: settings.api_key,
                headers: settings.headers,
                http_client,
            }),
        })
    }

    /// The resolved API root, without a trailing slash
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn chat(&self, model_id: impl Into<String>, settings: ChatSettings) -> ChatModel {
        ChatModel {
            model_id: model_id.into(),
            settings,
            config: Arc::clone(&self.config),
        }
    }

    /// Chat model with default settings
    pub fn language_model(&self, model_id: impl Into<String>) -> ChatModel {
        self.chat(model_id, ChatSettings::default())
    }

    pub fn completion(
        &self,
        model_id: impl Into<String>,
        settings: CompletionSettings,
    ) -> CompletionModel {
        CompletionModel {
            model_id: model_id.into(),
            settings,
            config: Arc::clone(&self.config),
        }
    }

    pub fn text_embedding_model(
        &self,
        model_id: impl Into<String>,
        settings: EmbeddingSettings,
    ) -> EmbeddingModel {
        EmbeddingModel {
            model_id: model_id.into(),
            settings,
            config: Arc::clone(&self.config),
        }
    }

    /// Embedding model with default settings
    pub fn embedding_model(&self, model_id: impl Into<String>) -> EmbeddingModel {
        self.text_embedding_model(model_id, EmbeddingSettings::default())
    }

    /// Image generation is not offered; this always fails.
    pub fn image_model(&self, model_id: &str) -> Result<Infallible> {
        log::debug!("image model {} requested", model_id);
        Err(Error::unsupported_model(
            "Image models are not supported by Apertis",
        ))
    }
}

fn stream_options(stream: bool) -> Option<StreamOptions> {
    stream.then_some(StreamOptions {
        include_usage: true,
    })
}

/// Chat-completions model
#[derive(Debug, Clone)]
pub struct ChatModel {
    model_id: String,
    settings: ChatSettings,
    config: Arc<ProviderConfig>,
}

impl ChatModel {
    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    /// Builds the `/chat/completions` request body.
    ///
    /// In [`CallMode::ObjectJson`] the server is asked for a JSON object and no tools
    /// are sent.
    pub fn build_request(&self, options: &CallOptions, stream: bool) -> ChatRequest {
        let (tools, tool_choice, response_format) = match &options.mode {
            CallMode::Regular { tools, tool_choice } => (
                convert_to_openai_tools(tools),
                convert_to_openai_tool_choice(tool_choice.as_ref()),
                None,
            ),
            CallMode::ObjectJson => (
                None,
                None,
                Some(ResponseFormat {
                    format_type: "json_object".to_string(),
                }),
            ),
        };

        ChatRequest {
            model: self.model_id.clone(),
            messages: convert_to_openai_messages(&options.prompt),
            stream,
            stream_options: stream_options(stream),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            top_p: options.top_p,
            frequency_penalty: options.frequency_penalty,
            presence_penalty: options.presence_penalty,
            stop: options.stop_sequences.clone(),
            seed: options.seed,
            tools,
            tool_choice,
            response_format,
            user: self.settings.user.clone(),
            logprobs: self.settings.logprobs,
            top_logprobs: self.settings.top_logprobs,
        }
    }
}

#[async_trait]
impl LanguageModel for ChatModel {
    fn provider(&self) -> &str {
        CHAT_PROVIDER
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, options: &CallOptions) -> Result<GenerateResult> {
        let request = self.build_request(options, false);
        let response = self.config.post("/chat/completions", &request).await?;
        let body: ChatResponse = response.json().await?;
        GenerateResult::from_chat_response(body)
    }

    async fn stream(&self, options: &CallOptions) -> Result<EventStream> {
        let request = self.build_request(options, true);
        let response = self.config.post("/chat/completions", &request).await?;
        let source = parse_sse_stream::<ChatChunk>(response);
        Ok(normalize_stream(
            source,
            classify_chat_chunk,
            StreamNormalizer::chat(),
        ))
    }
}

/// Legacy text-completion model
#[derive(Debug, Clone)]
pub struct CompletionModel {
    model_id: String,
    settings: CompletionSettings,
    config: Arc<ProviderConfig>,
}

impl CompletionModel {
    pub fn settings(&self) -> &CompletionSettings {
        &self.settings
    }

    /// Builds the `/completions` request body.
    ///
    /// The prompt is flattened to text; tools and JSON mode have no equivalent on
    /// this endpoint and are not sent.
    pub fn build_request(&self, options: &CallOptions, stream: bool) -> CompletionRequest {
        if !matches!(
            &options.mode,
            CallMode::Regular { tools, .. } if tools.is_empty()
        ) {
            log::warn!(
                "{} model {} ignores tools and JSON mode",
                COMPLETION_PROVIDER,
                self.model_id
            );
        }

        CompletionRequest {
            model: self.model_id.clone(),
            prompt: prompt_to_text(&options.prompt),
            stream,
            stream_options: stream_options(stream),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
            frequency_penalty: options.frequency_penalty,
            presence_penalty: options.presence_penalty,
            stop: options.stop_sequences.clone(),
            seed: options.seed,
            echo: self.settings.echo,
            logprobs: self.settings.logprobs,
            suffix: self.settings.suffix.clone(),
            user: self.settings.user.clone(),
        }
    }
}

#[async_trait]
impl LanguageModel for CompletionModel {
    fn provider(&self) -> &str {
        COMPLETION_PROVIDER
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, options: &CallOptions) -> Result<GenerateResult> {
        let request = self.build_request(options, false);
        let response = self.config.post("/completions", &request).await?;
        let body: CompletionResponse = response.json().await?;
        GenerateResult::from_completion_response(body)
    }

    async fn stream(&self, options: &CallOptions) -> Result<EventStream> {
        let request = self.build_request(options, true);
        let response = self.config.post("/completions", &request).await?;
        let source = parse_sse_stream::<CompletionChunk>(response);
        Ok(normalize_stream(
            source,
            classify_completion_chunk,
            StreamNormalizer::completion(),
        ))
    }
}

/// Result of an embedding call
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingResult {
    /// One vector per input value, in input order
    pub embeddings: Vec<Vec<f32>>,
    /// Prompt tokens consumed, when the server reports it
    pub usage_tokens: Option<u64>,
}

/// Text embedding model
#[derive(Debug, Clone)]
pub struct EmbeddingModel {
    model_id: String,
    settings: EmbeddingSettings,
    config: Arc<ProviderConfig>,
}

impl EmbeddingModel {
    pub fn provider(&self) -> &str {
        EMBEDDING_PROVIDER
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn max_embeddings_per_call(&self) -> usize {
        self.settings.max_embeddings_per_call
    }

    pub fn supports_parallel_calls(&self) -> bool {
        self.settings.supports_parallel_calls
    }

    pub fn build_request(&self, values: &[String]) -> EmbeddingRequest {
        EmbeddingRequest {
            model: self.model_id.clone(),
            input: values.to_vec(),
            encoding_format: "float".to_string(),
            dimensions: self.settings.dimensions,
            user: self.settings.user.clone(),
        }
    }

    /// Embeds `values` in a single request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] without contacting the server when more than
    /// `max_embeddings_per_call` values are given.
    pub async fn embed(&self, values: &[String]) -> Result<EmbeddingResult> {
        if values.len() > self.settings.max_embeddings_per_call {
            return Err(Error::invalid_input(format!(
                "Too many values for a single embedding call. The {} model \"{}\" can only embed up to {} values per call, but {} values were provided.",
                EMBEDDING_PROVIDER,
                self.model_id,
                self.settings.max_embeddings_per_call,
                values.len()
            )));
        }

        let request = self.build_request(values);
        let response = self.config.post("/embeddings", &request).await?;
        let body: EmbeddingResponse = response.json().await?;

        let mut data = body.data;
        data.sort_by_key(|d| d.index);

        Ok(EmbeddingResult {
            embeddings: data.into_iter().map(|d| d.embedding).collect(),
            usage_tokens: body.usage.map(|u| u.prompt_tokens),
        })
    }
}
