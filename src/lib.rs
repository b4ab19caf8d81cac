//! # Apertis SDK - Rust Implementation
//!
//! A streaming-first Rust SDK for the Apertis OpenAI-compatible API.
//!
//! ## Overview
//!
//! Upstream servers stream responses as fragments: text arrives in arbitrary slices,
//! and tool calls are split across many chunks, interleaved and identified only by a
//! positional index. This SDK turns those fragments into a small canonical event
//! vocabulary that downstream code can consume without knowing anything about the
//! wire protocol.
//!
//! ## Key Features
//!
//! - **Normalized Streaming**: text deltas, complete tool calls and a single finish
//!   event per response
//! - **Tool Call Assembly**: interleaved tool-call fragments are buffered per index
//!   and emitted whole, in index order
//! - **Graceful Endings**: truncated streams still flush buffered tool calls, and
//!   transport errors arrive after everything that could be salvaged
//! - **Interrupts**: stop reading a stream early without losing buffered output
//! - **Chat, Completion and Embedding Models**: one provider, three endpoints
//!
//! ## Example
//!
//! ```rust,no_run
//! use apertis::{Apertis, CallOptions, LanguageModel, ProviderSettings, StreamEvent};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = Apertis::new(ProviderSettings::builder().api_key("sk-...").build()?)?;
//!     let model = provider.language_model("gpt-4o-mini");
//!
//!     let options = CallOptions::builder().user("Tell me a joke").build()?;
//!     let mut stream = model.stream(&options).await?;
//!
//!     while let Some(event) = stream.next().await {
//!         if let StreamEvent::TextDelta { delta, .. } = event? {
//!             print!("{}", delta);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Using the normalizer directly
//!
//! The normalizer is transport-agnostic. Feed it classified fragments and collect
//! the events:
//!
//! ```rust
//! use apertis::{Fragment, StreamEvent, StreamNormalizer};
//!
//! let mut normalizer = StreamNormalizer::chat();
//! let mut events = normalizer.handle(Fragment::Text("Hi".to_string()));
//! events.extend(normalizer.handle(Fragment::Completion {
//!     reason: Some("stop".to_string()),
//!     usage: None,
//! }));
//!
//! assert!(matches!(events[0], StreamEvent::TextDelta { .. }));
//! assert!(matches!(events[1], StreamEvent::Finish { .. }));
//! ```
//!
//! ## Architecture
//!
//! - **client**: Provider, language models and embedding model
//! - **normalizer**: Aggregation state machine producing canonical events
//! - **fragment**: Classification of decoded chunks into fragments
//! - **finish_reason**: Mapping of upstream finish reasons
//! - **convert**: Prompt conversion to OpenAI-compatible payloads
//! - **response**: Single-shot results
//! - **types**: Prompt vocabulary, request payloads and response schemas
//! - **config**: Provider and model settings
//! - **error**: Error types and conversions
//! - **utils**: SSE decoding and the normalized stream adapter

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

/// Provider and model clients. Contains the `LanguageModel` trait and the chat,
/// completion and embedding models that talk to the Apertis endpoints.
mod client;

/// Provider settings, per-model settings and environment variable fallbacks.
mod config;

/// Conversion from the prompt vocabulary to OpenAI-compatible request payloads.
mod convert;

/// Error types and conversions. Defines the `Error` enum and `Result<T>` alias.
mod error;

/// Finish reason vocabularies for the chat and completion endpoints.
mod finish_reason;

/// Classification of decoded stream chunks into normalizer fragments.
mod fragment;

/// The incremental response normalizer.
mod normalizer;

/// Non-streaming generation results.
mod response;

/// Prompt types, request payloads and response schemas.
mod types;

/// SSE decoding, id generation and the normalized event stream adapter.
mod utils;

// ============================================================================
// PUBLIC EXPORTS
// ============================================================================

// --- Provider and Models ---

pub use client::{
    Apertis, ChatModel, CompletionModel, EmbeddingModel, EmbeddingResult, LanguageModel,
};

// --- Configuration ---

pub use config::{
    API_KEY_ENV_VAR, BASE_URL_ENV_VAR, ChatSettings, CompletionSettings, DEFAULT_BASE_URL,
    EmbeddingSettings, ProviderSettings, ProviderSettingsBuilder, get_base_url, load_api_key,
};

// --- Error Handling ---

pub use error::{ApiErrorBody, ApiErrorDetail, Error, Result};

// --- Normalization ---

pub use finish_reason::{
    FinishReason, FinishVocabulary, map_completion_finish_reason, map_finish_reason,
};
pub use fragment::{Fragment, ParseResult, classify_chat_chunk, classify_completion_chunk};
pub use normalizer::{StreamEvent, StreamNormalizer, StreamVariant, ToolCall};
pub use utils::{
    EventStream, InterruptHandle, ParseStream, decode_sse, generate_id, normalize_stream,
    parse_sse_stream,
};

// --- Request Conversion ---

pub use convert::{
    convert_to_openai_messages, convert_to_openai_tool_choice, convert_to_openai_tools,
    prompt_to_text,
};

// --- Results ---

pub use response::GenerateResult;

// --- Core Types ---

pub use types::{
    AssistantContent, CallMode, CallOptions, CallOptionsBuilder, ChatChunk, ChatRequest,
    ChatResponse, CompletionChunk, CompletionRequest, CompletionResponse, EmbeddingRequest,
    EmbeddingResponse, FunctionTool, ImageData, OpenAIMessage, OpenAITool, OpenAIToolChoice,
    PromptMessage, TokenUsage, ToolChoice, ToolResultContent, Usage, UserContent,
};

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// Convenience module containing the most commonly used types and functions.
/// Import with `use apertis::prelude::*;` to get everything you need for typical usage.
///
/// This includes:
/// - Provider: Apertis, ProviderSettings, LanguageModel
/// - Calls: CallOptions, PromptMessage, FunctionTool, ToolChoice
/// - Events: StreamEvent, ToolCall, FinishReason, TokenUsage
/// - Errors: Error, Result
pub mod prelude {
    pub use crate::{
        Apertis, CallOptions, Error, EventStream, FinishReason, FunctionTool, GenerateResult,
        LanguageModel, PromptMessage, ProviderSettings, Result, StreamEvent, TokenUsage,
        ToolCall, ToolChoice,
    };
}
