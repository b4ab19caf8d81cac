//! Core types for the Apertis SDK
//!
//! Three groups live here:
//!
//! - the caller-facing prompt vocabulary ([`PromptMessage`], [`FunctionTool`], [`CallOptions`]),
//! - the OpenAI-compatible request payloads sent upstream,
//! - the response and streaming-chunk schemas received back.

use serde::{Deserialize, Serialize};

// ============================================================================
// PROMPT VOCABULARY
// ============================================================================

/// A message in the caller's conversation history
#[derive(Debug, Clone, PartialEq)]
pub enum PromptMessage {
    System { content: String },
    User { content: Vec<UserContent> },
    Assistant { content: Vec<AssistantContent> },
    Tool { content: Vec<ToolResultContent> },
}

impl PromptMessage {
    pub fn system(text: impl Into<String>) -> Self {
        PromptMessage::System {
            content: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        PromptMessage::User {
            content: vec![UserContent::Text(text.into())],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        PromptMessage::Assistant {
            content: vec![AssistantContent::Text(text.into())],
        }
    }

    /// Create a user message with custom content parts
    pub fn user_with_parts(content: Vec<UserContent>) -> Self {
        PromptMessage::User { content }
    }

    pub fn assistant_with_parts(content: Vec<AssistantContent>) -> Self {
        PromptMessage::Assistant { content }
    }

    pub fn tool_results(content: Vec<ToolResultContent>) -> Self {
        PromptMessage::Tool { content }
    }
}

/// User message part
#[derive(Debug, Clone, PartialEq)]
pub enum UserContent {
    Text(String),
    Image {
        data: ImageData,
        mime_type: Option<String>,
    },
}

/// Where an image's bytes come from
#[derive(Debug, Clone, PartialEq)]
pub enum ImageData {
    /// Remote URL passed through untouched
    Url(String),
    /// Already base64-encoded image bytes
    Base64(String),
}

/// Assistant message part
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantContent {
    Text(String),
    ToolCall {
        id: String,
        name: String,
        args: serde_json::Value,
    },
}

/// Result of a tool the assistant asked for
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResultContent {
    pub tool_call_id: String,
    pub tool_name: String,
    pub result: serde_json::Value,
}

impl ToolResultContent {
    pub fn new(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        result: serde_json::Value,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            result,
        }
    }
}

/// A function the model may call
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionTool {
    pub name: String,
    pub description: Option<String>,
    /// JSON schema of the parameters object
    pub parameters: serde_json::Value,
}

impl FunctionTool {
    pub fn new(name: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// How the model should pick among the offered tools
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Tool { tool_name: String },
}

/// Generation mode for a call
#[derive(Debug, Clone, PartialEq)]
pub enum CallMode {
    /// Free-form generation, optionally with tools
    Regular {
        tools: Vec<FunctionTool>,
        tool_choice: Option<ToolChoice>,
    },
    /// Ask the server for a JSON object response
    ObjectJson,
}

impl Default for CallMode {
    fn default() -> Self {
        CallMode::Regular {
            tools: Vec::new(),
            tool_choice: None,
        }
    }
}

/// Per-call options shared by the chat and completion models
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallOptions {
    pub prompt: Vec<PromptMessage>,
    pub mode: CallMode,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub stop_sequences: Option<Vec<String>>,
    pub seed: Option<i64>,
}

impl CallOptions {
    /// Create a new builder for CallOptions
    pub fn builder() -> CallOptionsBuilder {
        CallOptionsBuilder::default()
    }
}

/// Builder for CallOptions
#[derive(Debug, Default)]
pub struct CallOptionsBuilder {
    prompt: Vec<PromptMessage>,
    mode: Option<CallMode>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    top_p: Option<f32>,
    frequency_penalty: Option<f32>,
    presence_penalty: Option<f32>,
    stop_sequences: Option<Vec<String>>,
    seed: Option<i64>,
}

impl CallOptionsBuilder {
    pub fn message(mut self, message: PromptMessage) -> Self {
        self.prompt.push(message);
        self
    }

    pub fn messages(mut self, messages: Vec<PromptMessage>) -> Self {
        self.prompt.extend(messages);
        self
    }

    pub fn system(self, text: impl Into<String>) -> Self {
        self.message(PromptMessage::system(text))
    }

    pub fn user(self, text: impl Into<String>) -> Self {
        self.message(PromptMessage::user(text))
    }

    pub fn mode(mut self, mode: CallMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Shorthand for [`CallMode::Regular`]
    pub fn tools(mut self, tools: Vec<FunctionTool>, tool_choice: Option<ToolChoice>) -> Self {
        self.mode = Some(CallMode::Regular { tools, tool_choice });
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn frequency_penalty(mut self, penalty: f32) -> Self {
        self.frequency_penalty = Some(penalty);
        self
    }

    pub fn presence_penalty(mut self, penalty: f32) -> Self {
        self.presence_penalty = Some(penalty);
        self
    }

    pub fn stop_sequences(mut self, stop: Vec<String>) -> Self {
        self.stop_sequences = Some(stop);
        self
    }

    pub fn seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> crate::Result<CallOptions> {
        if self.prompt.is_empty() {
            return Err(crate::Error::invalid_input("prompt is required"));
        }

        Ok(CallOptions {
            prompt: self.prompt,
            mode: self.mode.unwrap_or_default(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
            stop_sequences: self.stop_sequences,
            seed: self.seed,
        })
    }
}

/// Token counters with missing values defaulted to zero
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl From<Option<&Usage>> for TokenUsage {
    fn from(usage: Option<&Usage>) -> Self {
        usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default()
    }
}

// ============================================================================
// REQUEST PAYLOADS
// ============================================================================

/// OpenAI API message format
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum OpenAIMessage {
    System {
        content: String,
    },
    User {
        content: Vec<OpenAIContentPart>,
    },
    Assistant {
        // Serialized as `null` when absent; the API expects the key.
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<OpenAIToolCall>>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

/// User content part in OpenAI format
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpenAIContentPart {
    Text { text: String },
    ImageUrl { image_url: OpenAIImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenAIImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// OpenAI tool call format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAIToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: OpenAIFunction,
}

/// OpenAI function format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAIFunction {
    pub name: String,
    pub arguments: String,
}

/// OpenAI tool definition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenAITool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: OpenAIFunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenAIFunctionDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: serde_json::Value,
}

/// OpenAI `tool_choice` field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OpenAIToolChoice {
    Mode(ToolChoiceMode),
    Function {
        #[serde(rename = "type")]
        choice_type: String,
        function: OpenAIFunctionName,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoiceMode {
    None,
    Auto,
    Required,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenAIFunctionName {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamOptions {
    pub include_usage: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: String,
}

/// Request body for `POST /chat/completions`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<OpenAIMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<OpenAIToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_logprobs: Option<u8>,
}

/// Request body for `POST /completions`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub echo: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// Request body for `POST /embeddings`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub input: Vec<String>,
    pub encoding_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

// ============================================================================
// RESPONSE SCHEMAS
// ============================================================================

/// Token usage as reported upstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

/// Non-streaming chat response
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    #[serde(default)]
    pub model: Option<String>,
    pub choices: Vec<ChatResponseChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponseChoice {
    pub index: u32,
    pub message: ChatResponseMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponseMessage {
    pub role: String,
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<OpenAIToolCall>>,
}

/// Streaming chat chunk
#[derive(Debug, Clone, Deserialize)]
pub struct ChatChunk {
    pub id: String,
    #[serde(default)]
    pub model: Option<String>,
    pub choices: Vec<ChatChunkChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// Choice in a streaming chat chunk
#[derive(Debug, Clone, Deserialize)]
pub struct ChatChunkChoice {
    pub index: u32,
    pub delta: ChatDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Delta in a streaming chat chunk
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// Tool call delta
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallDelta {
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "type")]
    pub call_type: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

/// Function delta
#[derive(Debug, Clone, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Completion response; streaming chunks share the same shape
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

pub type CompletionChunk = CompletionResponse;

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionChoice {
    pub text: String,
    pub index: u32,
    #[serde(default)]
    pub logprobs: Option<serde_json::Value>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Embedding response
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingResponse {
    pub data: Vec<EmbeddingData>,
    pub model: String,
    #[serde(default)]
    pub usage: Option<EmbeddingUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingData {
    pub embedding: Vec<f32>,
    pub index: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingUsage {
    pub prompt_tokens: u64,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}
