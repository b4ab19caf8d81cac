//! Classification of decoded stream messages into normalizer fragments.
//!
//! The SSE layer hands over one [`ParseResult`] per `data:` message. This module
//! turns each of them into an ordered batch of [`Fragment`]s, the only input the
//! [`StreamNormalizer`](crate::StreamNormalizer) understands:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hi","tool_calls":[{"index":0,...}]},"finish_reason":"tool_calls"}]}
//!     │
//!     │ classify_chat_chunk()
//!     ▼
//! [Text("Hi"), ToolCall { index: 0, .. }, Completion { reason: "tool_calls", .. }]
//! ```
//!
//! One upstream message can carry a text increment, several tool-call increments and
//! a finish reason at once. The batch always lists them in that order so that the
//! completion is processed after the increments it closes.

use crate::types::{ChatChunk, CompletionChunk, Usage};

/// Outcome of decoding one SSE message against a response schema
#[derive(Debug, Clone)]
pub enum ParseResult<T> {
    /// The payload matched the schema
    Parsed(T),
    /// The payload could not be decoded; kept only for diagnostics
    Malformed { raw: String, error: String },
}

impl<T> ParseResult<T> {
    pub fn is_parsed(&self) -> bool {
        matches!(self, ParseResult::Parsed(_))
    }
}

/// A single classified increment of a streamed response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Non-empty text increment
    Text(String),
    /// Partial function call, identified only by its positional index
    ToolCall {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    },
    /// The upstream finished generating this message
    Completion {
        reason: Option<String>,
        usage: Option<Usage>,
    },
    /// The message could not be interpreted and must be skipped
    Unrepresentable,
}

impl Fragment {
    /// Short label used in log messages
    pub fn kind(&self) -> &'static str {
        match self {
            Fragment::Text(_) => "text",
            Fragment::ToolCall { .. } => "tool-call",
            Fragment::Completion { .. } => "completion",
            Fragment::Unrepresentable => "unrepresentable",
        }
    }
}

/// Classifies a chat-completions chunk.
///
/// Only the first choice is considered. Empty strings count as absent, so an empty
/// `content` produces no text fragment and an empty `name` appends nothing.
pub fn classify_chat_chunk(result: ParseResult<ChatChunk>) -> Vec<Fragment> {
    let chunk = match result {
        ParseResult::Parsed(chunk) => chunk,
        ParseResult::Malformed { .. } => return vec![Fragment::Unrepresentable],
    };

    let ChatChunk { choices, usage, .. } = chunk;
    let Some(choice) = choices.into_iter().next() else {
        // Usage-only trailer or keep-alive chunk.
        return Vec::new();
    };

    let mut fragments = Vec::new();

    if let Some(content) = non_empty(choice.delta.content) {
        fragments.push(Fragment::Text(content));
    }

    for tool_call in choice.delta.tool_calls.unwrap_or_default() {
        let (name, arguments) = match tool_call.function {
            Some(function) => (non_empty(function.name), non_empty(function.arguments)),
            None => (None, None),
        };
        fragments.push(Fragment::ToolCall {
            index: tool_call.index,
            id: non_empty(tool_call.id),
            name,
            arguments,
        });
    }

    if let Some(reason) = non_empty(choice.finish_reason) {
        fragments.push(Fragment::Completion {
            reason: Some(reason),
            usage,
        });
    }

    fragments
}

/// Classifies a legacy text-completion chunk.
pub fn classify_completion_chunk(result: ParseResult<CompletionChunk>) -> Vec<Fragment> {
    let chunk = match result {
        ParseResult::Parsed(chunk) => chunk,
        ParseResult::Malformed { .. } => return vec![Fragment::Unrepresentable],
    };

    let CompletionChunk { choices, usage, .. } = chunk;
    let Some(choice) = choices.into_iter().next() else {
        return Vec::new();
    };

    let mut fragments = Vec::new();

    if !choice.text.is_empty() {
        fragments.push(Fragment::Text(choice.text));
    }

    if let Some(reason) = non_empty(choice.finish_reason) {
        fragments.push(Fragment::Completion {
            reason: Some(reason),
            usage,
        });
    }

    fragments
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}
