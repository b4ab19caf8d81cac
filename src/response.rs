//! Single-shot (non-streaming) results.

use crate::finish_reason::{FinishReason, map_completion_finish_reason, map_finish_reason};
use crate::normalizer::ToolCall;
use crate::types::{ChatResponse, CompletionResponse, TokenUsage};
use crate::utils::generate_id;
use crate::{Error, Result};

/// The outcome of a non-streaming generation
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateResult {
    /// Generated text; `None` when the model produced none
    pub text: Option<String>,
    /// Requested function calls in the order the upstream listed them
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub raw_finish_reason: Option<String>,
    pub usage: TokenUsage,
}

impl GenerateResult {
    /// Builds a result from a chat response.
    ///
    /// Only the first choice is read. Unlike the streaming path every tool call is
    /// kept, whatever its name.
    pub fn from_chat_response(response: ChatResponse) -> Result<Self> {
        let usage = TokenUsage::from(response.usage.as_ref());
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::api("response contained no choices"))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| {
                let id = if call.id.is_empty() {
                    generate_id()
                } else {
                    call.id
                };
                ToolCall::new(id, call.function.name, call.function.arguments)
            })
            .collect();

        Ok(Self {
            text: choice.message.content,
            tool_calls,
            finish_reason: map_finish_reason(choice.finish_reason.as_deref()),
            raw_finish_reason: choice.finish_reason,
            usage,
        })
    }

    /// Builds a result from a text-completion response.
    pub fn from_completion_response(response: CompletionResponse) -> Result<Self> {
        let usage = TokenUsage::from(response.usage.as_ref());
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::api("response contained no choices"))?;

        Ok(Self {
            text: (!choice.text.is_empty()).then_some(choice.text),
            tool_calls: Vec::new(),
            finish_reason: map_completion_finish_reason(choice.finish_reason.as_deref()),
            raw_finish_reason: choice.finish_reason,
            usage,
        })
    }
}
