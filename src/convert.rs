//! Conversion from the caller's prompt vocabulary to OpenAI-compatible request payloads.

use crate::types::{
    AssistantContent, ImageData, OpenAIContentPart, OpenAIFunction, OpenAIFunctionDefinition,
    OpenAIFunctionName, OpenAIImageUrl, OpenAIMessage, OpenAITool, OpenAIToolCall,
    OpenAIToolChoice, FunctionTool, PromptMessage, ToolChoice, ToolChoiceMode, UserContent,
};

const DEFAULT_IMAGE_MIME_TYPE: &str = "image/png";

/// Converts a prompt into chat messages.
///
/// - System messages keep their text.
/// - User messages become content-part arrays (text and `image_url` parts).
/// - Assistant messages join their text parts; an assistant turn with no text sends
///   `content: null`. Tool calls are attached with arguments re-encoded as JSON.
/// - Every tool result becomes its own `tool` message.
pub fn convert_to_openai_messages(prompt: &[PromptMessage]) -> Vec<OpenAIMessage> {
    let mut messages = Vec::with_capacity(prompt.len());

    for message in prompt {
        match message {
            PromptMessage::System { content } => messages.push(OpenAIMessage::System {
                content: content.clone(),
            }),

            PromptMessage::User { content } => messages.push(OpenAIMessage::User {
                content: content.iter().map(convert_user_part).collect(),
            }),

            PromptMessage::Assistant { content } => {
                let text: String = content
                    .iter()
                    .filter_map(|part| match part {
                        AssistantContent::Text(text) => Some(text.as_str()),
                        AssistantContent::ToolCall { .. } => None,
                    })
                    .collect();

                let tool_calls: Vec<OpenAIToolCall> = content
                    .iter()
                    .filter_map(|part| match part {
                        AssistantContent::ToolCall { id, name, args } => Some(OpenAIToolCall {
                            id: id.clone(),
                            call_type: "function".to_string(),
                            function: OpenAIFunction {
                                name: name.clone(),
                                arguments: encode_json(args),
                            },
                        }),
                        AssistantContent::Text(_) => None,
                    })
                    .collect();

                messages.push(OpenAIMessage::Assistant {
                    content: (!text.is_empty()).then_some(text),
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                });
            }

            PromptMessage::Tool { content } => {
                for result in content {
                    let content = match &result.result {
                        serde_json::Value::String(s) => s.clone(),
                        other => encode_json(other),
                    };
                    messages.push(OpenAIMessage::Tool {
                        tool_call_id: result.tool_call_id.clone(),
                        content,
                    });
                }
            }
        }
    }

    messages
}

fn convert_user_part(part: &UserContent) -> OpenAIContentPart {
    match part {
        UserContent::Text(text) => OpenAIContentPart::Text { text: text.clone() },
        UserContent::Image { data, mime_type } => {
            let url = match data {
                ImageData::Url(url) => url.clone(),
                ImageData::Base64(encoded) => format!(
                    "data:{};base64,{}",
                    mime_type.as_deref().unwrap_or(DEFAULT_IMAGE_MIME_TYPE),
                    encoded
                ),
            };
            OpenAIContentPart::ImageUrl {
                image_url: OpenAIImageUrl { url, detail: None },
            }
        }
    }
}

fn encode_json(value: &serde_json::Value) -> String {
    // Serializing a Value cannot fail; keep the empty-object fallback anyway.
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

/// Converts function tools; `None` when there are none to send.
pub fn convert_to_openai_tools(tools: &[FunctionTool]) -> Option<Vec<OpenAITool>> {
    if tools.is_empty() {
        return None;
    }

    Some(
        tools
            .iter()
            .map(|tool| OpenAITool {
                tool_type: "function".to_string(),
                function: OpenAIFunctionDefinition {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                },
            })
            .collect(),
    )
}

pub fn convert_to_openai_tool_choice(tool_choice: Option<&ToolChoice>) -> Option<OpenAIToolChoice> {
    let choice = match tool_choice? {
        ToolChoice::None => OpenAIToolChoice::Mode(ToolChoiceMode::None),
        ToolChoice::Auto => OpenAIToolChoice::Mode(ToolChoiceMode::Auto),
        ToolChoice::Required => OpenAIToolChoice::Mode(ToolChoiceMode::Required),
        ToolChoice::Tool { tool_name } => OpenAIToolChoice::Function {
            choice_type: "function".to_string(),
            function: OpenAIFunctionName {
                name: tool_name.clone(),
            },
        },
    };
    Some(choice)
}

/// Flattens a prompt into a single completion prompt.
///
/// System content and the text parts of user and assistant messages are joined with
/// blank lines. Images, tool calls and tool results have no textual form and are
/// skipped.
pub fn prompt_to_text(prompt: &[PromptMessage]) -> String {
    let mut parts: Vec<&str> = Vec::new();

    for message in prompt {
        match message {
            PromptMessage::System { content } => parts.push(content),
            PromptMessage::User { content } => {
                parts.extend(content.iter().filter_map(|part| match part {
                    UserContent::Text(text) => Some(text.as_str()),
                    UserContent::Image { .. } => None,
                }));
            }
            PromptMessage::Assistant { content } => {
                parts.extend(content.iter().filter_map(|part| match part {
                    AssistantContent::Text(text) => Some(text.as_str()),
                    AssistantContent::ToolCall { .. } => None,
                }));
            }
            PromptMessage::Tool { .. } => {}
        }
    }

    parts.join("\n\n")
}
