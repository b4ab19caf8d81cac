//! Canonical finish-reason vocabulary.
//!
//! Upstream servers report why generation stopped with free-form strings
//! (`"stop"`, `"tool_calls"`, vendor-specific values, or nothing at all). Two
//! mappings turn those into [`FinishReason`]:
//!
//! - [`map_finish_reason`]: the full vocabulary used by the chat endpoint.
//! - [`map_completion_finish_reason`]: the coarse vocabulary used by the
//!   legacy completion endpoint, which only distinguishes `stop` and `length`.
//!
//! Both are total: every input, including `None`, maps to exactly one tag.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Other,
    Unknown,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ToolCalls => "tool-calls",
            FinishReason::ContentFilter => "content-filter",
            FinishReason::Other => "other",
            FinishReason::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which vocabulary a stream maps its finish reasons through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishVocabulary {
    /// stop, length, tool-calls, content-filter, unknown
    Full,
    /// stop, length, other
    Coarse,
}

impl FinishVocabulary {
    pub fn map(&self, raw: Option<&str>) -> FinishReason {
        match self {
            FinishVocabulary::Full => map_finish_reason(raw),
            FinishVocabulary::Coarse => map_completion_finish_reason(raw),
        }
    }
}

/// Maps a chat finish reason onto the full vocabulary.
///
/// ```
/// use apertis::{map_finish_reason, FinishReason};
///
/// assert_eq!(map_finish_reason(Some("tool_calls")), FinishReason::ToolCalls);
/// assert_eq!(map_finish_reason(None), FinishReason::Unknown);
/// ```
pub fn map_finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some("tool_calls") => FinishReason::ToolCalls,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Unknown,
    }
}

/// Maps a completion finish reason onto the coarse vocabulary.
pub fn map_completion_finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        _ => FinishReason::Other,
    }
}
