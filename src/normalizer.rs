//! Incremental response normalizer.
//!
//! Upstream servers fragment a response however they like: text arrives in
//! arbitrary slices, and a single tool call's name and JSON arguments can be spread
//! over many chunks, interleaved with other tool calls that are told apart only by a
//! positional `index`:
//!
//! ```text
//! Chunk 1: tool_calls: [{ index: 1, function: { name: "get_" } }]
//! Chunk 2: tool_calls: [{ index: 0, id: "call_a", function: { name: "search" } }]
//! Chunk 3: tool_calls: [{ index: 1, function: { name: "time", arguments: "{}" } }]
//! Chunk 4: tool_calls: [{ index: 0, function: { arguments: "{\"q\":\"rust\"}" } }]
//! Chunk 5: finish_reason: "tool_calls"
//! ```
//!
//! [`StreamNormalizer`] turns that into a canonical event sequence:
//!
//! ```text
//! ToolCall { id: "call_a", name: "search", arguments: "{\"q\":\"rust\"}" }   // index 0
//! ToolCall { id: <generated>, name: "get_time", arguments: "{}" }            // index 1
//! Finish { finish_reason: ToolCalls, .. }
//! ```
//!
//! # Rules
//!
//! - Text increments are forwarded immediately, one delta per increment. In the
//!   [`StreamVariant::Completion`] variant text is additionally wrapped in a span
//!   (`TextStart` before the first delta, `TextEnd` at completion or flush).
//! - Tool calls are buffered per index and only surfaced at completion, because the
//!   upstream gives no per-call "done" signal. They are emitted in ascending index
//!   order, immediately before the `Finish` event.
//! - A buffer that never received a name is dropped at flush; one with empty
//!   arguments is kept.
//! - If the stream ends without a completion, [`StreamNormalizer::finish_stream`]
//!   closes the span and flushes the buffers but synthesizes no `Finish`.
//! - Once completed or flushed, every further fragment is rejected with a warning.

use crate::finish_reason::{FinishReason, FinishVocabulary};
use crate::fragment::Fragment;
use crate::types::{TokenUsage, Usage};
use crate::utils::generate_id;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Canonical event produced by the normalizer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    /// A text span opened (span-modeling variant only)
    TextStart { id: String },
    /// One text increment, forwarded verbatim
    TextDelta {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        delta: String,
    },
    /// The text span closed (span-modeling variant only)
    TextEnd { id: String },
    /// A fully assembled function call
    ToolCall(ToolCall),
    /// Generation finished with an explicit reason.
    ///
    /// `usage` is whatever the chunk carrying the finish reason reported. A
    /// usage-only trailer (`choices: []`) arriving after it produces no event, so
    /// servers that report usage only there leave `usage` at zero.
    Finish {
        finish_reason: FinishReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        raw_finish_reason: Option<String>,
        usage: TokenUsage,
    },
}

/// A complete function call as requested by the model.
///
/// `arguments` is the raw JSON text exactly as the upstream produced it. Use
/// [`ToolCall::input`] to parse it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parses the accumulated arguments as JSON.
    ///
    /// Empty arguments are treated as an empty object, since servers commonly omit
    /// them for zero-parameter functions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the arguments are not valid JSON, which usually
    /// means the stream was cut off mid-call.
    pub fn input(&self) -> Result<serde_json::Value> {
        if self.arguments.trim().is_empty() {
            return Ok(serde_json::json!({}));
        }
        serde_json::from_str(&self.arguments).map_err(Error::Json)
    }
}

/// Which upstream protocol a normalizer serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamVariant {
    /// `/chat/completions`: bare text deltas, tool calls, full finish vocabulary
    Chat,
    /// `/completions`: span-wrapped text deltas, coarse finish vocabulary
    Completion,
}

impl StreamVariant {
    pub fn models_text_spans(&self) -> bool {
        matches!(self, StreamVariant::Completion)
    }

    pub fn vocabulary(&self) -> FinishVocabulary {
        match self {
            StreamVariant::Chat => FinishVocabulary::Full,
            StreamVariant::Completion => FinishVocabulary::Coarse,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Streaming,
    /// An explicit completion signal was handled
    Completed,
    /// The transport ended without one and the buffers were flushed
    Flushed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Streaming => "streaming",
            Phase::Completed => "completed",
            Phase::Flushed => "flushed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TextSpan {
    Unopened,
    /// `id` is `None` when the variant does not model spans
    Open { id: Option<String> },
    Closed,
}

/// In-flight tool call for one upstream index
#[derive(Debug, Clone)]
struct ToolCallBuffer {
    id: String,
    /// False while `id` is still a local placeholder
    id_from_upstream: bool,
    name: String,
    arguments: String,
}

impl ToolCallBuffer {
    fn new(id: String, id_from_upstream: bool) -> Self {
        Self {
            id,
            id_from_upstream,
            name: String::new(),
            arguments: String::new(),
        }
    }

    /// Flush policy: a call without a name cannot be dispatched, so it is dropped.
    /// Empty arguments are valid for zero-parameter functions and are kept.
    fn is_emittable(&self) -> bool {
        !self.name.is_empty()
    }

    fn into_tool_call(self) -> ToolCall {
        ToolCall {
            id: self.id,
            name: self.name,
            arguments: self.arguments,
        }
    }
}

type IdGenerator = Box<dyn FnMut() -> String + Send>;

/// Per-stream aggregation state machine.
///
/// Build one per response stream and feed it every classified fragment in arrival
/// order, then call [`finish_stream`](Self::finish_stream) when the transport ends.
///
/// ```
/// use apertis::{Fragment, StreamEvent, StreamNormalizer};
///
/// let mut normalizer = StreamNormalizer::chat();
/// let mut events = Vec::new();
///
/// for fragment in [
///     Fragment::ToolCall { index: 0, id: None, name: Some("get_".into()), arguments: None },
///     Fragment::ToolCall { index: 0, id: None, name: Some("time".into()), arguments: Some("{}".into()) },
///     Fragment::Completion { reason: Some("stop".into()), usage: None },
/// ] {
///     events.extend(normalizer.handle(fragment));
/// }
/// events.extend(normalizer.finish_stream());
///
/// assert_eq!(events.len(), 2);
/// assert!(matches!(&events[0], StreamEvent::ToolCall(call) if call.name == "get_time"));
/// ```
pub struct StreamNormalizer {
    variant: StreamVariant,
    phase: Phase,
    text: TextSpan,
    tool_calls: BTreeMap<u32, ToolCallBuffer>,
    generate_id: IdGenerator,
}

impl fmt::Debug for StreamNormalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamNormalizer")
            .field("variant", &self.variant)
            .field("phase", &self.phase)
            .field("text", &self.text)
            .field("tool_calls", &self.tool_calls)
            .finish_non_exhaustive()
    }
}

impl StreamNormalizer {
    pub fn new(variant: StreamVariant) -> Self {
        Self::with_id_generator(variant, generate_id)
    }

    pub fn chat() -> Self {
        Self::new(StreamVariant::Chat)
    }

    pub fn completion() -> Self {
        Self::new(StreamVariant::Completion)
    }

    /// Uses `generate` for placeholder tool-call ids and text span ids.
    pub fn with_id_generator<F>(variant: StreamVariant, generate: F) -> Self
    where
        F: FnMut() -> String + Send + 'static,
    {
        Self {
            variant,
            phase: Phase::Streaming,
            text: TextSpan::Unopened,
            tool_calls: BTreeMap::new(),
            generate_id: Box::new(generate),
        }
    }

    pub fn variant(&self) -> StreamVariant {
        self.variant
    }

    /// True once a completion signal or the end-of-stream flush has been handled
    pub fn is_finished(&self) -> bool {
        self.phase != Phase::Streaming
    }

    /// Number of tool calls currently buffered
    pub fn pending_tool_calls(&self) -> usize {
        self.tool_calls.len()
    }

    /// Consumes one fragment and returns the events it triggers, in order.
    pub fn handle(&mut self, fragment: Fragment) -> Vec<StreamEvent> {
        match fragment {
            Fragment::Unrepresentable => {
                log::debug!("skipping unrepresentable stream fragment");
                Vec::new()
            }
            other if self.phase != Phase::Streaming => {
                log::warn!(
                    "dropping {} fragment received after the stream was {}",
                    other.kind(),
                    self.phase
                );
                Vec::new()
            }
            Fragment::Text(delta) => self.handle_text(delta),
            Fragment::ToolCall {
                index,
                id,
                name,
                arguments,
            } => {
                self.handle_tool_call(index, id, name, arguments);
                Vec::new()
            }
            Fragment::Completion { reason, usage } => self.handle_completion(reason, usage),
        }
    }

    /// Runs the end-of-stream flush.
    ///
    /// Closes an open text span and emits every buffered tool call that has a name,
    /// without a `Finish` event. Calling it after a completion, or a second time,
    /// returns nothing.
    pub fn finish_stream(&mut self) -> Vec<StreamEvent> {
        if self.phase != Phase::Streaming {
            return Vec::new();
        }

        let events = self.close_open_units();
        self.phase = Phase::Flushed;
        log::debug!(
            "stream ended without a finish reason, flushed {} event(s)",
            events.len()
        );
        events
    }

    fn handle_text(&mut self, delta: String) -> Vec<StreamEvent> {
        if delta.is_empty() {
            return Vec::new();
        }

        let mut events = Vec::with_capacity(2);

        if self.text == TextSpan::Unopened {
            let id = self.variant.models_text_spans().then(|| (self.generate_id)());
            if let Some(id) = &id {
                events.push(StreamEvent::TextStart { id: id.clone() });
            }
            self.text = TextSpan::Open { id };
        }

        let TextSpan::Open { id } = &self.text else {
            log::warn!("dropping text increment for a closed text span");
            return Vec::new();
        };

        events.push(StreamEvent::TextDelta {
            id: id.clone(),
            delta,
        });
        events
    }

    fn handle_tool_call(
        &mut self,
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    ) {
        let generate_id = &mut self.generate_id;
        let buffer = self.tool_calls.entry(index).or_insert_with(|| match &id {
            Some(id) => ToolCallBuffer::new(id.clone(), true),
            None => ToolCallBuffer::new(generate_id(), false),
        });

        if let Some(id) = id {
            if !buffer.id_from_upstream {
                buffer.id = id;
                buffer.id_from_upstream = true;
            } else if buffer.id != id {
                log::warn!(
                    "ignoring conflicting id {:?} for tool call at index {} (keeping {:?})",
                    id,
                    index,
                    buffer.id
                );
            }
        }

        if let Some(name) = name {
            buffer.name.push_str(&name);
        }

        if let Some(arguments) = arguments {
            buffer.arguments.push_str(&arguments);
        }
    }

    fn handle_completion(&mut self, reason: Option<String>, usage: Option<Usage>) -> Vec<StreamEvent> {
        let mut events = self.close_open_units();

        events.push(StreamEvent::Finish {
            finish_reason: self.variant.vocabulary().map(reason.as_deref()),
            raw_finish_reason: reason,
            usage: TokenUsage::from(usage.as_ref()),
        });

        self.phase = Phase::Completed;
        events
    }

    /// Closes the text span and drains the tool-call buffers in ascending index order.
    fn close_open_units(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if let TextSpan::Open { id } = &mut self.text {
            let id = id.take();
            self.text = TextSpan::Closed;
            if let Some(id) = id {
                events.push(StreamEvent::TextEnd { id });
            }
        }

        for (index, buffer) in std::mem::take(&mut self.tool_calls) {
            if buffer.is_emittable() {
                events.push(StreamEvent::ToolCall(buffer.into_tool_call()));
            } else {
                log::debug!(
                    "dropping tool call at index {} (id {:?}): no name was streamed",
                    index,
                    buffer.id
                );
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequential_ids(prefix: &'static str) -> impl FnMut() -> String + Send + 'static {
        let mut next = 0;
        move || {
            next += 1;
            format!("{}_{}", prefix, next)
        }
    }

    fn text(s: &str) -> Fragment {
        Fragment::Text(s.to_string())
    }

    fn tool(index: u32, id: Option<&str>, name: Option<&str>, arguments: Option<&str>) -> Fragment {
        Fragment::ToolCall {
            index,
            id: id.map(str::to_string),
            name: name.map(str::to_string),
            arguments: arguments.map(str::to_string),
        }
    }

    fn completion(reason: Option<&str>) -> Fragment {
        Fragment::Completion {
            reason: reason.map(str::to_string),
            usage: None,
        }
    }

    fn run(normalizer: &mut StreamNormalizer, fragments: Vec<Fragment>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for fragment in fragments {
            events.extend(normalizer.handle(fragment));
        }
        events.extend(normalizer.finish_stream());
        events
    }

    #[test]
    fn test_chat_text_is_forwarded_without_spans() {
        let mut normalizer = StreamNormalizer::chat();
        let events = run(
            &mut normalizer,
            vec![text("Hel"), text("lo"), completion(Some("stop"))],
        );

        assert_eq!(
            events,
            vec![
                StreamEvent::TextDelta {
                    id: None,
                    delta: "Hel".to_string()
                },
                StreamEvent::TextDelta {
                    id: None,
                    delta: "lo".to_string()
                },
                StreamEvent::Finish {
                    finish_reason: FinishReason::Stop,
                    raw_finish_reason: Some("stop".to_string()),
                    usage: TokenUsage::default(),
                },
            ]
        );
    }

    #[test]
    fn test_completion_text_is_wrapped_in_one_span() {
        let mut normalizer =
            StreamNormalizer::with_id_generator(StreamVariant::Completion, sequential_ids("txt"));
        let events = run(
            &mut normalizer,
            vec![text("a"), text("b"), text("c"), completion(Some("length"))],
        );

        assert_eq!(events.len(), 6);
        assert_eq!(
            events[0],
            StreamEvent::TextStart {
                id: "txt_1".to_string()
            }
        );
        for (event, expected) in events[1..4].iter().zip(["a", "b", "c"]) {
            assert_eq!(
                event,
                &StreamEvent::TextDelta {
                    id: Some("txt_1".to_string()),
                    delta: expected.to_string()
                }
            );
        }
        assert_eq!(
            events[4],
            StreamEvent::TextEnd {
                id: "txt_1".to_string()
            }
        );
        assert!(matches!(
            events[5],
            StreamEvent::Finish {
                finish_reason: FinishReason::Length,
                ..
            }
        ));
    }

    #[test]
    fn test_abrupt_close_closes_span_without_finish() {
        let mut normalizer =
            StreamNormalizer::with_id_generator(StreamVariant::Completion, sequential_ids("txt"));
        let events = run(&mut normalizer, vec![text("Hel"), text("lo")]);

        let deltas = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::TextDelta { .. }))
            .count();
        let ends = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::TextEnd { .. }))
            .count();
        let finishes = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::Finish { .. }))
            .count();

        assert_eq!(deltas, 2);
        assert_eq!(ends, 1);
        assert_eq!(finishes, 0);
        assert!(normalizer.is_finished());
    }

    #[test]
    fn test_tool_call_name_and_arguments_are_concatenated() {
        let mut normalizer = StreamNormalizer::chat();
        let events = run(
            &mut normalizer,
            vec![
                tool(0, None, Some("get_"), None),
                tool(0, None, Some("time"), None),
                tool(0, None, None, Some("{}")),
                completion(Some("stop")),
            ],
        );

        assert_eq!(events.len(), 2);
        match &events[0] {
            StreamEvent::ToolCall(call) => {
                assert_eq!(call.name, "get_time");
                assert_eq!(call.arguments, "{}");
            }
            other => panic!("Expected tool call, got {:?}", other),
        }
        assert!(matches!(
            events[1],
            StreamEvent::Finish {
                finish_reason: FinishReason::Stop,
                ..
            }
        ));
    }

    #[test]
    fn test_tool_calls_emitted_in_ascending_index_order() {
        let mut normalizer = StreamNormalizer::chat();
        let events = run(
            &mut normalizer,
            vec![
                tool(1, Some("call_b"), Some("second"), Some("{\"x\"")),
                tool(0, Some("call_a"), Some("first"), None),
                tool(1, None, None, Some(":1}")),
                tool(0, None, None, Some("{}")),
                completion(Some("tool_calls")),
            ],
        );

        let calls: Vec<&ToolCall> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolCall(call) => Some(call),
                _ => None,
            })
            .collect();

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], &ToolCall::new("call_a", "first", "{}"));
        assert_eq!(calls[1], &ToolCall::new("call_b", "second", "{\"x\":1}"));
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Finish {
                finish_reason: FinishReason::ToolCalls,
                ..
            })
        ));
    }

    #[test]
    fn test_nameless_tool_call_is_dropped() {
        let mut normalizer = StreamNormalizer::chat();
        let events = run(
            &mut normalizer,
            vec![
                tool(0, Some("call_orphan"), None, Some("{\"a\":1}")),
                completion(Some("tool_calls")),
            ],
        );

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], StreamEvent::Finish { .. }));
        assert_eq!(normalizer.pending_tool_calls(), 0);
    }

    #[test]
    fn test_tool_call_with_empty_arguments_is_kept() {
        let mut normalizer = StreamNormalizer::chat();
        let events = run(
            &mut normalizer,
            vec![tool(0, Some("call_1"), Some("ping"), None)],
        );

        assert_eq!(events, vec![StreamEvent::ToolCall(ToolCall::new("call_1", "ping", ""))]);
    }

    #[test]
    fn test_placeholder_id_replaced_by_first_upstream_id() {
        let mut normalizer =
            StreamNormalizer::with_id_generator(StreamVariant::Chat, sequential_ids("gen"));
        let events = run(
            &mut normalizer,
            vec![
                tool(0, None, Some("a"), None),
                tool(0, Some("call_real"), None, None),
                tool(0, Some("call_other"), None, None),
                tool(1, None, Some("b"), None),
            ],
        );

        assert_eq!(
            events,
            vec![
                StreamEvent::ToolCall(ToolCall::new("call_real", "a", "")),
                StreamEvent::ToolCall(ToolCall::new("gen_2", "b", "")),
            ]
        );
    }

    #[test]
    fn test_flush_after_completion_is_a_no_op() {
        let mut normalizer = StreamNormalizer::chat();
        normalizer.handle(tool(0, None, Some("f"), None));
        let completed = normalizer.handle(completion(Some("tool_calls")));
        assert_eq!(completed.len(), 2);

        assert!(normalizer.finish_stream().is_empty());
        assert!(normalizer.finish_stream().is_empty());
    }

    #[test]
    fn test_fragments_after_completion_are_rejected() {
        let mut normalizer = StreamNormalizer::chat();
        normalizer.handle(completion(Some("stop")));

        assert!(normalizer.handle(text("late")).is_empty());
        assert!(normalizer.handle(tool(0, None, Some("late"), None)).is_empty());
        assert!(normalizer.handle(completion(Some("stop"))).is_empty());
        assert_eq!(normalizer.pending_tool_calls(), 0);
        assert!(normalizer.finish_stream().is_empty());
    }

    #[test]
    fn test_fragments_after_flush_are_rejected() {
        let mut normalizer = StreamNormalizer::chat();
        normalizer.handle(text("a"));
        assert!(normalizer.finish_stream().is_empty());
        assert!(normalizer.handle(tool(0, None, Some("late"), None)).is_empty());
        assert_eq!(normalizer.pending_tool_calls(), 0);
    }

    #[test]
    fn test_unrepresentable_fragments_are_skipped() {
        let mut normalizer = StreamNormalizer::chat();
        let events = run(
            &mut normalizer,
            vec![
                text("a"),
                Fragment::Unrepresentable,
                text("b"),
                completion(Some("stop")),
                Fragment::Unrepresentable,
            ],
        );
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn test_finish_carries_usage_and_unknown_reason() {
        let mut normalizer = StreamNormalizer::chat();
        let events = normalizer.handle(Fragment::Completion {
            reason: Some("eos_token".to_string()),
            usage: Some(Usage {
                prompt_tokens: 3,
                completion_tokens: 9,
                total_tokens: Some(12),
            }),
        });

        assert_eq!(
            events,
            vec![StreamEvent::Finish {
                finish_reason: FinishReason::Unknown,
                raw_finish_reason: Some("eos_token".to_string()),
                usage: TokenUsage::new(3, 9),
            }]
        );
    }

    #[test]
    fn test_completion_variant_uses_coarse_vocabulary() {
        let mut normalizer = StreamNormalizer::completion();
        let events = normalizer.handle(completion(Some("content_filter")));
        assert!(matches!(
            events[0],
            StreamEvent::Finish {
                finish_reason: FinishReason::Other,
                ..
            }
        ));
    }

    #[test]
    fn test_tool_call_input_parsing() {
        let call = ToolCall::new("c", "f", r#"{"city":"Paris"}"#);
        assert_eq!(call.input().unwrap()["city"], "Paris");

        let empty = ToolCall::new("c", "f", "");
        assert_eq!(empty.input().unwrap(), serde_json::json!({}));

        let truncated = ToolCall::new("c", "f", r#"{"city":"Par"#);
        assert!(matches!(truncated.input(), Err(Error::Json(_))));
    }

    #[test]
    fn test_stream_event_serialization() {
        let event = StreamEvent::TextDelta {
            id: None,
            delta: "hi".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"type": "text-delta", "delta": "hi"})
        );

        let event = StreamEvent::ToolCall(ToolCall::new("c", "f", "{}"));
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"type": "tool-call", "id": "c", "name": "f", "arguments": "{}"})
        );
    }
}
