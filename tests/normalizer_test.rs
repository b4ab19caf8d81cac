//! Behavioural tests for the stream normalizer
//!
//! Covers the canonical scenarios, plus property tests for the ordering and
//! concatenation guarantees over generated fragment sequences.

use apertis::{
    FinishReason, Fragment, StreamEvent, StreamNormalizer, StreamVariant, TokenUsage, ToolCall,
    Usage, map_completion_finish_reason, map_finish_reason,
};
use proptest::prelude::*;
use std::collections::VecDeque;

fn init_logger() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}

fn counter_ids(variant: StreamVariant) -> StreamNormalizer {
    let mut next = 0;
    StreamNormalizer::with_id_generator(variant, move || {
        next += 1;
        format!("gen_{}", next)
    })
}

fn tool(index: u32, id: Option<&str>, name: Option<&str>, arguments: Option<&str>) -> Fragment {
    Fragment::ToolCall {
        index,
        id: id.map(String::from),
        name: name.map(String::from),
        arguments: arguments.map(String::from),
    }
}

fn completion(reason: &str) -> Fragment {
    Fragment::Completion {
        reason: Some(reason.to_string()),
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

fn finish_count(events: &[StreamEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Finish { .. }))
        .count()
}

#[test]
fn test_scenario_get_time() {
    init_logger();

    let mut normalizer = counter_ids(StreamVariant::Chat);
    let events = run(
        &mut normalizer,
        vec![
            tool(0, None, Some("get_"), None),
            tool(0, None, Some("time"), None),
            tool(0, None, None, Some("{}")),
            completion("stop"),
        ],
    );

    assert_eq!(
        events,
        vec![
            StreamEvent::ToolCall(ToolCall::new("gen_1", "get_time", "{}")),
            StreamEvent::Finish {
                finish_reason: FinishReason::Stop,
                raw_finish_reason: Some("stop".to_string()),
                usage: TokenUsage::default(),
            },
        ]
    );
}

#[test]
fn test_scenario_abrupt_close_after_text() {
    let mut normalizer = counter_ids(StreamVariant::Completion);
    let events = run(
        &mut normalizer,
        vec![Fragment::Text("Hel".to_string()), Fragment::Text("lo".to_string())],
    );

    assert_eq!(
        events,
        vec![
            StreamEvent::TextStart {
                id: "gen_1".to_string()
            },
            StreamEvent::TextDelta {
                id: Some("gen_1".to_string()),
                delta: "Hel".to_string(),
            },
            StreamEvent::TextDelta {
                id: Some("gen_1".to_string()),
                delta: "lo".to_string(),
            },
            StreamEvent::TextEnd {
                id: "gen_1".to_string()
            },
        ]
    );
    assert_eq!(finish_count(&events), 0);
    assert!(normalizer.is_finished());
}

#[test]
fn test_scenario_interleaved_indices() {
    let mut normalizer = StreamNormalizer::chat();
    let events = run(
        &mut normalizer,
        vec![
            tool(1, Some("call_b"), Some("lookup"), Some("{\"k\":")),
            tool(0, Some("call_a"), Some("search"), None),
            tool(1, None, None, Some("1}")),
            tool(0, None, None, Some("{\"q\":\"rust\"}")),
            completion("tool_calls"),
        ],
    );

    assert_eq!(
        events,
        vec![
            StreamEvent::ToolCall(ToolCall::new("call_a", "search", "{\"q\":\"rust\"}")),
            StreamEvent::ToolCall(ToolCall::new("call_b", "lookup", "{\"k\":1}")),
            StreamEvent::Finish {
                finish_reason: FinishReason::ToolCalls,
                raw_finish_reason: Some("tool_calls".to_string()),
                usage: TokenUsage::default(),
            },
        ]
    );
}

fn split_chars(text: &str, piece_len: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(piece_len).map(|c| c.iter().collect()).collect()
}

/// Fragments for one tool call: the first carries the id, then the name and the
/// arguments arrive in pieces.
fn tool_call_fragments(index: u32, name: &str, arguments: &str, piece_len: usize) -> Vec<Fragment> {
    let mut fragments: Vec<Fragment> = split_chars(name, piece_len)
        .into_iter()
        .map(|piece| tool(index, None, Some(piece.as_str()), None))
        .collect();
    if let Some(Fragment::ToolCall { id, .. }) = fragments.first_mut() {
        *id = Some(format!("call_{}", index));
    }
    fragments.extend(
        split_chars(arguments, piece_len)
            .into_iter()
            .map(|piece| tool(index, None, None, Some(piece.as_str()))),
    );
    fragments
}

/// Merges per-index queues, letting `picks` choose which queue advances next.
/// Relative order within a queue is preserved.
fn interleave(mut queues: Vec<VecDeque<Fragment>>, picks: &[prop::sample::Index]) -> Vec<Fragment> {
    let mut merged = Vec::new();
    let mut picks = picks.iter().cycle();

    loop {
        let open: Vec<usize> = (0..queues.len()).filter(|i| !queues[*i].is_empty()).collect();
        if open.is_empty() {
            return merged;
        }
        let chosen = picks.next().map(|pick| open[pick.index(open.len())]).unwrap_or(open[0]);
        merged.extend(queues[chosen].pop_front());
    }
}

proptest! {
    #[test]
    fn test_text_is_forwarded_in_order(
        increments in prop::collection::vec("\\PC{1,12}", 1..16),
        span_modeling in any::<bool>(),
    ) {
        let variant = if span_modeling { StreamVariant::Completion } else { StreamVariant::Chat };
        let mut fragments: Vec<Fragment> =
            increments.iter().map(|s| Fragment::Text(s.clone())).collect();
        fragments.push(completion("stop"));

        let events = run(&mut StreamNormalizer::new(variant), fragments);

        let deltas: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::TextDelta { delta, .. } => Some(delta.as_str()),
                _ => None,
            })
            .collect();
        prop_assert_eq!(&deltas, &increments);

        let starts = events.iter().filter(|e| matches!(e, StreamEvent::TextStart { .. })).count();
        let ends = events.iter().filter(|e| matches!(e, StreamEvent::TextEnd { .. })).count();
        if span_modeling {
            prop_assert_eq!((starts, ends), (1, 1));
            prop_assert!(matches!(events.first(), Some(StreamEvent::TextStart { .. })), "{}", stringify!(matches!(events.first(), Some(StreamEvent::TextStart { .. }))));
            prop_assert!(matches!(events[events.len() - 2], StreamEvent::TextEnd { .. }), "{}", stringify!(matches!(events[events.len() - 2], StreamEvent::TextEnd { .. })));
        } else {
            prop_assert_eq!((starts, ends), (0, 0));
        }
        prop_assert_eq!(finish_count(&events), 1);
        prop_assert!(matches!(events.last(), Some(StreamEvent::Finish { .. })), "{}", stringify!(matches!(events.last(), Some(StreamEvent::Finish { .. }))));
    }

    #[test]
    fn test_interleaved_tool_calls_are_assembled_in_ascending_order(
        calls in prop::collection::btree_map(0u32..32, ("[a-z_]{1,12}", "[ -~]{0,32}"), 1..6),
        piece_len in 1usize..6,
        picks in prop::collection::vec(any::<prop::sample::Index>(), 1..64),
        complete in any::<bool>(),
    ) {
        let queues: Vec<VecDeque<Fragment>> = calls
            .iter()
            .map(|(index, (name, arguments))| {
                tool_call_fragments(*index, name, arguments, piece_len).into()
            })
            .collect();

        let mut fragments = interleave(queues, &picks);
        if complete {
            fragments.push(completion("tool_calls"));
        }

        let mut normalizer = StreamNormalizer::chat();
        let mut events = run(&mut normalizer, fragments);
        events.extend(normalizer.finish_stream());

        let assembled: Vec<&ToolCall> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolCall(call) => Some(call),
                _ => None,
            })
            .collect();
        prop_assert_eq!(assembled.len(), calls.len());

        // BTreeMap iteration is ascending by index
        for (call, (index, (name, arguments))) in assembled.iter().zip(&calls) {
            prop_assert_eq!(&call.id, &format!("call_{}", index));
            prop_assert_eq!(&call.name, name);
            prop_assert_eq!(&call.arguments, arguments);
        }

        prop_assert_eq!(finish_count(&events), usize::from(complete));
        prop_assert_eq!(normalizer.pending_tool_calls(), 0);
    }

    #[test]
    fn test_finish_mapping_accepts_any_reason(reason in proptest::option::of(".{0,20}")) {
        let full = map_finish_reason(reason.as_deref());
        let coarse = map_completion_finish_reason(reason.as_deref());

        prop_assert!(matches!(
            full,
            FinishReason::Stop
                | FinishReason::Length
                | FinishReason::ToolCalls
                | FinishReason::ContentFilter
                | FinishReason::Unknown
        ));
        prop_assert!(matches!(
            coarse,
            FinishReason::Stop | FinishReason::Length | FinishReason::Other
        ));
    }
}

#[test]
fn test_nameless_buffers_are_never_emitted() {
    // Index 1 only ever receives an id and arguments
    let fragments = vec![
        tool(0, Some("call_0"), Some("named"), Some("{}")),
        tool(1, Some("call_1"), None, Some("{\"orphan\":true}")),
        tool(2, None, Some(""), Some("{}")),
    ];

    for terminate_with_completion in [true, false] {
        let mut all = fragments.clone();
        if terminate_with_completion {
            all.push(completion("tool_calls"));
        }

        let events = run(&mut StreamNormalizer::chat(), all);
        let calls: Vec<&ToolCall> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolCall(call) => Some(call),
                _ => None,
            })
            .collect();

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_0");
    }
}

#[test]
fn test_empty_arguments_are_kept() {
    let events = run(
        &mut StreamNormalizer::chat(),
        vec![tool(0, Some("call_0"), Some("ping"), None), completion("stop")],
    );

    assert_eq!(events[0], StreamEvent::ToolCall(ToolCall::new("call_0", "ping", "")));
    if let StreamEvent::ToolCall(call) = &events[0] {
        assert_eq!(call.input().unwrap(), serde_json::json!({}));
    }
}

#[test]
fn test_flush_is_idempotent() {
    let mut normalizer = StreamNormalizer::completion();
    normalizer.handle(Fragment::Text("partial".to_string()));
    normalizer.handle(completion("length"));

    assert!(normalizer.finish_stream().is_empty());
    assert!(normalizer.finish_stream().is_empty());

    let mut normalizer = StreamNormalizer::chat();
    normalizer.handle(tool(0, None, Some("f"), None));
    assert_eq!(normalizer.finish_stream().len(), 1);
    assert!(normalizer.finish_stream().is_empty());
    assert_eq!(normalizer.pending_tool_calls(), 0);
}

#[test]
fn test_anomalies_do_not_reopen_state() {
    init_logger();

    let mut normalizer = StreamNormalizer::chat();
    let events = run(
        &mut normalizer,
        vec![
            Fragment::Text("done".to_string()),
            completion("stop"),
            Fragment::Text("late".to_string()),
            tool(0, None, Some("late"), Some("{}")),
            completion("stop"),
        ],
    );

    assert_eq!(events.len(), 2);
    assert_eq!(finish_count(&events), 1);
    assert_eq!(normalizer.pending_tool_calls(), 0);
}

#[test]
fn test_usage_is_reported_on_finish() {
    let events = run(
        &mut StreamNormalizer::chat(),
        vec![Fragment::Completion {
            reason: Some("length".to_string()),
            usage: Some(Usage {
                prompt_tokens: 12,
                completion_tokens: 30,
                total_tokens: Some(42),
            }),
        }],
    );

    match &events[0] {
        StreamEvent::Finish {
            finish_reason,
            usage,
            ..
        } => {
            assert_eq!(*finish_reason, FinishReason::Length);
            assert_eq!(usage.total_tokens(), 42);
        }
        other => panic!("Expected finish, got {:?}", other),
    }
}

#[test]
fn test_finish_mapping_is_total() {
    let inputs = [
        None,
        Some(""),
        Some("stop"),
        Some("length"),
        Some("tool_calls"),
        Some("content_filter"),
        Some("function_call"),
        Some("STOP"),
        Some("something-new"),
    ];

    for input in inputs {
        let full = map_finish_reason(input);
        let coarse = map_completion_finish_reason(input);

        assert!(matches!(
            full,
            FinishReason::Stop
                | FinishReason::Length
                | FinishReason::ToolCalls
                | FinishReason::ContentFilter
                | FinishReason::Unknown
        ));
        assert!(matches!(
            coarse,
            FinishReason::Stop | FinishReason::Length | FinishReason::Other
        ));
    }

    assert_eq!(map_finish_reason(None), FinishReason::Unknown);
    assert_eq!(map_finish_reason(Some("STOP")), FinishReason::Unknown);
    assert_eq!(map_completion_finish_reason(Some("tool_calls")), FinishReason::Other);
}
