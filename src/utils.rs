//! Streaming utilities for SSE decoding and stream normalization.
//!
//! This module connects the HTTP transport to the [`StreamNormalizer`]:
//!
//! ```text
//! Raw HTTP body (SSE)
//!     │
//!     │ decode_sse()            eventsource framing + JSON decoding
//!     ▼
//! Stream<Result<ParseResult<T>>>
//!     │
//!     │ normalize_stream()      classify → StreamNormalizer::handle
//!     ▼                         finish_stream() on end / error / interrupt
//! EventStream (Stream<Item = Result<StreamEvent>>)
//! ```
//!
//! # SSE Format
//!
//! ```text
//! data: {"id":"chatcmpl-1","choices":[{"index":0,"delta":{"content":"Hi"}}]}
//!
//! data: {"id":"chatcmpl-1","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}
//!
//! data: [DONE]
//! ```
//!
//! Framing is handled by `eventsource-stream`, so events split across HTTP chunks
//! (or several events in one chunk) decode correctly. The `[DONE]` sentinel is not
//! JSON and is skipped.
//!
//! # Termination
//!
//! However the transport ends, the normalizer's flush runs exactly once before the
//! [`EventStream`] ends:
//!
//! - **Clean end of body**: flushed events, then `None`.
//! - **Transport error**: flushed events, then the `Err(Error::Http)`, then `None`.
//! - **Interrupt**: the adapter stops reading, yields flushed events, then `None`.

use crate::fragment::{Fragment, ParseResult};
use crate::normalizer::{StreamEvent, StreamNormalizer};
use crate::{Error, Result};
use eventsource_stream::{EventStreamError, Eventsource};
use futures::stream::{Stream, StreamExt};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use tokio::sync::Notify;

/// Length of locally generated ids
const GENERATED_ID_LEN: usize = 16;

/// Generates a random alphanumeric id for placeholder tool-call ids and text spans.
pub fn generate_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_ID_LEN)
        .map(char::from)
        .collect()
}

/// Boxed stream of decoded SSE payloads
pub type ParseStream<T> = Pin<Box<dyn Stream<Item = Result<ParseResult<T>>> + Send>>;

/// Parses a raw HTTP response body as a stream of typed SSE payloads.
pub fn parse_sse_stream<T>(body: reqwest::Response) -> ParseStream<T>
where
    T: DeserializeOwned + Send + 'static,
{
    decode_sse(body.bytes_stream())
}

/// Decodes any byte stream carrying SSE into typed parse results.
///
/// - Empty `data:` payloads and the `[DONE]` sentinel are skipped.
/// - JSON that does not match `T`, and SSE framing errors, become
///   [`ParseResult::Malformed`]; they are never fatal.
/// - Transport errors become `Err(Error::Http)`.
pub fn decode_sse<T, S, B>(bytes: S) -> ParseStream<T>
where
    T: DeserializeOwned + Send + 'static,
    S: Stream<Item = std::result::Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let stream = bytes.eventsource().filter_map(|item| async move {
        match item {
            Ok(event) => {
                let data = event.data.trim();
                if data.is_empty() || data == "[DONE]" {
                    return None;
                }

                log::trace!("received SSE payload: {}", data);

                let parsed = match serde_json::from_str::<T>(data) {
                    Ok(value) => ParseResult::Parsed(value),
                    Err(e) => ParseResult::Malformed {
                        raw: data.to_string(),
                        error: e.to_string(),
                    },
                };
                Some(Ok(parsed))
            }
            Err(EventStreamError::Transport(e)) => Some(Err(Error::Http(e))),
            Err(e) => Some(Ok(ParseResult::Malformed {
                raw: String::new(),
                error: e.to_string(),
            })),
        }
    });

    Box::pin(stream)
}

/// Cancellation signal shared between an [`EventStream`] and its handles
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the stream to stop reading the transport and flush.
    ///
    /// Safe to call from any thread or task, and idempotent.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
        // notify_one stores a permit if the stream is not currently waiting.
        self.notify.notify_one();
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    async fn interrupted(&self) {
        while !self.is_interrupted() {
            self.notify.notified().await;
        }
    }
}

/// Normalized event stream for one request.
///
/// Yields [`StreamEvent`]s in canonical order. The only error item is a transport
/// failure, which always comes after the flushed events and is always last.
pub struct EventStream {
    inner: Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>,
    interrupt: InterruptHandle,
}

impl EventStream {
    /// Stops reading the transport; buffered tool calls and an open text span are
    /// still flushed before the stream ends.
    pub fn interrupt(&self) {
        self.interrupt.interrupt();
    }

    /// Returns a clone of the interrupt handle for use from another task.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }
}

impl Stream for EventStream {
    type Item = Result<StreamEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("interrupted", &self.interrupt.is_interrupted())
            .finish_non_exhaustive()
    }
}

struct NormalizeState<T> {
    source: ParseStream<T>,
    classify: fn(ParseResult<T>) -> Vec<Fragment>,
    normalizer: StreamNormalizer,
    pending: VecDeque<Result<StreamEvent>>,
    interrupt: InterruptHandle,
    done: bool,
}

impl<T> NormalizeState<T> {
    /// Runs the end-of-stream flush and queues `trailer` after its events.
    fn finish(&mut self, trailer: Option<Error>) {
        self.pending
            .extend(self.normalizer.finish_stream().into_iter().map(Ok));
        self.pending.extend(trailer.map(Err));
        self.done = true;
    }
}

enum Next<T> {
    Item(Option<Result<ParseResult<T>>>),
    Interrupted,
}

/// Drives `classify` and `normalizer` over a stream of parse results.
///
/// `classify` is [`classify_chat_chunk`](crate::classify_chat_chunk) or
/// [`classify_completion_chunk`](crate::classify_completion_chunk), matching the
/// normalizer's variant.
pub fn normalize_stream<T>(
    source: ParseStream<T>,
    classify: fn(ParseResult<T>) -> Vec<Fragment>,
    normalizer: StreamNormalizer,
) -> EventStream
where
    T: Send + 'static,
{
    let interrupt = InterruptHandle::new();

    let state = NormalizeState {
        source,
        classify,
        normalizer,
        pending: VecDeque::new(),
        interrupt: interrupt.clone(),
        done: false,
    };

    let stream = futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            if state.interrupt.is_interrupted() {
                log::debug!("event stream interrupted by caller");
                state.finish(None);
                continue;
            }

            let next = tokio::select! {
                biased;
                _ = state.interrupt.interrupted() => Next::Interrupted,
                item = state.source.next() => Next::Item(item),
            };

            match next {
                Next::Item(Some(Ok(parsed))) => {
                    if let ParseResult::Malformed { raw, error } = &parsed {
                        log::debug!("malformed stream payload ({}): {}", error, raw);
                    }
                    for fragment in (state.classify)(parsed) {
                        let events = state.normalizer.handle(fragment);
                        state.pending.extend(events.into_iter().map(Ok));
                    }
                }
                Next::Item(Some(Err(e))) => {
                    log::debug!("transport failed mid-stream: {}", e);
                    state.finish(Some(e));
                }
                Next::Item(None) => state.finish(None),
                Next::Interrupted => {
                    log::debug!("event stream interrupted by caller");
                    state.finish(None);
                }
            }
        }
    });

    EventStream {
        inner: Box::pin(stream),
        interrupt,
    }
}
