use crate::error::StreamError;
use crate::protocol::{CourseGuide, StreamEvent};
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::error::Error;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const DEFAULT_EVENT_NAME: &str = "message";
const UNKNOWN_ERROR: &str = "Unknown error";

/// Decodes UTF-8 across chunk boundaries.
///
/// An incomplete trailing sequence is held back and prepended to the next
/// chunk. Invalid sequences decode to U+FFFD instead of failing the stream.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut input = bytes.as_slice();
        loop {
            match std::str::from_utf8(input) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, rest) = input.split_at(err.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            input = &rest[len..];
                        }
                        None => {
                            self.pending = rest.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drops any incomplete sequence, returning how many bytes were held.
    pub fn reset(&mut self) -> usize {
        std::mem::take(&mut self.pending).len()
    }
}

/// One blank-line delimited frame, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub name: String,
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseParser {
    decoder: Utf8Decoder,
    buffer: String,
    // A trailing CR waits for the next chunk in case an LF follows.
    pending_cr: bool,
    // Bytes of `buffer` already searched for a frame delimiter.
    scanned: usize,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and drains every complete frame from the front of the buffer.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<RawEvent> {
        let mut text = self.decoder.decode(chunk);
        if std::mem::take(&mut self.pending_cr) {
            text.insert(0, '\r');
        }
        if text.ends_with('\r') {
            text.pop();
            self.pending_cr = true;
        }
        if text.contains("\r\n") {
            text = text.replace("\r\n", "\n");
        }
        self.buffer.push_str(&text);

        let mut events = Vec::new();
        loop {
            let Some(found) = self.buffer[self.scanned..].find("\n\n") else {
                // Resume on the last LF so a delimiter split across chunks is found.
                self.scanned = if self.buffer.ends_with('\n') {
                    self.buffer.len() - 1
                } else {
                    self.buffer.len()
                };
                break;
            };
            let idx = self.scanned + found;
            let raw: String = self.buffer.drain(..idx + 2).collect();
            self.scanned = 0;
            if let Some(event) = parse_frame(&raw[..idx]) {
                events.push(event);
            }
        }
        events
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len() + usize::from(self.pending_cr) + self.decoder.pending_len()
    }

    /// Discards the unterminated tail. It is never parsed as an event.
    pub fn finish(&mut self) -> usize {
        let dropped = self.buffered_len();
        self.buffer.clear();
        self.pending_cr = false;
        self.scanned = 0;
        self.decoder.reset();
        dropped
    }
}

fn parse_frame(raw: &str) -> Option<RawEvent> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let mut name = DEFAULT_EVENT_NAME.to_string();
    let mut data = String::new();
    for line in raw.split('\n') {
        if let Some(rest) = line.strip_prefix("event:") {
            name = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("data:") {
            data.push_str(rest.trim());
        }
    }

    Some(RawEvent { name, data })
}

/// Maps a frame onto an application event. Unknown names yield `None`.
pub fn classify(raw: RawEvent) -> Option<Result<StreamEvent, StreamError>> {
    match raw.name.as_str() {
        "progress" => Some(Ok(StreamEvent::Progress { text: raw.data })),
        "result" => Some(
            serde_json::from_str::<CourseGuide>(&raw.data)
                .map(|payload| StreamEvent::Result { payload })
                .map_err(StreamError::from),
        ),
        "error" => {
            let message = if raw.data.is_empty() {
                UNKNOWN_ERROR.to_string()
            } else {
                raw.data
            };
            Some(Ok(StreamEvent::Error { message }))
        }
        other => {
            debug!(event = other, "ignoring unrecognised stream event");
            None
        }
    }
}

struct EventsState<S> {
    source: Pin<Box<S>>,
    parser: SseParser,
    ready: VecDeque<Result<StreamEvent, StreamError>>,
    done: bool,
}

/// Turns a chunked byte stream into classified events, in frame order.
///
/// A transport error is yielded once and ends the stream.
pub fn events<S, B, E>(source: S) -> impl Stream<Item = Result<StreamEvent, StreamError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Error + Send + Sync + 'static,
{
    let state = EventsState {
        source: Box::pin(source),
        parser: SseParser::new(),
        ready: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.ready.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }

            match state.source.next().await {
                Some(Ok(chunk)) => {
                    for raw in state.parser.push(chunk.as_ref()) {
                        if let Some(item) = classify(raw) {
                            state.ready.push_back(item);
                        }
                    }
                }
                Some(Err(err)) => {
                    state.done = true;
                    state
                        .ready
                        .push_back(Err(StreamError::Transport(Box::new(err))));
                }
                None => {
                    state.done = true;
                    let dropped = state.parser.finish();
                    if dropped > 0 {
                        debug!(bytes = dropped, "discarding unterminated stream tail");
                    }
                }
            }
        }
    })
}

/// Like [`events`], but ends as soon as `cancel` fires and drops the source.
pub fn events_until<S, B, E>(
    source: S,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<StreamEvent, StreamError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Error + Send + Sync + 'static,
{
    events(source).take_until(async move { cancel.cancelled().await })
}
