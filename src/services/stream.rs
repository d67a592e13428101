//! Incremental story text over server-sent events.
//!
//! The backend sends `data: <json>` lines whose `type` is one of `start`,
//! `text`, `done` or `error`. Exactly one `done` or `error` ends a stream and
//! `text` deltas are concatenated in arrival order.

use anyhow::{anyhow, Context, Result};
use futures_util::{stream, Stream, StreamExt};
use log::debug;
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;

use crate::services::cancel::CancelToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Start { message: Option<String> },
    TextDelta { delta: String },
    Done { message: Option<String> },
    Error { message: String },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

#[derive(Deserialize)]
struct WireFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Parses the JSON payload of one `data:` line. Unknown frame types
/// (keep-alives and the like) yield `None`.
pub fn parse_frame(payload: &str) -> Result<Option<StreamEvent>> {
    let frame: WireFrame = serde_json::from_str(payload)
        .with_context(|| format!("Malformed stream frame: {}", payload))?;

    let event = match frame.kind.as_str() {
        "start" => StreamEvent::Start {
            message: frame.message,
        },
        "text" => StreamEvent::TextDelta {
            delta: frame
                .delta
                .ok_or_else(|| anyhow!("Text frame without delta: {}", payload))?,
        },
        "done" => StreamEvent::Done {
            message: frame.message,
        },
        "error" => StreamEvent::Error {
            message: frame
                .message
                .unwrap_or_else(|| "backend reported an unspecified error".to_string()),
        },
        other => {
            debug!("Ignoring stream frame of type '{}'", other);
            return Ok(None);
        }
    };
    Ok(Some(event))
}

/// Longest line the decoder buffers while waiting for a newline.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Line splitter for SSE bodies. Bytes are buffered until a newline arrives,
/// so frames (and UTF-8 sequences) split across network chunks decode fine.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<StreamEvent>> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = Self::decode_line(&line) {
                events.push(event);
            }
        }
        if self.buffer.len() > MAX_LINE_BYTES {
            let len = self.buffer.len();
            self.buffer.clear();
            events.push(Err(anyhow!(
                "Malformed stream frame: line exceeds {} bytes without a newline ({} buffered)",
                MAX_LINE_BYTES,
                len
            )));
        }
        events
    }

    /// Decodes whatever is left once the body ends without a trailing newline.
    pub fn finish(&mut self) -> Vec<Result<StreamEvent>> {
        let rest = std::mem::take(&mut self.buffer);
        Self::decode_line(&rest).into_iter().collect()
    }

    fn decode_line(raw: &[u8]) -> Option<Result<StreamEvent>> {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line,
            Err(e) => return Some(Err(anyhow!("Malformed stream frame: invalid UTF-8 ({})", e))),
        };
        let line = line.trim_end_matches(['\r', '\n']);
        // comments, blank separators and non-data fields (event:, id:, retry:)
        let payload = line.strip_prefix("data:")?.trim();
        if payload.is_empty() {
            return None;
        }
        parse_frame(payload).transpose()
    }
}

/// Turns an HTTP body stream into story events.
pub fn decode_sse<S, B, E>(body: S) -> impl Stream<Item = Result<StreamEvent>> + Send + 'static
where
    S: Stream<Item = std::result::Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let state = (body, SseDecoder::default(), VecDeque::new(), false);
    stream::unfold(state, |(mut body, mut decoder, mut pending, mut ended)| async move {
        loop {
            if let Some(event) = pending.pop_front() {
                return Some((event, (body, decoder, pending, ended)));
            }
            if ended {
                return None;
            }
            match body.next().await {
                Some(Ok(chunk)) => pending.extend(decoder.push(chunk.as_ref())),
                Some(Err(e)) => {
                    ended = true;
                    pending.push_back(Err(anyhow::Error::new(e).context("Story stream interrupted")));
                }
                None => {
                    ended = true;
                    pending.extend(decoder.finish());
                }
            }
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    Streaming,
    Completed,
    Failed,
}

/// `Idle -> Streaming -> {Completed | Failed}`. Terminal states absorb every
/// later event.
#[derive(Debug, Default)]
pub struct StreamConsumer {
    state: StreamState,
    text: String,
    failure: Option<String>,
}

impl StreamConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, StreamState::Completed | StreamState::Failed)
    }

    pub fn apply(&mut self, event: StreamEvent) -> StreamState {
        if self.is_terminal() {
            debug!("Ignoring {:?} after stream reached {:?}", event, self.state);
            return self.state;
        }
        match event {
            StreamEvent::Start { .. } => {
                self.state = StreamState::Streaming;
                self.failure = None;
            }
            // no explicit start marker: the first delta opens the stream
            StreamEvent::TextDelta { delta } => {
                self.state = StreamState::Streaming;
                self.text.push_str(&delta);
            }
            StreamEvent::Done { .. } => self.state = StreamState::Completed,
            StreamEvent::Error { message } => self.fail(message),
        }
        self.state
    }

    /// Transport errors and timeouts land here as well as `error` frames.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        self.state = StreamState::Failed;
        self.failure = Some(reason.into());
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed(String),
    Failed(String),
    Cancelled,
}

/// Drives a `StreamConsumer` until a terminal state, the safety `budget`
/// runs out, or `cancel` fires. Returning drops both the subscription and
/// the timer.
pub async fn consume<S, F>(
    mut events: S,
    budget: Duration,
    cancel: &CancelToken,
    mut on_event: F,
) -> StreamOutcome
where
    S: Stream<Item = Result<StreamEvent>> + Unpin,
    F: FnMut(&StreamEvent),
{
    let mut consumer = StreamConsumer::new();
    let deadline = tokio::time::sleep(budget);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Stream cancelled after {} chars", consumer.text().len());
                return StreamOutcome::Cancelled;
            }
            _ = &mut deadline => {
                consumer.fail(format!("no terminal event within {}s", budget.as_secs()));
            }
            next = events.next() => {
                match next {
                    Some(Ok(event)) => {
                        on_event(&event);
                        consumer.apply(event);
                    }
                    Some(Err(e)) => consumer.fail(format!("{:#}", e)),
                    None => consumer.fail("stream closed before a terminal event"),
                }
            }
        }

        match consumer.state() {
            StreamState::Completed => return StreamOutcome::Completed(consumer.into_text()),
            StreamState::Failed => {
                let reason = consumer.failure().unwrap_or("unknown stream failure").to_string();
                return StreamOutcome::Failed(reason);
            }
            StreamState::Idle | StreamState::Streaming => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream::{self, StreamExt};

    fn text(delta: &str) -> StreamEvent {
        StreamEvent::TextDelta {
            delta: delta.to_string(),
        }
    }

    #[test]
    fn test_parse_frame_types() {
        assert_eq!(
            parse_frame(r#"{"type":"text","delta":"Once "}"#).unwrap(),
            Some(text("Once "))
        );
        assert_eq!(
            parse_frame(r#"{"type":"error","message":"quota"}"#).unwrap(),
            Some(StreamEvent::Error {
                message: "quota".into()
            })
        );
        assert_eq!(parse_frame(r#"{"type":"ping"}"#).unwrap(), None);
        assert!(parse_frame(r#"{"type":"text"}"#).is_err());
        assert!(parse_frame("not json").is_err());
    }

    #[test]
    fn test_decoder_handles_split_frames() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"type\":\"sta").is_empty());
        let events = decoder.push(b"rt\"}\n\n: keep-alive\nevent: message\ndata: {\"type\":\"text\",\"delta\":\"caf\xc3");
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Ok(StreamEvent::Start { .. })));

        let events = decoder.push(b"\xa9\"}\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap(), &text("café"));
    }

    #[test]
    fn test_decoder_rejects_invalid_utf8() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b"data: {\"type\":\"text\",\"delta\":\"caf\xff\"}\n");
        assert_eq!(events.len(), 1);
        assert!(events[0].is_err());

        // a bad line does not poison the next one
        let events = decoder.push(b"data: {\"type\":\"done\"}\n");
        assert_eq!(events[0].as_ref().unwrap(), &StreamEvent::Done { message: None });
    }

    #[tokio::test]
    async fn test_invalid_utf8_fails_the_stream() {
        let chunks: Vec<std::result::Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"data: {\"type\":\"start\"}\n".to_vec()),
            Ok(b"data: {\"type\":\"text\",\"delta\":\"caf\xff\"}\n".to_vec()),
            Ok(b"data: {\"type\":\"done\"}\n".to_vec()),
        ];
        let outcome = consume(
            Box::pin(decode_sse(stream::iter(chunks))),
            Duration::from_secs(60),
            &CancelToken::new(),
            |_| {},
        )
        .await;
        match outcome {
            StreamOutcome::Failed(reason) => assert!(reason.contains("invalid UTF-8")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_decoder_caps_unterminated_line() {
        let mut decoder = SseDecoder::default();
        let mut chunk = b"data: {\"type\":\"text\",\"delta\":\"".to_vec();
        chunk.resize(MAX_LINE_BYTES / 2, b'a');
        assert!(decoder.push(&chunk).is_empty());
        assert!(decoder.push(&chunk).is_empty());
        let events = decoder.push(b"a");
        assert_eq!(events.len(), 1);
        assert!(events[0].is_err());

        // buffer was dropped, decoding resumes on the next full line
        let events = decoder.push(b"\ndata: {\"type\":\"done\"}\n");
        assert_eq!(events.len(), 1);
        assert!(events[0].as_ref().unwrap().is_terminal());
    }

    #[test]
    fn test_decoder_finish_flushes_last_line() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"type\":\"done\"}").is_empty());
        let events = decoder.finish();
        assert_eq!(events.len(), 1);
        assert!(events[0].as_ref().unwrap().is_terminal());
        assert!(decoder.finish().is_empty());
    }

    #[tokio::test]
    async fn test_decode_sse_over_chunks() {
        let chunks: Vec<std::result::Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"data: {\"type\":\"start\"}\n\ndata: {\"type\":\"text\",".to_vec()),
            Ok(b"\"delta\":\"Hi\"}\n\ndata: {\"type\":\"done\"}".to_vec()),
        ];
        let events: Vec<_> = decode_sse(stream::iter(chunks)).collect().await;
        let events: Vec<StreamEvent> = events.into_iter().map(|e| e.unwrap()).collect();
        assert_eq!(
            events,
            vec![
                StreamEvent::Start { message: None },
                text("Hi"),
                StreamEvent::Done { message: None }
            ]
        );
    }

    #[tokio::test]
    async fn test_decode_sse_surfaces_body_errors() {
        let chunks: Vec<std::result::Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"data: {\"type\":\"text\",\"delta\":\"a\"}\n".to_vec()),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            Ok(b"data: {\"type\":\"done\"}\n".to_vec()),
        ];
        let events: Vec<_> = decode_sse(stream::iter(chunks)).collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(events[1].is_err());
    }

    #[test]
    fn test_consumer_transitions() {
        let mut consumer = StreamConsumer::new();
        assert_eq!(consumer.state(), StreamState::Idle);
        assert_eq!(consumer.apply(StreamEvent::Start { message: None }), StreamState::Streaming);
        consumer.apply(text("Once "));
        consumer.apply(text("upon "));
        consumer.apply(text("a time."));
        assert_eq!(consumer.apply(StreamEvent::Done { message: None }), StreamState::Completed);
        assert_eq!(consumer.text(), "Once upon a time.");

        // terminal states absorb later events
        consumer.apply(text(" more"));
        consumer.fail("late");
        assert_eq!(consumer.state(), StreamState::Completed);
        assert_eq!(consumer.text(), "Once upon a time.");
        assert_eq!(consumer.failure(), None);
    }

    #[test]
    fn test_first_delta_opens_stream_without_start() {
        let mut consumer = StreamConsumer::new();
        assert_eq!(consumer.apply(text("Hi")), StreamState::Streaming);
        assert_eq!(
            consumer.apply(StreamEvent::Error {
                message: "boom".into()
            }),
            StreamState::Failed
        );
        assert_eq!(consumer.failure(), Some("boom"));
    }

    #[test]
    fn test_concatenation_preserves_arrival_order() {
        let deltas = ["z", "", "a", "ä", " ", "m", "\n", "zz"];
        let mut consumer = StreamConsumer::new();
        for d in deltas {
            consumer.apply(text(d));
        }
        assert_eq!(consumer.text(), deltas.concat());
    }

    #[tokio::test]
    async fn test_consume_completes() {
        let events = stream::iter(vec![
            Ok(StreamEvent::Start { message: None }),
            Ok(text("Once ")),
            Ok(text("upon ")),
            Ok(text("a time.")),
            Ok(StreamEvent::Done { message: None }),
        ]);
        let mut seen = 0;
        let outcome = consume(events, Duration::from_secs(60), &CancelToken::new(), |_| seen += 1).await;
        assert_eq!(outcome, StreamOutcome::Completed("Once upon a time.".into()));
        assert_eq!(seen, 5);
    }

    #[tokio::test]
    async fn test_consume_fails_on_transport_error_and_early_close() {
        let events = stream::iter(vec![Ok(text("a")), Err(anyhow!("connection reset"))]);
        let outcome = consume(events, Duration::from_secs(60), &CancelToken::new(), |_| {}).await;
        assert_eq!(outcome, StreamOutcome::Failed("connection reset".into()));

        let events = stream::iter(vec![Ok(text("a"))]);
        let outcome = consume(events, Duration::from_secs(60), &CancelToken::new(), |_| {}).await;
        assert!(matches!(outcome, StreamOutcome::Failed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_consume_times_out_on_silence() {
        let events = stream::iter(vec![Ok(StreamEvent::Start { message: None })]).chain(stream::pending());
        let outcome = consume(events, Duration::from_secs(60), &CancelToken::new(), |_| {}).await;
        assert_eq!(outcome, StreamOutcome::Failed("no terminal event within 60s".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_consume_stops_on_cancel() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        let events = stream::iter(vec![Ok(text("a"))]).chain(stream::pending());
        let outcome = consume(events, Duration::from_secs(60), &cancel, |_| {}).await;
        assert_eq!(outcome, StreamOutcome::Cancelled);
    }
}
