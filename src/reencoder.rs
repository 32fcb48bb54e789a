//! Re-encoding of the upstream event stream into OpenAI chat chunks.
//!
//! [`ReEncoder`] is the synchronous state machine; [`sse_body`] and
//! [`collect_completion`] drive it from the upstream byte stream for the
//! streaming and buffered response modes.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::fmt::Display;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::error::RelayError;
use crate::events::{decode_frame, UpstreamEvent};
use crate::finalizer::{sse_data, Finalizer, DONE_FRAME};
use crate::models::chat::ChatCompletionResponse;
use crate::sse::{SseFrame, SseParser};

/// Malformed events tolerated in a row before the stream is declared broken.
pub const MAX_CONSECUTIVE_PROTOCOL_ERRORS: usize = 8;

/// Separator between a citation block and the answer text after it.
const CITATION_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Init,
    Streaming,
    Done,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    Reasoning,
    Content,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    Error,
}

impl FinishReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::Error => "error",
        }
    }
}

/// One assistant chunk before it is given an id and serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundChunk {
    /// Set on the first chunk of the response only.
    pub with_role: bool,
    pub delta_kind: DeltaKind,
    pub text: String,
    pub finish_reason: Option<FinishReason>,
}

impl OutboundChunk {
    pub fn is_terminal(&self) -> bool {
        self.finish_reason.is_some()
    }
}

/// State machine from [`UpstreamEvent`]s to [`OutboundChunk`]s.
///
/// Emits exactly one terminal chunk; input after that is ignored. Everything
/// emitted is also accumulated so usage and buffered responses see the same
/// text the client did.
#[derive(Debug)]
pub struct ReEncoder {
    state: StreamState,
    role_sent: bool,
    opened_with_reasoning: Option<bool>,
    pending_citation: Option<String>,
    consecutive_protocol_errors: usize,
    reasoning: String,
    content: String,
    failure: Option<RelayError>,
}

impl Default for ReEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReEncoder {
    pub fn new() -> Self {
        Self {
            state: StreamState::Init,
            role_sent: false,
            opened_with_reasoning: None,
            pending_citation: None,
            consecutive_protocol_errors: 0,
            reasoning: String::new(),
            content: String::new(),
            failure: None,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, StreamState::Done | StreamState::Errored)
    }

    /// Whether the first emitted delta was reasoning; `None` until one was emitted.
    pub fn opened_with_reasoning(&self) -> Option<bool> {
        self.opened_with_reasoning
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// The error that ended the stream, if it ended in `Errored`.
    pub fn take_failure(&mut self) -> Option<RelayError> {
        self.failure.take()
    }

    /// Decode and apply one SSE frame.
    pub fn on_frame(&mut self, frame: &SseFrame) -> Vec<OutboundChunk> {
        if self.is_terminal() {
            return Vec::new();
        }
        match decode_frame(frame) {
            Ok(event) => self.on_event(event),
            Err(err) => self.on_protocol_error(err, frame.offset),
        }
    }

    pub fn on_event(&mut self, event: UpstreamEvent) -> Vec<OutboundChunk> {
        if self.is_terminal() {
            return Vec::new();
        }
        self.consecutive_protocol_errors = 0;
        match event {
            UpstreamEvent::ThinkingDelta(text) => self.delta(DeltaKind::Reasoning, text),
            UpstreamEvent::AnswerDelta(text) => {
                if text.is_empty() {
                    return Vec::new();
                }
                let text = match self.pending_citation.take() {
                    Some(citation) => format!("{citation}{CITATION_SEPARATOR}{text}"),
                    None => text,
                };
                self.delta(DeltaKind::Content, text)
            }
            UpstreamEvent::Citation(text) => {
                if !text.is_empty() {
                    self.pending_citation = Some(match self.pending_citation.take() {
                        Some(prev) => format!("{prev}{CITATION_SEPARATOR}{text}"),
                        None => text,
                    });
                }
                Vec::new()
            }
            UpstreamEvent::Done => self.terminate(FinishReason::Stop, None),
            UpstreamEvent::Error(message) => self.terminate(
                FinishReason::Error,
                Some(RelayError::UpstreamTransport(format!(
                    "upstream reported an error: {message}"
                ))),
            ),
            UpstreamEvent::Unknown(kind) => {
                tracing::debug!(kind = %kind, "ignoring upstream event");
                Vec::new()
            }
        }
    }

    /// Count a malformed event; too many in a row fail the stream.
    pub fn on_protocol_error(&mut self, err: RelayError, offset: u64) -> Vec<OutboundChunk> {
        if self.is_terminal() {
            return Vec::new();
        }
        self.consecutive_protocol_errors += 1;
        tracing::warn!(
            offset,
            consecutive = self.consecutive_protocol_errors,
            error = %err,
            "skipping malformed upstream event"
        );
        if self.consecutive_protocol_errors > MAX_CONSECUTIVE_PROTOCOL_ERRORS {
            let n = self.consecutive_protocol_errors;
            return self.terminate(
                FinishReason::Error,
                Some(RelayError::UpstreamTransport(format!(
                    "upstream stream out of sync after {n} malformed events"
                ))),
            );
        }
        Vec::new()
    }

    /// Transport failure, idle timeout or an unbounded upstream line.
    pub fn on_transport_error(&mut self, err: RelayError) -> Vec<OutboundChunk> {
        if self.is_terminal() {
            return Vec::new();
        }
        self.terminate(FinishReason::Error, Some(err))
    }

    /// Upstream end-of-stream; finishes normally unless already terminal.
    pub fn finish(&mut self) -> Vec<OutboundChunk> {
        if self.is_terminal() {
            return Vec::new();
        }
        self.terminate(FinishReason::Stop, None)
    }

    fn delta(&mut self, kind: DeltaKind, text: String) -> Vec<OutboundChunk> {
        if text.is_empty() {
            return Vec::new();
        }
        if self.state == StreamState::Init {
            self.opened_with_reasoning = Some(kind == DeltaKind::Reasoning);
            self.state = StreamState::Streaming;
        }
        match kind {
            DeltaKind::Reasoning => self.reasoning.push_str(&text),
            DeltaKind::Content => self.content.push_str(&text),
            DeltaKind::None => {}
        }
        vec![self.chunk(kind, text, None)]
    }

    fn chunk(
        &mut self,
        delta_kind: DeltaKind,
        text: String,
        finish_reason: Option<FinishReason>,
    ) -> OutboundChunk {
        let with_role = !self.role_sent;
        self.role_sent = true;
        OutboundChunk {
            with_role,
            delta_kind,
            text,
            finish_reason,
        }
    }

    fn terminate(
        &mut self,
        reason: FinishReason,
        failure: Option<RelayError>,
    ) -> Vec<OutboundChunk> {
        let mut out = Vec::with_capacity(2);
        if let Some(citation) = self.pending_citation.take() {
            let text = format!("{citation}{CITATION_SEPARATOR}");
            self.content.push_str(&text);
            out.push(self.chunk(DeltaKind::Content, text, None));
        }
        self.state = if failure.is_some() {
            StreamState::Errored
        } else {
            StreamState::Done
        };
        self.failure = failure;
        out.push(self.chunk(DeltaKind::None, String::new(), Some(reason)));
        out
    }
}

/// Pulls upstream bytes through the SSE parser into a [`ReEncoder`].
struct Pump<S> {
    upstream: S,
    parser: SseParser,
    encoder: ReEncoder,
    idle_timeout: Duration,
    eof: bool,
}

impl<S, E> Pump<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    fn new(upstream: S, idle_timeout: Duration) -> Self {
        Self {
            upstream,
            parser: SseParser::new(),
            encoder: ReEncoder::new(),
            idle_timeout,
            eof: false,
        }
    }

    /// Read one upstream chunk and return what it produced. Once the
    /// encoder is terminal this returns nothing.
    async fn step(&mut self) -> Vec<OutboundChunk> {
        if self.encoder.is_terminal() {
            return Vec::new();
        }
        if self.eof {
            return self.encoder.finish();
        }

        match tokio::time::timeout(self.idle_timeout, self.upstream.next()).await {
            Err(_) => {
                tracing::warn!(
                    offset = self.parser.bytes_consumed(),
                    idle_secs = self.idle_timeout.as_secs(),
                    "upstream went idle"
                );
                self.encoder
                    .on_transport_error(RelayError::UpstreamTimeout(self.idle_timeout.as_secs()))
            }
            Ok(Some(Err(e))) => {
                tracing::warn!(
                    offset = self.parser.bytes_consumed(),
                    error = %e,
                    "upstream stream failed"
                );
                self.encoder
                    .on_transport_error(RelayError::UpstreamTransport(e.to_string()))
            }
            Ok(Some(Ok(bytes))) => {
                let frames = self.parser.push_bytes(&bytes);
                let mut out = self.apply(&frames);
                if let Err(err) = self.parser.check_pending() {
                    tracing::warn!(error = %err, "upstream line too long");
                    out.extend(self.encoder.on_transport_error(err));
                }
                out
            }
            Ok(None) => {
                self.eof = true;
                let frames = self.parser.finish();
                let mut out = self.apply(&frames);
                out.extend(self.encoder.finish());
                out
            }
        }
    }

    fn apply(&mut self, frames: &[SseFrame]) -> Vec<OutboundChunk> {
        let mut out = Vec::new();
        for frame in frames {
            out.extend(self.encoder.on_frame(frame));
            if self.encoder.is_terminal() {
                break;
            }
        }
        out
    }
}

/// Streaming response body: one `data:` event per chunk, then `data: [DONE]`.
///
/// Dropping the returned stream drops the upstream body with it.
pub fn sse_body<S, E>(
    upstream: S,
    finalizer: Finalizer,
    idle_timeout: Duration,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    struct Body<S> {
        pump: Pump<S>,
        finalizer: Finalizer,
        queue: VecDeque<Bytes>,
        closed: bool,
    }

    let body = Body {
        pump: Pump::new(upstream, idle_timeout),
        finalizer,
        queue: VecDeque::new(),
        closed: false,
    };

    futures_util::stream::unfold(body, |mut body| async move {
        loop {
            if let Some(frame) = body.queue.pop_front() {
                return Some((Ok(frame), body));
            }
            if body.closed {
                return None;
            }
            if body.pump.encoder.is_terminal() {
                body.closed = true;
                log_outcome(&mut body.pump.encoder, body.finalizer.id());
                body.queue.push_back(Bytes::from_static(DONE_FRAME));
                continue;
            }
            for chunk in body.pump.step().await {
                let usage = chunk.is_terminal().then(|| {
                    body.finalizer
                        .usage(body.pump.encoder.reasoning(), body.pump.encoder.content())
                });
                match sse_data(&body.finalizer.chunk(&chunk, usage)) {
                    Ok(frame) => body.queue.push_back(frame),
                    Err(e) => tracing::error!(error = %e, "failed to serialize chunk"),
                }
            }
        }
    })
}

fn log_outcome(encoder: &mut ReEncoder, id: &str) {
    match encoder.take_failure() {
        Some(err) => tracing::warn!(id, error = %err, "stream ended with error"),
        None => tracing::info!(
            id,
            reasoning_chars = encoder.reasoning().chars().count(),
            content_chars = encoder.content().chars().count(),
            "stream completed"
        ),
    }
}

/// Buffered response: drain the upstream and build one completion.
///
/// Any upstream failure fails the whole call; no partial output is returned.
pub async fn collect_completion<S, E>(
    upstream: S,
    finalizer: &Finalizer,
    idle_timeout: Duration,
) -> Result<ChatCompletionResponse, RelayError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    let mut pump = Pump::new(upstream, idle_timeout);
    while !pump.encoder.is_terminal() {
        pump.step().await;
    }
    if let Some(err) = pump.encoder.take_failure() {
        tracing::warn!(id = finalizer.id(), error = %err, "completion failed");
        return Err(err);
    }
    tracing::info!(
        id = finalizer.id(),
        reasoning_chars = pump.encoder.reasoning().chars().count(),
        content_chars = pump.encoder.content().chars().count(),
        "completion collected"
    );
    Ok(finalizer.completion(pump.encoder.reasoning(), pump.encoder.content()))
}
