//! Upstream SSE parsing and re-shaping into OpenAI chunks.
//!
//! Z.AI always streams. This module turns its byte stream into typed
//! events (reassembling lines split across network packets), then either
//! relays them as `chat.completion.chunk` SSE frames or aggregates them
//! into a single completion for non-streaming clients.

use crate::errors::ProxyError;
use crate::schemas::chat_completions::{ChatCompletionStreamChoice, ChatCompletionStreamResponse};
use crate::transform;
use crate::zai::ZaiStreamEvent;
use axum::http::StatusCode;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use serde_json::json;
use std::pin::Pin;
use std::task::{Context, Poll};
use uuid::Uuid;

/// The upstream phase carrying chain-of-thought content.
const PHASE_THINKING: &str = "thinking";
/// The upstream phase carrying the final answer.
const PHASE_ANSWER: &str = "answer";

pub const SSE_DONE: &str = "data: [DONE]\n\n";

/// One parsed item from the upstream stream.
#[derive(Debug)]
pub enum UpstreamItem {
    Event(ZaiStreamEvent),
    /// The `data: [DONE]` terminator.
    Done,
}

/// Parses an upstream byte stream into [`UpstreamItem`]s.
///
/// Z.AI frames events as `data: <json>` lines. Packets split lines at
/// arbitrary byte boundaries, so bytes are buffered until a full line is
/// available; non-`data:` lines and unparseable payloads are skipped, the
/// same way the upstream web client treats them.
pub struct ZaiEventStream<S> {
    inner: S,
    buffer: BytesMut,
    inner_done: bool,
}

impl<S> ZaiEventStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
            inner_done: false,
        }
    }

    /// Pop the next complete line from the buffer, or the trailing partial
    /// line once the inner stream has ended.
    fn next_line(&mut self) -> Option<String> {
        if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.split_to(pos + 1);
            return Some(String::from_utf8_lossy(&line).into_owned());
        }
        if self.inner_done && !self.buffer.is_empty() {
            let rest = self.buffer.split();
            return Some(String::from_utf8_lossy(&rest).into_owned());
        }
        None
    }
}

fn parse_line(line: &str) -> Option<UpstreamItem> {
    let payload = line.trim().strip_prefix("data: ")?.trim();
    if payload == "[DONE]" {
        return Some(UpstreamItem::Done);
    }
    match serde_json::from_str::<ZaiStreamEvent>(payload) {
        Ok(event) => Some(UpstreamItem::Event(event)),
        Err(e) => {
            tracing::debug!(error = %e, "Skipping unparseable upstream line");
            None
        }
    }
}

impl<S, E> Stream for ZaiEventStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<UpstreamItem, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            while let Some(line) = this.next_line() {
                if let Some(item) = parse_line(&line) {
                    return Poll::Ready(Some(Ok(item)));
                }
            }

            if this.inner_done {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.buffer.extend_from_slice(&chunk);
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => {
                    this.inner_done = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Generate a completion id in OpenAI's `chatcmpl-` format.
pub fn completion_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("chatcmpl-{}", &hex[..29])
}

/// Serialize one value as an SSE data frame.
pub fn sse_frame(value: &impl serde::Serialize) -> Bytes {
    // Values built by this module serialize infallibly.
    let json = serde_json::to_string(value).expect("SSE frame value should serialize");
    Bytes::from(format!("data: {json}\n\n"))
}

fn content_chunk(id: &str, created: u64, model: &str, content: &str) -> ChatCompletionStreamResponse {
    ChatCompletionStreamResponse {
        id: id.to_string(),
        object: ChatCompletionStreamResponse::OBJECT.into(),
        created,
        model: model.to_string(),
        choices: vec![ChatCompletionStreamChoice {
            index: 0,
            delta: json!({"content": content}),
            finish_reason: None,
        }],
    }
}

fn final_chunk(id: &str, created: u64, model: &str) -> ChatCompletionStreamResponse {
    ChatCompletionStreamResponse {
        id: id.to_string(),
        object: ChatCompletionStreamResponse::OBJECT.into(),
        created,
        model: model.to_string(),
        choices: vec![ChatCompletionStreamChoice {
            index: 0,
            delta: json!({}),
            finish_reason: Some("stop".into()),
        }],
    }
}

enum RelayPhase {
    Events,
    FinalChunk,
    DoneMarker,
    Finished,
}

/// Re-shapes upstream events into OpenAI `chat.completion.chunk` SSE
/// frames for a streaming client.
///
/// All frames share one completion id. After the upstream terminator (or
/// end of stream) a final empty-delta chunk with `finish_reason: "stop"`
/// is emitted, then `data: [DONE]`.
pub struct OpenAiChunkStream<S> {
    events: ZaiEventStream<S>,
    id: String,
    created: u64,
    model: String,
    show_think_tags: bool,
    phase: RelayPhase,
    current_phase: Option<String>,
}

impl<S> OpenAiChunkStream<S> {
    pub fn new(upstream: S, model: impl Into<String>, show_think_tags: bool) -> Self {
        Self {
            events: ZaiEventStream::new(upstream),
            id: completion_id(),
            created: crate::unix_timestamp(),
            model: model.into(),
            show_think_tags,
            phase: RelayPhase::Events,
            current_phase: None,
        }
    }

    fn event_frame(&mut self, event: &ZaiStreamEvent) -> Option<Bytes> {
        if let Some(detail) = event.error_detail() {
            tracing::error!(detail = %detail, "Upstream error event");
            self.phase = RelayPhase::Finished;
            return Some(sse_frame(&json!({
                "error": {"message": format!("Upstream error: {detail}"), "type": "upstream_error"}
            })));
        }

        let data = event.data.as_ref()?;
        if data.phase != self.current_phase {
            self.current_phase = data.phase.clone();
            tracing::debug!(phase = ?data.phase, "Upstream phase changed");
        }

        if !self.show_think_tags && data.phase.as_deref() == Some(PHASE_THINKING) {
            return None;
        }

        let delta = data.delta_content.as_deref().filter(|d| !d.is_empty())?;
        let delta = if self.show_think_tags {
            transform::rewrite_think_tags_streaming(delta)
        } else {
            delta.to_string()
        };

        Some(sse_frame(&content_chunk(
            &self.id,
            self.created,
            &self.model,
            &delta,
        )))
    }
}

impl<S, E> Stream for OpenAiChunkStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            match this.phase {
                RelayPhase::Events => match Pin::new(&mut this.events).poll_next(cx) {
                    Poll::Ready(Some(Ok(UpstreamItem::Event(event)))) => {
                        if let Some(frame) = this.event_frame(&event) {
                            return Poll::Ready(Some(Ok(frame)));
                        }
                    }
                    Poll::Ready(Some(Ok(UpstreamItem::Done))) | Poll::Ready(None) => {
                        this.phase = RelayPhase::FinalChunk;
                    }
                    Poll::Ready(Some(Err(e))) => {
                        tracing::error!(error = %e, "Upstream stream error");
                        this.phase = RelayPhase::Finished;
                        return Poll::Ready(Some(Ok(sse_frame(&json!({
                            "error": {"message": format!("Streaming error: {e}"), "type": "server_error"}
                        })))));
                    }
                    Poll::Pending => return Poll::Pending,
                },
                RelayPhase::FinalChunk => {
                    this.phase = RelayPhase::DoneMarker;
                    let chunk = final_chunk(&this.id, this.created, &this.model);
                    return Poll::Ready(Some(Ok(sse_frame(&chunk))));
                }
                RelayPhase::DoneMarker => {
                    this.phase = RelayPhase::Finished;
                    return Poll::Ready(Some(Ok(Bytes::from_static(SSE_DONE.as_bytes()))));
                }
                RelayPhase::Finished => return Poll::Ready(None),
            }
        }
    }
}

/// Collect an upstream stream into the full completion text for a
/// non-streaming client.
///
/// Honors `show_think_tags`: either only `answer`-phase content survives
/// and residual markup is stripped, or everything is kept with `<details>`
/// rewritten to `<think>`.
pub async fn aggregate_content<S, E>(upstream: S, show_think_tags: bool) -> Result<String, ProxyError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut events = ZaiEventStream::new(upstream);
    let mut content = String::new();

    while let Some(item) = events.next().await {
        match item {
            Ok(UpstreamItem::Event(event)) => {
                if let Some(detail) = event.error_detail() {
                    return Err(ProxyError::Upstream {
                        status: StatusCode::BAD_REQUEST,
                        detail,
                    });
                }
                let Some(data) = event.data else { continue };
                if !show_think_tags && data.phase.as_deref() != Some(PHASE_ANSWER) {
                    continue;
                }
                if let Some(delta) = data.delta_content {
                    content.push_str(&delta);
                }
            }
            Ok(UpstreamItem::Done) => break,
            Err(e) => {
                return Err(ProxyError::UpstreamUnavailable(e.to_string()));
            }
        }
    }

    let content = if show_think_tags {
        transform::rewrite_think_tags(&content)
    } else {
        transform::strip_thinking(&content)
    };
    Ok(content)
}
