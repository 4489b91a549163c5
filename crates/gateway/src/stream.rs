//! Streaming response adapter.
//!
//! Turns search output into OpenAI `chat.completion.chunk` frames. Both
//! sources share one wire shape:
//!
//! ```text
//! data: {"id":"chatcmpl-…","object":"chat.completion.chunk",…,"delta":{"content":"…"},"finish_reason":null}
//! …
//! data: {"id":"chatcmpl-…",…,"delta":{},"finish_reason":"stop"}
//! data: [DONE]
//! ```
//!
//! The adapter runs `Streaming → Terminating → Closed`. Whatever happens
//! upstream, a response ends with exactly one `stop` chunk and the sentinel.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event as SseEvent, Sse};
use futures::{Stream, StreamExt};
use graphchat_search::{SearchEvent, SearchStream};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::format::{display_lines, format_response};

pub const DONE_SENTINEL: &str = "[DONE]";

/// A `chat.completion.chunk` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

/// An empty delta serializes as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl CompletionChunk {
    fn new(id: &str, model: &str, content: Option<String>, finish_reason: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk".into(),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta { content },
                finish_reason: finish_reason.map(str::to_string),
            }],
        }
    }

    pub fn content(id: &str, model: &str, text: impl Into<String>) -> Self {
        Self::new(id, model, Some(text.into()), None)
    }

    pub fn stop(id: &str, model: &str) -> Self {
        Self::new(id, model, None, Some("stop"))
    }
}

/// One frame on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Chunk(CompletionChunk),
    Done,
}

impl Frame {
    fn into_event(self) -> SseEvent {
        match self {
            Self::Chunk(chunk) => {
                SseEvent::default().data(serde_json::to_string(&chunk).unwrap_or_default())
            }
            Self::Done => SseEvent::default().data(DONE_SENTINEL),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Streaming,
    Terminating,
    Closed,
}

enum Upstream {
    Fragments(SearchStream),
    Lines {
        lines: std::vec::IntoIter<String>,
        delay: Duration,
        started: bool,
    },
    Released,
}

/// Sequences one response. The adapter alone emits the terminal chunk
/// and the sentinel.
pub struct StreamAdapter {
    id: String,
    model: String,
    state: AdapterState,
    upstream: Upstream,
}

impl StreamAdapter {
    /// Relay fragments from a streaming search as they arrive.
    pub fn fragments(id: impl Into<String>, model: impl Into<String>, source: SearchStream) -> Self {
        Self::with_upstream(id.into(), model.into(), Upstream::Fragments(source))
    }

    /// Replay a finished answer one display line at a time, `delay` apart.
    pub fn text(
        id: impl Into<String>,
        model: impl Into<String>,
        answer: &str,
        delay: Duration,
    ) -> Self {
        let lines = display_lines(&format_response(answer));
        Self::with_upstream(
            id.into(),
            model.into(),
            Upstream::Lines {
                lines: lines.into_iter(),
                delay,
                started: false,
            },
        )
    }

    fn with_upstream(id: String, model: String, upstream: Upstream) -> Self {
        Self {
            id,
            model,
            state: AdapterState::Streaming,
            upstream,
        }
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    /// Next piece of content, or `None` once the source is exhausted or
    /// has failed. Failures are logged here and never leave the adapter.
    async fn pull(&mut self) -> Option<String> {
        match &mut self.upstream {
            Upstream::Fragments(source) => loop {
                match source.next().await {
                    Some(Ok(SearchEvent::Fragment(text))) if text.is_empty() => continue,
                    Some(Ok(SearchEvent::Fragment(text))) => return Some(text),
                    Some(Ok(SearchEvent::Context(tables))) => {
                        debug!(tables = tables.len(), "Skipping provenance records");
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Search stream failed; terminating response");
                        return None;
                    }
                    None => return None,
                }
            },
            Upstream::Lines {
                lines,
                delay,
                started,
            } => {
                let line = lines.next()?;
                if *started && !delay.is_zero() {
                    tokio::time::sleep(*delay).await;
                }
                *started = true;
                Some(line)
            }
            Upstream::Released => None,
        }
    }

    /// Advance the state machine by one frame.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        match self.state {
            AdapterState::Streaming => match self.pull().await {
                Some(text) => Some(Frame::Chunk(CompletionChunk::content(&self.id, &self.model, text))),
                None => {
                    // Release the source before finishing the response.
                    self.upstream = Upstream::Released;
                    self.state = AdapterState::Terminating;
                    Some(Frame::Chunk(CompletionChunk::stop(&self.id, &self.model)))
                }
            },
            AdapterState::Terminating => {
                self.state = AdapterState::Closed;
                Some(Frame::Done)
            }
            AdapterState::Closed => None,
        }
    }

    /// All frames of the response. Dropping the stream drops the source.
    pub fn into_frames(self) -> impl Stream<Item = Frame> + Send {
        futures::stream::unfold(self, |mut adapter| async move {
            adapter.next_frame().await.map(|frame| (frame, adapter))
        })
    }

    pub fn into_sse(self) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>> + Send> {
        Sse::new(self.into_frames().map(|frame| Ok(frame.into_event())))
    }
}

/// A fresh `chatcmpl-…` id, shared by every chunk of one response.
pub fn completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}
