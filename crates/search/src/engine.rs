//! The search engine capability shared by local and global search.

use std::time::Duration;

use async_trait::async_trait;
use graphchat_core::context::{ContextTable, RetrievalContext};
use graphchat_core::error::SearchError;
use graphchat_core::message::Message;
use graphchat_core::provider::ProviderStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// Capacity of the channel between a streaming search and its consumer.
pub const STREAM_BUFFER: usize = 32;

/// The outcome of a search: a model answer, or a degraded empty one.
#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    Generated(String),
    Degraded { reason: String },
}

impl Answer {
    /// The answer text; empty when degraded.
    pub fn text(&self) -> &str {
        match self {
            Self::Generated(text) => text,
            Self::Degraded { .. } => "",
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub answer: Answer,
    /// Evidence the answer was built from (empty if retrieval failed).
    pub context: RetrievalContext,
    pub elapsed: Duration,
    pub model_calls: usize,
    /// Estimated, for logs only.
    pub prompt_tokens: usize,
}

/// One element of a streaming search.
///
/// The provenance records always come first, followed by answer fragments
/// in generation order.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchEvent {
    Context(Vec<ContextTable>),
    Fragment(String),
}

/// A one-shot, lazily produced search. Dropping it cancels the search.
pub type SearchStream = ReceiverStream<Result<SearchEvent, SearchError>>;

/// A search strategy over the knowledge graph.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Answer `query` in one shot.
    ///
    /// Never fails: retrieval or model errors are logged and come back as
    /// [`Answer::Degraded`]. `history` excludes the query turn.
    async fn search(&self, query: &str, history: &[Message]) -> SearchResult;

    /// Answer `query` incrementally.
    ///
    /// An error element ends the stream; nothing follows it.
    fn stream_search(&self, query: &str, history: &[Message]) -> SearchStream;
}

/// The transcript an engine compiles: prior turns plus the query as the
/// newest user turn.
pub(crate) fn with_query(history: &[Message], query: &str) -> Vec<Message> {
    let mut turns = Vec::with_capacity(history.len() + 1);
    turns.extend_from_slice(history);
    turns.push(Message::user(query));
    turns
}

/// Forward model fragments until the model finishes or the consumer goes
/// away. Returning drops `upstream`, which releases the generation.
pub(crate) async fn relay(
    engine: &str,
    mut upstream: ProviderStream,
    tx: &mpsc::Sender<Result<SearchEvent, SearchError>>,
) -> Result<(), SearchError> {
    loop {
        let chunk = tokio::select! {
            _ = tx.closed() => {
                debug!(engine, "Search stream consumer went away");
                return Ok(());
            }
            chunk = upstream.recv() => chunk,
        };
        let Some(chunk) = chunk else {
            return Ok(());
        };
        let chunk = chunk?;
        if let Some(content) = chunk.content.filter(|c| !c.is_empty()) {
            if tx.send(Ok(SearchEvent::Fragment(content))).await.is_err() {
                debug!(engine, "Search stream consumer went away");
                return Ok(());
            }
        }
        if chunk.done {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_answer_is_empty() {
        let answer = Answer::Degraded {
            reason: "context failed".into(),
        };
        assert_eq!(answer.text(), "");
        assert!(answer.is_degraded());
        assert!(!Answer::Generated("x".into()).is_degraded());
    }

    #[test]
    fn query_becomes_last_turn() {
        let turns = with_query(&[Message::system("persona")], "who?");
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1], Message::user("who?"));
    }
}
