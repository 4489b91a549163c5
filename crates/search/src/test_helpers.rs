//! Shared test doubles for the engine tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use graphchat_core::context::{ContextBuilder, ContextOptions, RetrievalContext};
use graphchat_core::error::{ContextError, ProviderError};
use graphchat_core::message::Message;
use graphchat_core::provider::{
    Provider, ProviderRequest, ProviderResponse, ProviderStream, StreamChunk, Usage,
};

/// A provider that replays scripted replies and records every request.
///
/// `complete` pops the next reply; `stream` sends the scripted fragments,
/// then the optional fault.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    fragments: Vec<String>,
    stream_fault: Option<ProviderError>,
    silent: bool,
    held: Mutex<Option<tokio::sync::mpsc::Sender<Result<StreamChunk, ProviderError>>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn replying(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| Ok(r.to_string())).collect(), vec![], None)
    }

    pub fn failing(error: ProviderError) -> Self {
        Self::new(vec![Err(error)], vec![], None)
    }

    pub fn streaming(fragments: &[&str]) -> Self {
        Self::new(
            vec![],
            fragments.iter().map(|f| f.to_string()).collect(),
            None,
        )
    }

    pub fn with_replies(mut self, replies: Vec<Result<String, ProviderError>>) -> Self {
        self.replies = Mutex::new(replies.into());
        self
    }

    pub fn with_stream_fault(mut self, fault: ProviderError) -> Self {
        self.stream_fault = Some(fault);
        self
    }

    /// Streams that open but never produce a chunk. The sending half is
    /// kept so tests can watch for the consumer releasing it.
    pub fn silent() -> Self {
        let mut provider = Self::new(vec![], vec![], None);
        provider.silent = true;
        provider
    }

    /// The sending half of the last silent stream.
    pub fn held_sender(&self) -> Option<tokio::sync::mpsc::Sender<Result<StreamChunk, ProviderError>>> {
        self.held.lock().unwrap().clone()
    }

    fn new(
        replies: Vec<Result<String, ProviderError>>,
        fragments: Vec<String>,
        stream_fault: Option<ProviderError>,
    ) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fragments,
            stream_fault,
            silent: false,
            held: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedProvider: no more replies");
        reply.map(|text| ProviderResponse {
            message: Message::assistant(text),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "mock-model".into(),
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ProviderStream, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let fragments = self.fragments.clone();
        let fault = self.stream_fault.clone();
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        if self.silent {
            *self.held.lock().unwrap() = Some(tx);
            return Ok(rx);
        }
        tokio::spawn(async move {
            for fragment in fragments {
                let chunk = StreamChunk {
                    content: Some(fragment),
                    ..Default::default()
                };
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
            let last = match fault {
                Some(fault) => Err(fault),
                None => Ok(StreamChunk {
                    done: true,
                    ..Default::default()
                }),
            };
            let _ = tx.send(last).await;
        });
        Ok(rx)
    }
}

/// A context builder that returns a fixed context, or always fails.
pub struct StubContextBuilder {
    context: Option<RetrievalContext>,
    queries: Mutex<Vec<(String, Vec<Message>)>>,
}

impl StubContextBuilder {
    pub fn fixed(context: RetrievalContext) -> Self {
        Self {
            context: Some(context),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            context: None,
            queries: Mutex::new(Vec::new()),
        }
    }

    /// `(query, history)` of every call, in order.
    pub fn queries(&self) -> Vec<(String, Vec<Message>)> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContextBuilder for StubContextBuilder {
    fn name(&self) -> &str {
        "stub"
    }

    async fn build_context(
        &self,
        query: &str,
        history: &[Message],
        _options: &ContextOptions,
    ) -> Result<RetrievalContext, ContextError> {
        self.queries
            .lock()
            .unwrap()
            .push((query.to_string(), history.to_vec()));
        self.context
            .clone()
            .ok_or_else(|| ContextError::Build("vector store unavailable".into()))
    }
}
