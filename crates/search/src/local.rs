//! Local search: one context build, one compiled prompt, one model call.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use graphchat_config::AppConfig;
use graphchat_core::context::{ContextBuilder, ContextOptions, RetrievalContext};
use graphchat_core::error::SearchError;
use graphchat_core::message::Message;
use graphchat_core::provider::{Provider, ProviderRequest};
use graphchat_core::token::estimate_messages_tokens;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::engine::{
    Answer, STREAM_BUFFER, SearchEngine, SearchEvent, SearchResult, SearchStream, relay, with_query,
};
use crate::prompt::PromptCompiler;

#[derive(Debug, Clone)]
pub struct LocalSearchParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub response_type: String,
    pub context: ContextOptions,
}

impl LocalSearchParams {
    pub fn from_config(config: &AppConfig) -> Self {
        let local = &config.search.local;
        Self {
            model: config.llm.model.clone(),
            temperature: local.temperature,
            max_tokens: local.llm_max_tokens,
            response_type: config.search.response_type.clone(),
            context: ContextOptions {
                max_tokens: local.max_tokens,
                conversation_history_max_turns: local.conversation_history_max_turns,
                conversation_history_user_turns_only: local.conversation_history_user_turns_only,
            },
        }
    }
}

/// Entity-grounded search.
#[derive(Clone)]
pub struct LocalSearch {
    provider: Arc<dyn Provider>,
    context_builder: Arc<dyn ContextBuilder>,
    compiler: Arc<PromptCompiler>,
    params: LocalSearchParams,
}

impl LocalSearch {
    pub fn new(
        provider: Arc<dyn Provider>,
        context_builder: Arc<dyn ContextBuilder>,
        compiler: PromptCompiler,
        params: LocalSearchParams,
    ) -> Self {
        Self {
            provider,
            context_builder,
            compiler: Arc::new(compiler),
            params,
        }
    }

    fn request(&self, messages: Vec<Message>) -> ProviderRequest {
        ProviderRequest::new(&self.params.model, messages, self.params.temperature)
            .with_max_tokens(self.params.max_tokens)
    }

    async fn build(&self, query: &str, history: &[Message]) -> Result<RetrievalContext, SearchError> {
        let context = self
            .context_builder
            .build_context(query, history, &self.params.context)
            .await?;
        debug!(
            builder = self.context_builder.name(),
            rows = context.record_count(),
            "Local search context ready"
        );
        Ok(context)
    }

    async fn run_stream(
        &self,
        query: &str,
        history: &[Message],
        tx: &mpsc::Sender<Result<SearchEvent, SearchError>>,
    ) -> Result<(), SearchError> {
        let context = self.build(query, history).await?;
        let messages = self.compiler.compile(
            &with_query(history, query),
            &context.text,
            &self.params.response_type,
        );
        if tx.send(Ok(SearchEvent::Context(context.records))).await.is_err() {
            return Ok(());
        }

        let upstream = self.provider.stream(self.request(messages)).await?;
        relay("local", upstream, tx).await
    }
}

#[async_trait]
impl SearchEngine for LocalSearch {
    fn name(&self) -> &str {
        "local"
    }

    async fn search(&self, query: &str, history: &[Message]) -> SearchResult {
        let start = Instant::now();

        let context = match self.build(query, history).await {
            Ok(context) => context,
            Err(e) => {
                warn!(engine = "local", error = %e, "Context build failed; returning degraded answer");
                return SearchResult {
                    answer: Answer::Degraded { reason: e.to_string() },
                    context: RetrievalContext::empty(),
                    elapsed: start.elapsed(),
                    model_calls: 1,
                    prompt_tokens: 0,
                };
            }
        };

        let messages = self.compiler.compile(
            &with_query(history, query),
            &context.text,
            &self.params.response_type,
        );
        let prompt_tokens = estimate_messages_tokens(&messages);

        let answer = match self.provider.complete(self.request(messages)).await {
            Ok(response) => Answer::Generated(response.message.content),
            Err(e) => {
                warn!(engine = "local", error = %e, "Model call failed; returning degraded answer");
                Answer::Degraded { reason: e.to_string() }
            }
        };

        let result = SearchResult {
            answer,
            context,
            elapsed: start.elapsed(),
            model_calls: 1,
            prompt_tokens,
        };
        info!(
            engine = "local",
            elapsed_ms = result.elapsed.as_millis() as u64,
            prompt_tokens,
            degraded = result.answer.is_degraded(),
            "Search complete"
        );
        result
    }

    fn stream_search(&self, query: &str, history: &[Message]) -> SearchStream {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let engine = self.clone();
        let query = query.to_string();
        let history = history.to_vec();

        tokio::spawn(async move {
            if let Err(e) = engine.run_stream(&query, &history, &tx).await {
                warn!(engine = "local", error = %e, "Streaming search failed");
                let _ = tx.send(Err(e)).await;
            }
        });
        ReceiverStream::new(rx)
    }
}
