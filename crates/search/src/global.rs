//! Global search: map each batch of community reports to scored key
//! points, then reduce the best points into one answer.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use graphchat_config::AppConfig;
use graphchat_core::context::{ContextBuilder, ContextOptions, RetrievalContext};
use graphchat_core::error::SearchError;
use graphchat_core::message::Message;
use graphchat_core::provider::{Provider, ProviderRequest};
use graphchat_core::token::{estimate_messages_tokens, estimate_tokens};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::engine::{
    Answer, STREAM_BUFFER, SearchEngine, SearchEvent, SearchResult, SearchStream, relay,
};
use crate::prompt::{
    GENERAL_KNOWLEDGE_INSTRUCTION, MAP_SYSTEM_PROMPT, NO_DATA_ANSWER, PromptTemplate,
    REDUCE_SYSTEM_PROMPT,
};

#[derive(Debug, Clone)]
pub struct GlobalSearchParams {
    pub model: String,
    pub temperature: f32,
    pub max_data_tokens: usize,
    pub map_max_tokens: u32,
    pub reduce_max_tokens: u32,
    pub concurrency: usize,
    pub allow_general_knowledge: bool,
    pub json_mode: bool,
    pub response_type: String,
}

impl GlobalSearchParams {
    pub fn from_config(config: &AppConfig) -> Self {
        let global = &config.search.global;
        Self {
            model: config.llm.model.clone(),
            temperature: global.temperature,
            max_data_tokens: global.max_data_tokens,
            map_max_tokens: global.map_max_tokens,
            reduce_max_tokens: global.reduce_max_tokens,
            concurrency: global.concurrency.max(1),
            allow_general_knowledge: global.allow_general_knowledge,
            json_mode: global.json_mode,
            response_type: config.search.response_type.clone(),
        }
    }
}

/// A scored finding from one map call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KeyPoint {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub score: f32,
}

#[derive(Debug, Deserialize)]
struct MapResponse {
    #[serde(default)]
    points: Vec<KeyPoint>,
}

/// Parse a map reply. Models sometimes wrap the JSON in a code fence.
pub fn parse_map_response(text: &str) -> Result<Vec<KeyPoint>, SearchError> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str::<MapResponse>(body.trim())
        .map(|r| r.points)
        .map_err(|e| SearchError::MapResponse(e.to_string()))
}

/// Community-summary search over the whole graph.
#[derive(Clone)]
pub struct GlobalSearch {
    provider: Arc<dyn Provider>,
    context_builder: Arc<dyn ContextBuilder>,
    map_prompt: Arc<PromptTemplate>,
    reduce_prompt: Arc<PromptTemplate>,
    params: GlobalSearchParams,
}

/// Output of the map step, ready for reduction.
struct Mapped {
    context: RetrievalContext,
    points: Vec<KeyPoint>,
    map_calls: usize,
    prompt_tokens: usize,
}

impl GlobalSearch {
    /// Build the engine with the built-in map and reduce prompts.
    pub fn new(
        provider: Arc<dyn Provider>,
        context_builder: Arc<dyn ContextBuilder>,
        params: GlobalSearchParams,
    ) -> Result<Self, SearchError> {
        let reduce = if params.allow_general_knowledge {
            format!("{REDUCE_SYSTEM_PROMPT}{GENERAL_KNOWLEDGE_INSTRUCTION}")
        } else {
            REDUCE_SYSTEM_PROMPT.to_string()
        };
        Ok(Self {
            provider,
            context_builder,
            map_prompt: Arc::new(PromptTemplate::new(MAP_SYSTEM_PROMPT, &["context_data"])?),
            reduce_prompt: Arc::new(PromptTemplate::new(reduce, &["response_type", "report_data"])?),
            params,
        })
    }

    fn context_options(&self) -> ContextOptions {
        ContextOptions {
            max_tokens: self.params.max_data_tokens,
            conversation_history_max_turns: 0,
            conversation_history_user_turns_only: true,
        }
    }

    async fn map_batch(&self, query: &str, batch: &str) -> (Vec<KeyPoint>, usize) {
        let messages = vec![
            Message::system(self.map_prompt.render(&[("context_data", batch)])),
            Message::user(query),
        ];
        let prompt_tokens = estimate_messages_tokens(&messages);
        let request = ProviderRequest::new(&self.params.model, messages, self.params.temperature)
            .with_max_tokens(self.params.map_max_tokens)
            .with_json_mode(self.params.json_mode);

        let points = match self.provider.complete(request).await {
            Ok(response) => parse_map_response(&response.message.content).unwrap_or_else(|e| {
                warn!(error = %e, "Discarding unparseable map response");
                Vec::new()
            }),
            Err(e) => {
                warn!(error = %e, "Map call failed; batch contributes no points");
                Vec::new()
            }
        };
        (points, prompt_tokens)
    }

    async fn map(&self, query: &str, history: &[Message]) -> Result<Mapped, SearchError> {
        let context = self
            .context_builder
            .build_context(query, history, &self.context_options())
            .await?;

        let calls: Vec<_> = context
            .batches
            .iter()
            .map(|batch| self.map_batch(query, batch))
            .collect();
        let results: Vec<(Vec<KeyPoint>, usize)> = futures::stream::iter(calls)
            .buffered(self.params.concurrency)
            .collect()
            .await;

        let map_calls = results.len();
        let prompt_tokens = results.iter().map(|(_, t)| t).sum();
        let points: Vec<KeyPoint> = results.into_iter().flat_map(|(p, _)| p).collect();
        debug!(map_calls, points = points.len(), "Global search map step done");

        Ok(Mapped {
            context,
            points,
            map_calls,
            prompt_tokens,
        })
    }

    /// Render the surviving points, best first, within the data budget.
    /// Returns `None` when no point scored above zero.
    fn report_data(&self, points: &[KeyPoint]) -> Option<String> {
        let mut ranked: Vec<&KeyPoint> = points.iter().filter(|p| p.score > 0.0).collect();
        if ranked.is_empty() {
            return None;
        }
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut data = Vec::new();
        let mut tokens = 0;
        for (i, point) in ranked.into_iter().enumerate() {
            let section = format!(
                "----Analyst {}----\nImportance Score: {}\n{}",
                i + 1,
                point.score,
                point.description
            );
            let cost = estimate_tokens(&section);
            if tokens + cost > self.params.max_data_tokens && !data.is_empty() {
                break;
            }
            tokens += cost;
            data.push(section);
        }
        Some(data.join("\n\n"))
    }

    fn reduce_request(&self, query: &str, report_data: &str) -> ProviderRequest {
        let messages = vec![
            Message::system(self.reduce_prompt.render(&[
                ("response_type", self.params.response_type.as_str()),
                ("report_data", report_data),
            ])),
            Message::user(query),
        ];
        ProviderRequest::new(&self.params.model, messages, self.params.temperature)
            .with_max_tokens(self.params.reduce_max_tokens)
    }

    async fn run_stream(
        &self,
        query: &str,
        history: &[Message],
        tx: &mpsc::Sender<Result<SearchEvent, SearchError>>,
    ) -> Result<(), SearchError> {
        let mapped = self.map(query, history).await?;
        if tx
            .send(Ok(SearchEvent::Context(mapped.context.records)))
            .await
            .is_err()
        {
            return Ok(());
        }

        let Some(report_data) = self
            .report_data(&mapped.points)
            .or_else(|| self.params.allow_general_knowledge.then(String::new))
        else {
            let _ = tx.send(Ok(SearchEvent::Fragment(NO_DATA_ANSWER.to_string()))).await;
            return Ok(());
        };

        let upstream = self
            .provider
            .stream(self.reduce_request(query, &report_data))
            .await?;
        relay("global", upstream, tx).await
    }
}

#[async_trait]
impl SearchEngine for GlobalSearch {
    fn name(&self) -> &str {
        "global"
    }

    async fn search(&self, query: &str, history: &[Message]) -> SearchResult {
        let start = Instant::now();

        let mapped = match self.map(query, history).await {
            Ok(mapped) => mapped,
            Err(e) => {
                warn!(engine = "global", error = %e, "Context build failed; returning degraded answer");
                return SearchResult {
                    answer: Answer::Degraded { reason: e.to_string() },
                    context: RetrievalContext::empty(),
                    elapsed: start.elapsed(),
                    model_calls: 1,
                    prompt_tokens: 0,
                };
            }
        };

        let mut model_calls = mapped.map_calls;
        let mut prompt_tokens = mapped.prompt_tokens;
        let report_data = self
            .report_data(&mapped.points)
            .or_else(|| self.params.allow_general_knowledge.then(String::new));

        let answer = match report_data {
            None => Answer::Generated(NO_DATA_ANSWER.to_string()),
            Some(report_data) => {
                let request = self.reduce_request(query, &report_data);
                prompt_tokens += estimate_messages_tokens(&request.messages);
                model_calls += 1;
                match self.provider.complete(request).await {
                    Ok(response) => Answer::Generated(response.message.content),
                    Err(e) => {
                        warn!(engine = "global", error = %e, "Reduce call failed; returning degraded answer");
                        Answer::Degraded { reason: e.to_string() }
                    }
                }
            }
        };

        let result = SearchResult {
            answer,
            context: mapped.context,
            elapsed: start.elapsed(),
            model_calls,
            prompt_tokens,
        };
        info!(
            engine = "global",
            elapsed_ms = result.elapsed.as_millis() as u64,
            model_calls,
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
                warn!(engine = "global", error = %e, "Streaming search failed");
                let _ = tx.send(Err(e)).await;
            }
        });
        ReceiverStream::new(rx)
    }
}
