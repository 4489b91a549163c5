//! HTTP gateway for graphchat.
//!
//! Serves an OpenAI-compatible chat completion API over the knowledge
//! graph search engines, plus a health check.
//!
//! Built on Axum. Everything a request needs is built once at startup
//! into an immutable [`AppState`] and shared by all requests.

pub mod completions;
pub mod format;
pub mod stream;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    response::Json,
    routing::{get, post},
};
use graphchat_config::AppConfig;
use graphchat_core::error::Error;
use graphchat_core::provider::Provider;
use graphchat_graph::{
    GlobalContextBuilder, GlobalContextParams, KnowledgeGraph, LocalContextBuilder,
    LocalContextParams,
};
use graphchat_providers::OpenAiCompatProvider;
use graphchat_search::{
    GlobalSearch, GlobalSearchParams, LocalSearch, LocalSearchParams, PromptCompiler, SearchEngine,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Shared, read-only state for every request.
pub struct AppState {
    pub local: Arc<dyn SearchEngine>,
    pub global: Arc<dyn SearchEngine>,
    /// Model id reported by `/v1/models` and used when a request names none.
    pub served_model: String,
    /// Leading system turn for requests that bring none.
    pub persona: String,
    pub max_turns: usize,
    /// Pause between replayed lines of a non-streamed answer.
    pub line_delay: Duration,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// State with the given engines and default request settings.
    pub fn new(local: Arc<dyn SearchEngine>, global: Arc<dyn SearchEngine>) -> Self {
        Self::with_config(&AppConfig::default(), local, global)
    }

    pub fn with_config(
        config: &AppConfig,
        local: Arc<dyn SearchEngine>,
        global: Arc<dyn SearchEngine>,
    ) -> Self {
        Self {
            local,
            global,
            served_model: config.gateway.served_model.clone(),
            persona: config.search.persona.clone(),
            max_turns: config.search.max_turns,
            line_delay: Duration::from_millis(config.gateway.line_delay_ms),
        }
    }

    pub fn with_line_delay(mut self, delay: Duration) -> Self {
        self.line_delay = delay;
        self
    }
}

/// Build everything a request needs: tables, model client, engines.
///
/// Any failure here is fatal; the server must not start half-configured.
pub fn bootstrap(config: &AppConfig) -> Result<AppState, Error> {
    config.validate().map_err(|e| Error::Config {
        message: e.to_string(),
    })?;

    let graph = Arc::new(KnowledgeGraph::load(
        &config.search.input_dir,
        config.search.community_level,
    )?);
    let provider: Arc<dyn Provider> = Arc::new(OpenAiCompatProvider::from_config(&config.llm));
    info!(provider = provider.name(), model = %config.llm.model, "Model client ready");

    let local = LocalSearch::new(
        provider.clone(),
        Arc::new(LocalContextBuilder::new(
            graph.clone(),
            LocalContextParams::from(&config.search.local),
        )),
        PromptCompiler::local()?,
        LocalSearchParams::from_config(config),
    );
    let global = GlobalSearch::new(
        provider,
        Arc::new(GlobalContextBuilder::new(
            graph,
            GlobalContextParams::from(&config.search.global),
        )),
        GlobalSearchParams::from_config(config),
    )?;

    Ok(AppState::with_config(config, Arc::new(local), Arc::new(global)))
}

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/models", get(completions::list_models))
        .route("/v1/chat/completions", post(completions::chat_completions))
        .route("/v1/chat/combined", post(completions::chat_combined))
        .layer(CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = Arc::new(bootstrap(&config)?);
    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use graphchat_core::context::RetrievalContext;
    use graphchat_core::error::{ProviderError, SearchError};
    use graphchat_core::message::Message;
    use graphchat_search::{Answer, SearchEvent, SearchResult, SearchStream};
    use http_body_util::BodyExt;
    use std::sync::Mutex;
    use tokio_stream::wrappers::ReceiverStream;
    use tower::ServiceExt;

    /// An engine with a canned answer that records what it was asked.
    struct MockEngine {
        answer: Answer,
        fragments: Vec<String>,
        fail_stream: bool,
        calls: Mutex<Vec<(String, Vec<Message>)>>,
    }

    impl MockEngine {
        fn answering(text: &str) -> Self {
            Self {
                answer: Answer::Generated(text.into()),
                fragments: Vec::new(),
                fail_stream: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn streaming(fragments: &[&str], fail: bool) -> Self {
            Self {
                fragments: fragments.iter().map(|f| f.to_string()).collect(),
                fail_stream: fail,
                ..Self::answering("")
            }
        }

        fn degraded() -> Self {
            Self {
                answer: Answer::Degraded {
                    reason: "context failed".into(),
                },
                ..Self::answering("")
            }
        }

        fn calls(&self) -> Vec<(String, Vec<Message>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl SearchEngine for MockEngine {
        fn name(&self) -> &str {
            "mock"
        }

        async fn search(&self, query: &str, history: &[Message]) -> SearchResult {
            self.calls
                .lock()
                .unwrap()
                .push((query.to_string(), history.to_vec()));
            SearchResult {
                answer: self.answer.clone(),
                context: RetrievalContext::empty(),
                elapsed: Duration::ZERO,
                model_calls: 1,
                prompt_tokens: 0,
            }
        }

        fn stream_search(&self, query: &str, history: &[Message]) -> SearchStream {
            self.calls
                .lock()
                .unwrap()
                .push((query.to_string(), history.to_vec()));
            let (tx, rx) = tokio::sync::mpsc::channel(self.fragments.len() + 2);
            let _ = tx.try_send(Ok(SearchEvent::Context(vec![])));
            for fragment in &self.fragments {
                let _ = tx.try_send(Ok(SearchEvent::Fragment(fragment.clone())));
            }
            if self.fail_stream {
                let _ = tx.try_send(Err(SearchError::Provider(ProviderError::StreamInterrupted(
                    "connection reset".into(),
                ))));
            }
            ReceiverStream::new(rx)
        }
    }

    fn app_with(local: Arc<MockEngine>, global: Arc<MockEngine>) -> Router {
        build_router(Arc::new(
            AppState::new(local, global).with_line_delay(Duration::ZERO),
        ))
    }

    fn app(local: MockEngine) -> Router {
        app_with(Arc::new(local), Arc::new(MockEngine::answering("")))
    }

    fn completion(body: serde_json::Value) -> Request<Body> {
        post_json("/v1/chat/completions", body)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8_lossy(&body).into_owned()
    }

    /// The `data:` payloads of an SSE body, in order.
    fn data_frames(text: &str) -> Vec<String> {
        text.lines()
            .filter_map(|l| l.strip_prefix("data: ").or_else(|| l.strip_prefix("data:")))
            .map(str::to_string)
            .collect()
    }

    fn delta_contents(frames: &[String]) -> Vec<String> {
        frames
            .iter()
            .filter(|f| f.as_str() != "[DONE]")
            .filter_map(|f| {
                let chunk: serde_json::Value = serde_json::from_str(f).unwrap();
                chunk["choices"][0]["delta"]["content"]
                    .as_str()
                    .map(str::to_string)
            })
            .collect()
    }

    fn assert_terminated(frames: &[String]) {
        let n = frames.len();
        assert_eq!(frames[n - 1], "[DONE]");
        let last: serde_json::Value = serde_json::from_str(&frames[n - 2]).unwrap();
        assert_eq!(last["choices"][0]["finish_reason"], "stop");
        assert_eq!(last["choices"][0]["delta"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = app(MockEngine::answering(""));

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn models_lists_served_model() {
        let app = app(MockEngine::answering(""));
        let req = Request::builder()
            .uri("/v1/models")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["object"], "list");
        assert_eq!(json["data"][0]["id"], "graphrag-local");
        assert_eq!(json["data"][0]["owned_by"], "graphrag");
    }

    #[tokio::test]
    async fn non_streaming_replays_lines() {
        let app = app(MockEngine::answering("First point. Second point.\n\nNext paragraph."));
        let response = app
            .oneshot(completion(serde_json::json!({
                "model": "graphrag-local",
                "messages": [{"role": "user", "content": "Summarize"}],
                "stream": false
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        assert!(content_type.contains("text/event-stream"), "got '{content_type}'");

        let frames = data_frames(&body_text(response).await);
        assert_eq!(
            delta_contents(&frames).concat(),
            "First point.\nSecond point.\n\nNext paragraph."
        );
        assert_terminated(&frames);
    }

    #[tokio::test]
    async fn streaming_relays_fragments() {
        let app = app(MockEngine::streaming(&["Com", "pany A ", "has one claim."], false));
        let response = app
            .oneshot(completion(serde_json::json!({
                "model": "graphrag-local",
                "messages": [{"role": "user", "content": "Company A?"}],
                "stream": true
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let frames = data_frames(&body_text(response).await);
        assert_eq!(frames.len(), 5);
        assert_eq!(delta_contents(&frames), vec!["Com", "pany A ", "has one claim."]);
        assert_terminated(&frames);
    }

    #[tokio::test]
    async fn stream_fault_still_terminates() {
        let app = app(MockEngine::streaming(&["partial"], true));
        let response = app
            .oneshot(completion(serde_json::json!({
                "messages": [{"role": "user", "content": "q"}],
                "stream": true
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let frames = data_frames(&body_text(response).await);
        assert_eq!(delta_contents(&frames), vec!["partial"]);
        assert_terminated(&frames);
    }

    #[tokio::test]
    async fn degraded_answer_has_no_content() {
        let app = app(MockEngine::degraded());
        let response = app
            .oneshot(completion(serde_json::json!({
                "messages": [{"role": "user", "content": "q"}]
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let frames = data_frames(&body_text(response).await);
        assert_eq!(frames.len(), 2);
        assert_terminated(&frames);
    }

    #[tokio::test]
    async fn empty_messages_is_error_envelope() {
        let app = app(MockEngine::answering("unused"));
        let response = app
            .oneshot(completion(serde_json::json!({"model": "m", "messages": []})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert!(json["detail"].as_str().unwrap().contains("at least one message"));
    }

    #[tokio::test]
    async fn malformed_body_is_error_envelope() {
        let app = app(MockEngine::answering("unused"));
        let response = app
            .oneshot(completion(serde_json::json!({"messages": "not a list"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert!(json["detail"].is_string());
    }

    #[tokio::test]
    async fn persona_is_prepended_and_query_split_off() {
        let local = Arc::new(MockEngine::answering("ok"));
        let app = app_with(local.clone(), Arc::new(MockEngine::answering("")));
        app.oneshot(completion(serde_json::json!({
            "messages": [
                {"role": "user", "content": "earlier"},
                {"role": "assistant", "content": "reply"},
                {"role": "user", "content": "latest"}
            ]
        })))
        .await
        .unwrap();

        let calls = local.calls();
        assert_eq!(calls.len(), 1);
        let (query, history) = &calls[0];
        assert_eq!(query, "latest");
        assert_eq!(history.len(), 3);
        assert!(history[0].is_system());
        assert_eq!(history[0].content, AppConfig::default().search.persona);
        assert_eq!(history[2], Message::assistant("reply"));
    }

    #[tokio::test]
    async fn client_system_turn_is_kept() {
        let local = Arc::new(MockEngine::answering("ok"));
        let app = app_with(local.clone(), Arc::new(MockEngine::answering("")));
        app.oneshot(completion(serde_json::json!({
            "messages": [
                {"role": "system", "content": "You are the harbor archivist."},
                {"role": "user", "content": "latest"}
            ]
        })))
        .await
        .unwrap();

        let (_, history) = &local.calls()[0];
        assert_eq!(history, &vec![Message::system("You are the harbor archivist.")]);
    }

    #[tokio::test]
    async fn combined_runs_both_engines() {
        let local = Arc::new(MockEngine::answering("Local facts."));
        let global = Arc::new(MockEngine::answering("Global themes."));
        let app = app_with(local.clone(), global.clone());
        let response = app
            .oneshot(post_json(
                "/v1/chat/combined",
                serde_json::json!({"messages": [{"role": "user", "content": "q"}]}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let frames = data_frames(&body_text(response).await);
        let text = delta_contents(&frames).concat();
        let local_at = text.find("Local facts.").unwrap();
        let global_at = text.find("Global themes.").unwrap();
        assert!(local_at < global_at);
        assert_terminated(&frames);
        assert_eq!(local.calls().len(), 1);
        assert_eq!(global.calls().len(), 1);
    }
}
