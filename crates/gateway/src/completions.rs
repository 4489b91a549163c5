//! OpenAI-compatible chat completion endpoints.
//!
//! - `POST /v1/chat/completions` — local search, streamed or line-replayed
//! - `POST /v1/chat/combined`    — local then global search, line-replayed
//! - `GET  /v1/models`           — the single served model
//!
//! Every successful response is `text/event-stream`. Failures before the
//! stream starts get a `{"detail": ...}` body; failures after it starts are
//! absorbed by the stream adapter.

use axum::{
    Json,
    extract::State,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use graphchat_core::message::Message;
use graphchat_search::{combined_search, window};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::SharedState;
use crate::stream::{StreamAdapter, completion_id};

/// Request body of `/v1/chat/completions`. Sampling fields are accepted
/// for compatibility; the engines use their configured parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// The fixed error envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl ApiError {
    pub fn internal(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::internal(rejection.body_text())
    }
}

/// A validated, windowed request: the query and the turns before it.
#[derive(Debug)]
pub(crate) struct Prepared {
    pub query: String,
    pub history: Vec<Message>,
    pub model: String,
}

pub(crate) fn prepare(
    state: &SharedState,
    request: ChatCompletionRequest,
) -> Result<Prepared, ApiError> {
    let Some(last) = request.messages.last() else {
        return Err(ApiError::internal("messages must contain at least one message"));
    };
    let query = last.content.clone();

    let mut turns = window(&request.messages, state.max_turns, &state.persona);
    if !turns.first().is_some_and(Message::is_system) {
        turns.insert(0, Message::system(&state.persona));
    }
    turns.pop();

    let model = if request.model.is_empty() {
        state.served_model.clone()
    } else {
        request.model
    };
    Ok(Prepared {
        query,
        history: turns,
        model,
    })
}

/// `POST /v1/chat/completions`
pub async fn chat_completions(
    State(state): State<SharedState>,
    payload: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.inspect_err(|e| warn!(error = %e, "Rejected completion request"))?;
    let stream = request.stream;
    let prepared = prepare(&state, request)?;
    let id = completion_id();
    info!(
        id = %id,
        stream,
        turns = prepared.history.len() + 1,
        query_len = prepared.query.len(),
        "Chat completion request"
    );

    let adapter = if stream {
        let source = state.local.stream_search(&prepared.query, &prepared.history);
        StreamAdapter::fragments(id, prepared.model, source)
    } else {
        let result = state.local.search(&prepared.query, &prepared.history).await;
        StreamAdapter::text(id, prepared.model, result.answer.text(), state.line_delay)
    };
    Ok(adapter.into_sse().into_response())
}

/// `POST /v1/chat/combined`: both engines, always line-replayed.
pub async fn chat_combined(
    State(state): State<SharedState>,
    payload: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.inspect_err(|e| warn!(error = %e, "Rejected combined request"))?;
    let prepared = prepare(&state, request)?;
    let id = completion_id();
    info!(id = %id, query_len = prepared.query.len(), "Combined search request");

    let combined = combined_search(
        state.local.as_ref(),
        state.global.as_ref(),
        &prepared.query,
        &prepared.history,
    )
    .await;
    let adapter = StreamAdapter::text(id, prepared.model, &combined.text, state.line_delay);
    Ok(adapter.into_sse().into_response())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelCard>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelCard {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

/// `GET /v1/models`
pub async fn list_models(State(state): State<SharedState>) -> Json<ModelList> {
    Json(ModelList {
        object: "list".into(),
        data: vec![ModelCard {
            id: state.served_model.clone(),
            object: "model".into(),
            created: chrono::Utc::now().timestamp() - 100_000,
            owned_by: "graphrag".into(),
        }],
    })
}
