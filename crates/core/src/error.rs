//! Error types for the graphchat domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all graphchat operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Retrieval errors ---
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    // --- Search errors ---
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures while loading knowledge-graph tables or assembling context.
#[derive(Debug, Clone, Error)]
pub enum ContextError {
    #[error("Failed to load table '{table}': {reason}")]
    TableLoad { table: String, reason: String },

    #[error("Context build failed: {0}")]
    Build(String),

    #[error("Embedding lookup failed: {0}")]
    Embedding(String),
}

/// Failures raised inside a search engine.
///
/// `search` never returns these to its caller (it degrades instead);
/// `stream_search` forwards them as the terminal element of its sequence.
#[derive(Debug, Clone, Error)]
pub enum SearchError {
    #[error("Retrieval failed: {0}")]
    Context(#[from] ContextError),

    #[error("Generation failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Invalid prompt template: {0}")]
    Template(String),

    #[error("Malformed map response: {0}")]
    MapResponse(String),
}
