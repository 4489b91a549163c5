//! Context assembler contract.
//!
//! A `ContextBuilder` turns a query plus conversation history into the
//! evidence a search engine hands to the model: a text blob sized to an
//! instruction budget, and the provenance rows it was rendered from.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ContextError;
use crate::message::Message;

/// One provenance row, keyed by column name.
pub type ContextRecord = serde_json::Map<String, serde_json::Value>;

/// Provenance rows drawn from one source table ("entities", "claims", ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextTable {
    pub name: String,
    pub rows: Vec<ContextRecord>,
}

impl ContextTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: Vec::new(),
        }
    }
}

/// Evidence retrieved for one query. Built fresh per request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalContext {
    /// Rendered context injected into the instruction prompt.
    pub text: String,

    /// Token-bounded partitions of `text`. Builders that fit a single
    /// window return exactly one batch; map-reduce engines fan out over them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub batches: Vec<String>,

    /// Provenance rows grouped by source table, in render order.
    #[serde(default)]
    pub records: Vec<ContextTable>,
}

impl RetrievalContext {
    /// A context for a single window: `text` is its only batch.
    pub fn single(text: impl Into<String>, records: Vec<ContextTable>) -> Self {
        let text = text.into();
        Self {
            batches: vec![text.clone()],
            text,
            records,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.records.is_empty()
    }

    /// Look up the rows of one source table.
    pub fn table(&self, name: &str) -> Option<&ContextTable> {
        self.records.iter().find(|t| t.name == name)
    }

    /// Total provenance rows across all tables.
    pub fn record_count(&self) -> usize {
        self.records.iter().map(|t| t.rows.len()).sum()
    }
}

/// Per-call knobs for context assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextOptions {
    /// Token budget for the rendered context.
    pub max_tokens: usize,

    /// How many recent conversation turns to fold into the context.
    pub conversation_history_max_turns: usize,

    /// Only user turns count toward the conversation section.
    pub conversation_history_user_turns_only: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            max_tokens: 8_000,
            conversation_history_max_turns: 5,
            conversation_history_user_turns_only: true,
        }
    }
}

/// The context assembler seam.
///
/// Implementations must be safe to call concurrently from many requests.
#[async_trait]
pub trait ContextBuilder: Send + Sync {
    /// A short name for logs ("local", "global", "stub").
    fn name(&self) -> &str;

    /// Build the retrieval context for `query`.
    ///
    /// `history` excludes the current query turn.
    async fn build_context(
        &self,
        query: &str,
        history: &[Message],
        options: &ContextOptions,
    ) -> Result<RetrievalContext, ContextError>;
}
