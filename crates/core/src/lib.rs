//! # graphchat core
//!
//! Domain types, traits, and error definitions for the graphchat retrieval
//! gateway. This crate has **no framework dependencies**: it defines the
//! domain model that the provider, graph, search and gateway crates
//! implement against.
//!
//! ## Seams
//!
//! The two collaborators the gateway consumes are traits defined here:
//! - [`Provider`] — the language-model client (complete or stream)
//! - [`ContextBuilder`] — the context assembler (query + history → evidence)
//!
//! Implementations live in their own crates, and tests swap in stubs.

pub mod context;
pub mod error;
pub mod message;
pub mod provider;
pub mod token;

// Re-export key types at crate root for ergonomics
pub use context::{ContextBuilder, ContextOptions, ContextRecord, ContextTable, RetrievalContext};
pub use error::{ContextError, Error, ProviderError, SearchError};
pub use message::{Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ProviderStream, StreamChunk, Usage};
