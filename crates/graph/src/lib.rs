//! # graphchat graph
//!
//! The knowledge graph produced by the indexer, and the two context
//! builders that retrieve from it:
//! - [`LocalContextBuilder`] grows a context around entities matched to the query
//! - [`GlobalContextBuilder`] packs community reports into map-reduce batches

mod columnar;
pub mod global;
pub mod local;
pub mod model;
pub mod store;
mod table;

pub use global::{GlobalContextBuilder, GlobalContextParams};
pub use local::{LocalContextBuilder, LocalContextParams};
pub use store::{GraphStats, KnowledgeGraph};
