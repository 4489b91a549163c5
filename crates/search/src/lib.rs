//! # graphchat search
//!
//! The retrieval half of the gateway: bounding the conversation window,
//! compiling the instruction prompt, and the two search engines.
//!
//! Both engines implement [`SearchEngine`]. [`LocalSearch`] answers from
//! entities near the query with a single model call; [`GlobalSearch`]
//! maps over community reports and reduces the findings.

pub mod combine;
pub mod engine;
pub mod global;
pub mod local;
pub mod prompt;
pub mod window;

#[cfg(test)]
mod test_helpers;

pub use combine::{CombinedResult, combined_search};
pub use engine::{Answer, SearchEngine, SearchEvent, SearchResult, SearchStream};
pub use global::{GlobalSearch, GlobalSearchParams};
pub use local::{LocalSearch, LocalSearchParams};
pub use prompt::{PromptCompiler, PromptTemplate};
pub use window::window;
