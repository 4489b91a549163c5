//! Language-model clients for graphchat.
//!
//! All providers implement the `graphchat_core::Provider` trait. The
//! gateway builds exactly one at startup and shares it across requests.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
