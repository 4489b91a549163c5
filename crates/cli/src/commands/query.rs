//! `graphchat query` — Answer one question from the terminal.

use std::path::Path;

use graphchat_core::message::Message;
use graphchat_gateway::format::format_response;
use graphchat_search::{SearchResult, combined_search};

use super::load_config;
use crate::Engine;

pub async fn run(
    config_path: Option<&Path>,
    engine: Engine,
    question: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    tracing::debug!(engine = ?engine, "Running one-shot query");
    let state = graphchat_gateway::bootstrap(&config)?;
    let history = [Message::system(&config.search.persona)];

    let answer = match engine {
        Engine::Local => report(state.local.search(question, &history).await)?,
        Engine::Global => report(state.global.search(question, &history).await)?,
        Engine::Combined => {
            combined_search(state.local.as_ref(), state.global.as_ref(), question, &history)
                .await
                .text
        }
    };

    println!("{}", format_response(&answer));
    Ok(())
}

fn report(result: SearchResult) -> Result<String, String> {
    eprintln!(
        "   {} model call(s), ~{} prompt tokens, {:.1}s",
        result.model_calls,
        result.prompt_tokens,
        result.elapsed.as_secs_f32()
    );
    match result.answer {
        graphchat_search::Answer::Generated(text) => Ok(text),
        graphchat_search::Answer::Degraded { reason } => Err(format!("Search failed: {reason}")),
    }
}
