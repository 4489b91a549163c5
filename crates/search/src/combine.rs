//! Both engines, one answer.

use graphchat_core::message::Message;
use tracing::info;

use crate::engine::{SearchEngine, SearchResult};

pub const LOCAL_HEADING: &str = "## Local Search Results";
pub const GLOBAL_HEADING: &str = "## Global Search Results";

/// The combined answer and the per-engine results behind it.
#[derive(Debug, Clone)]
pub struct CombinedResult {
    pub text: String,
    pub local: SearchResult,
    pub global: SearchResult,
}

/// Run local search, then global search, on the same query.
///
/// The engines run one after the other, never concurrently. A degraded
/// engine leaves its section empty; the other section is still produced.
pub async fn combined_search(
    local: &dyn SearchEngine,
    global: &dyn SearchEngine,
    query: &str,
    history: &[Message],
) -> CombinedResult {
    let local_result = local.search(query, history).await;
    let global_result = global.search(query, history).await;

    info!(
        local_degraded = local_result.answer.is_degraded(),
        global_degraded = global_result.answer.is_degraded(),
        "Combined search complete"
    );

    let text = format!(
        "{LOCAL_HEADING}\n\n{}\n\n{GLOBAL_HEADING}\n\n{}",
        local_result.answer.text(),
        global_result.answer.text()
    );
    CombinedResult {
        text,
        local: local_result,
        global: global_result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Answer, SearchStream};
    use graphchat_core::context::RetrievalContext;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Records the order engines are entered and left.
    struct FixedEngine {
        name: &'static str,
        answer: Answer,
        log: std::sync::Arc<Mutex<Vec<String>>>,
        active: std::sync::Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl SearchEngine for FixedEngine {
        fn name(&self) -> &str {
            self.name
        }

        async fn search(&self, _query: &str, _history: &[Message]) -> SearchResult {
            assert_eq!(self.active.fetch_add(1, Ordering::SeqCst), 0, "engines overlapped");
            self.log.lock().unwrap().push(format!("{} start", self.name));
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.log.lock().unwrap().push(format!("{} end", self.name));
            self.active.fetch_sub(1, Ordering::SeqCst);
            SearchResult {
                answer: self.answer.clone(),
                context: RetrievalContext::empty(),
                elapsed: Duration::ZERO,
                model_calls: 1,
                prompt_tokens: 0,
            }
        }

        fn stream_search(&self, _query: &str, _history: &[Message]) -> SearchStream {
            unimplemented!("combine never streams")
        }
    }

    fn pair(local: Answer, global: Answer) -> (FixedEngine, FixedEngine, std::sync::Arc<Mutex<Vec<String>>>) {
        let log = std::sync::Arc::new(Mutex::new(Vec::new()));
        let active = std::sync::Arc::new(AtomicUsize::new(0));
        (
            FixedEngine {
                name: "local",
                answer: local,
                log: log.clone(),
                active: active.clone(),
            },
            FixedEngine {
                name: "global",
                answer: global,
                log: log.clone(),
                active,
            },
            log,
        )
    }

    #[tokio::test]
    async fn local_section_comes_first() {
        let (local, global, log) = pair(
            Answer::Generated("Local facts.".into()),
            Answer::Generated("Global themes.".into()),
        );
        let combined = combined_search(&local, &global, "q", &[]).await;

        assert_eq!(
            combined.text,
            format!("{LOCAL_HEADING}\n\nLocal facts.\n\n{GLOBAL_HEADING}\n\nGlobal themes.")
        );
        assert_eq!(
            *log.lock().unwrap(),
            vec!["local start", "local end", "global start", "global end"]
        );
    }

    #[tokio::test]
    async fn degraded_engine_leaves_empty_section() {
        let (local, global, _) = pair(
            Answer::Degraded {
                reason: "boom".into(),
            },
            Answer::Generated("Global themes.".into()),
        );
        let combined = combined_search(&local, &global, "q", &[]).await;

        assert!(combined.text.contains("Global themes."));
        assert!(combined.local.answer.is_degraded());
        assert!(combined.text.starts_with(&format!("{LOCAL_HEADING}\n\n\n\n{GLOBAL_HEADING}")));
    }
}
