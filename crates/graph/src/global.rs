//! Global (community-report) context assembly.
//!
//! Global search answers from community reports alone. The reports are
//! packed into token-bounded batches so each one fits a single map call.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use graphchat_config::GlobalSearchConfig;
use graphchat_core::context::{ContextBuilder, ContextOptions, ContextRecord, ContextTable, RetrievalContext};
use graphchat_core::error::ContextError;
use graphchat_core::message::Message;
use graphchat_core::token::estimate_tokens;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::model::CommunityReport;
use crate::store::KnowledgeGraph;
use crate::table::{cell, number};

/// Seed for report shuffling, so the same question sees the same batches.
pub const DEFAULT_RANDOM_SEED: u64 = 86;

#[derive(Debug, Clone)]
pub struct GlobalContextParams {
    pub shuffle_data: bool,
    pub include_community_rank: bool,
    pub min_community_rank: f32,
    pub include_community_weight: bool,
    pub normalize_community_weight: bool,
    pub random_seed: u64,
}

impl Default for GlobalContextParams {
    fn default() -> Self {
        Self::from(&GlobalSearchConfig::default())
    }
}

impl From<&GlobalSearchConfig> for GlobalContextParams {
    fn from(config: &GlobalSearchConfig) -> Self {
        Self {
            shuffle_data: config.shuffle_data,
            include_community_rank: config.include_community_rank,
            min_community_rank: config.min_community_rank,
            include_community_weight: config.include_community_weight,
            normalize_community_weight: config.normalize_community_weight,
            random_seed: DEFAULT_RANDOM_SEED,
        }
    }
}

pub struct GlobalContextBuilder {
    graph: Arc<KnowledgeGraph>,
    params: GlobalContextParams,
}

impl GlobalContextBuilder {
    pub fn new(graph: Arc<KnowledgeGraph>, params: GlobalContextParams) -> Self {
        Self { graph, params }
    }

    /// Occurrence weight of each community: the number of distinct text
    /// units its entities were extracted from.
    fn occurrence_weights(&self) -> HashMap<&str, f32> {
        let mut units: HashMap<&str, HashSet<&str>> = HashMap::new();
        for entity in &self.graph.entities {
            for community in &entity.community_ids {
                units
                    .entry(community.as_str())
                    .or_default()
                    .extend(entity.text_unit_ids.iter().map(String::as_str));
            }
        }

        let mut weights: HashMap<&str, f32> = units
            .into_iter()
            .map(|(c, u)| (c, u.len() as f32))
            .collect();
        if self.params.normalize_community_weight {
            let max = weights.values().copied().fold(0.0_f32, f32::max);
            if max > 0.0 {
                for w in weights.values_mut() {
                    *w /= max;
                }
            }
        }
        weights
    }

    fn columns(&self) -> Vec<&'static str> {
        let mut columns = vec!["id", "title"];
        if self.params.include_community_weight {
            columns.push("occurrence weight");
        }
        columns.push("content");
        if self.params.include_community_rank {
            columns.push("rank");
        }
        columns
    }

    fn ordered_reports(&self, weights: &HashMap<&str, f32>) -> Vec<&CommunityReport> {
        let mut reports: Vec<&CommunityReport> = self
            .graph
            .reports
            .iter()
            .filter(|r| r.rank >= self.params.min_community_rank)
            .collect();

        let weight = |r: &CommunityReport| weights.get(r.community.as_str()).copied().unwrap_or(0.0);
        reports.sort_by(|a, b| {
            weight(*b)
                .total_cmp(&weight(*a))
                .then_with(|| b.rank.total_cmp(&a.rank))
                .then_with(|| a.community.cmp(&b.community))
        });
        if self.params.shuffle_data {
            let mut rng = StdRng::seed_from_u64(self.params.random_seed);
            reports.shuffle(&mut rng);
        }
        reports
    }
}

#[async_trait]
impl ContextBuilder for GlobalContextBuilder {
    fn name(&self) -> &str {
        "global"
    }

    /// Conversation history is not folded in: every batch must stand on
    /// its own for the map step.
    async fn build_context(
        &self,
        _query: &str,
        _history: &[Message],
        options: &ContextOptions,
    ) -> Result<RetrievalContext, ContextError> {
        let weights = if self.params.include_community_weight {
            self.occurrence_weights()
        } else {
            HashMap::new()
        };
        let columns = self.columns();
        let header = format!("-----Reports-----\n{}\n", columns.join("|"));
        let header_tokens = estimate_tokens(&header);

        let mut batches = Vec::new();
        let mut table = ContextTable::new("reports");
        let mut current = header.clone();
        let mut current_tokens = header_tokens;
        let mut current_rows = 0;

        for report in self.ordered_reports(&weights) {
            let mut cells = vec![
                if report.short_id.is_empty() {
                    report.community.clone()
                } else {
                    report.short_id.clone()
                },
                cell(&report.title),
            ];
            if self.params.include_community_weight {
                cells.push(number(
                    weights.get(report.community.as_str()).copied().unwrap_or(0.0),
                ));
            }
            cells.push(cell(if report.full_content.is_empty() {
                &report.summary
            } else {
                &report.full_content
            }));
            if self.params.include_community_rank {
                cells.push(number(report.rank));
            }

            let line = format!("{}\n", cells.join("|"));
            let cost = estimate_tokens(&line);
            // A report that overflows a non-empty batch starts the next one.
            if current_rows > 0 && current_tokens + cost > options.max_tokens {
                batches.push(current.trim_end().to_string());
                current = header.clone();
                current_tokens = header_tokens;
                current_rows = 0;
            }
            current.push_str(&line);
            current_tokens += cost;
            current_rows += 1;

            let mut record = ContextRecord::new();
            for (column, value) in columns.iter().zip(cells) {
                record.insert((*column).to_string(), value.into());
            }
            table.rows.push(record);
        }
        if current_rows > 0 {
            batches.push(current.trim_end().to_string());
        }

        debug!(
            reports = table.rows.len(),
            batches = batches.len(),
            "Global context built"
        );

        if batches.is_empty() {
            return Ok(RetrievalContext::empty());
        }
        Ok(RetrievalContext {
            text: batches.join("\n\n"),
            batches,
            records: vec![table],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Entity;

    fn report(community: &str, rank: f32, content: &str) -> CommunityReport {
        CommunityReport {
            community: community.into(),
            title: format!("Community {community}"),
            full_content: content.into(),
            rank,
            ..Default::default()
        }
    }

    fn graph(reports: Vec<CommunityReport>) -> Arc<KnowledgeGraph> {
        let entities = vec![
            Entity {
                id: "e1".into(),
                title: "COMPANY A".into(),
                community_ids: vec!["1".into()],
                text_unit_ids: vec!["t1".into(), "t2".into()],
                ..Default::default()
            },
            Entity {
                id: "e2".into(),
                title: "HARBOR".into(),
                community_ids: vec!["2".into()],
                text_unit_ids: vec!["t3".into()],
                ..Default::default()
            },
        ];
        Arc::new(KnowledgeGraph::from_parts(entities, vec![], reports, vec![], vec![], 2))
    }

    fn ordered() -> GlobalContextParams {
        GlobalContextParams {
            shuffle_data: false,
            ..Default::default()
        }
    }

    fn options(max_tokens: usize) -> ContextOptions {
        ContextOptions {
            max_tokens,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn reports_ordered_by_weight() {
        let builder = GlobalContextBuilder::new(
            graph(vec![report("2", 9.0, "Harbor trade"), report("1", 1.0, "Company A")]),
            ordered(),
        );
        let ctx = builder.build_context("q", &[], &options(12_000)).await.unwrap();

        assert_eq!(ctx.batches.len(), 1);
        let rows = &ctx.table("reports").unwrap().rows;
        assert_eq!(rows[0]["id"], "1");
        assert_eq!(rows[0]["occurrence weight"], "1");
        assert_eq!(rows[1]["occurrence weight"], "0.5");
        assert!(ctx.text.starts_with("-----Reports-----\nid|title|occurrence weight|content|rank"));
    }

    #[tokio::test]
    async fn small_budget_splits_batches() {
        let reports = (0..6)
            .map(|i| report(&i.to_string(), 1.0, &"word ".repeat(40)))
            .collect();
        let builder = GlobalContextBuilder::new(graph(reports), ordered());
        let ctx = builder.build_context("q", &[], &options(120)).await.unwrap();

        assert!(ctx.batches.len() > 1);
        assert!(ctx.batches.iter().all(|b| b.starts_with("-----Reports-----")));
        assert_eq!(ctx.table("reports").unwrap().rows.len(), 6);
    }

    #[tokio::test]
    async fn min_rank_filters_reports() {
        let params = GlobalContextParams {
            min_community_rank: 5.0,
            ..ordered()
        };
        let builder = GlobalContextBuilder::new(
            graph(vec![report("1", 2.0, "low"), report("2", 8.0, "high")]),
            params,
        );
        let ctx = builder.build_context("q", &[], &options(12_000)).await.unwrap();
        assert_eq!(ctx.table("reports").unwrap().rows.len(), 1);
        assert!(ctx.text.contains("high"));
    }

    #[tokio::test]
    async fn shuffle_is_deterministic() {
        let reports: Vec<_> = (0..20).map(|i| report(&i.to_string(), 1.0, "x")).collect();
        let a = GlobalContextBuilder::new(graph(reports.clone()), GlobalContextParams::default());
        let b = GlobalContextBuilder::new(graph(reports), GlobalContextParams::default());

        let first = a.build_context("q", &[], &options(12_000)).await.unwrap();
        let second = b.build_context("q", &[], &options(12_000)).await.unwrap();
        assert_eq!(first.text, second.text);
    }

    #[tokio::test]
    async fn no_reports_is_empty() {
        let builder = GlobalContextBuilder::new(graph(vec![]), ordered());
        let ctx = builder.build_context("q", &[], &options(12_000)).await.unwrap();
        assert!(ctx.is_empty());
        assert!(ctx.batches.is_empty());
    }
}
