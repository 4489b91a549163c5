//! Local (entity-grounded) context assembly.
//!
//! Entities are matched against the query, then the context is grown
//! outward from them: their community reports, relationships, claims and
//! the source text they were extracted from. Each part gets a fixed share
//! of the token budget.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use graphchat_config::LocalSearchConfig;
use graphchat_core::context::{ContextBuilder, ContextOptions, ContextTable, RetrievalContext};
use graphchat_core::error::ContextError;
use graphchat_core::message::{Message, Role};
use tracing::debug;

use crate::model::{CommunityReport, Entity, Relationship};
use crate::store::KnowledgeGraph;
use crate::table::{SectionWriter, cell, number};

/// Shape of the local context, taken from `[search.local]`.
#[derive(Debug, Clone)]
pub struct LocalContextParams {
    pub text_unit_prop: f32,
    pub community_prop: f32,
    pub top_k_mapped_entities: usize,
    pub top_k_relationships: usize,
    pub include_entity_rank: bool,
    pub include_relationship_weight: bool,
    pub include_community_rank: bool,
}

impl Default for LocalContextParams {
    fn default() -> Self {
        Self::from(&LocalSearchConfig::default())
    }
}

impl From<&LocalSearchConfig> for LocalContextParams {
    fn from(config: &LocalSearchConfig) -> Self {
        Self {
            text_unit_prop: config.text_unit_prop,
            community_prop: config.community_prop,
            top_k_mapped_entities: config.top_k_mapped_entities,
            top_k_relationships: config.top_k_relationships,
            include_entity_rank: config.include_entity_rank,
            include_relationship_weight: config.include_relationship_weight,
            include_community_rank: config.include_community_rank,
        }
    }
}

pub struct LocalContextBuilder {
    graph: Arc<KnowledgeGraph>,
    params: LocalContextParams,
}

impl LocalContextBuilder {
    pub fn new(graph: Arc<KnowledgeGraph>, params: LocalContextParams) -> Self {
        Self { graph, params }
    }

    /// Rank entities by how well they match the query.
    ///
    /// A query term found in the title counts double; a title that appears
    /// verbatim in the query wins outright. Ties go to the higher-degree
    /// entity.
    fn map_entities(&self, query: &str) -> Vec<&Entity> {
        let query_lower = query.to_lowercase();
        let terms = query_terms(&query_lower);

        let mut scored: Vec<(f32, &Entity)> = self
            .graph
            .entities
            .iter()
            .filter_map(|entity| {
                let title = entity.title.to_lowercase();
                let description = entity.description.to_lowercase();
                let mut score = 0.0;
                if !title.is_empty() && query_lower.contains(&title) {
                    score += 10.0;
                }
                for term in &terms {
                    if title.contains(term.as_str()) {
                        score += 2.0;
                    } else if description.contains(term.as_str()) {
                        score += 1.0;
                    }
                }
                (score > 0.0).then_some((score, entity))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| b.1.rank.total_cmp(&a.1.rank))
        });
        scored
            .into_iter()
            .take(self.params.top_k_mapped_entities)
            .map(|(_, e)| e)
            .collect()
    }

    fn conversation_section(
        &self,
        history: &[Message],
        options: &ContextOptions,
    ) -> Option<(String, ContextTable)> {
        if options.conversation_history_max_turns == 0 {
            return None;
        }
        let turns: Vec<&Message> = history
            .iter()
            .filter(|m| match m.role {
                Role::System => false,
                Role::User => true,
                Role::Assistant => !options.conversation_history_user_turns_only,
            })
            .collect();
        let start = turns
            .len()
            .saturating_sub(options.conversation_history_max_turns);

        let mut section =
            SectionWriter::new("Conversation", vec!["turn", "content"], options.max_tokens);
        for turn in &turns[start..] {
            if !section.push(vec![turn.role.to_string(), cell(&turn.content)]) {
                break;
            }
        }
        section.finish()
    }

    fn reports_section(&self, entities: &[&Entity], budget: usize) -> Option<(String, ContextTable)> {
        let mut hits: HashMap<&str, usize> = HashMap::new();
        for entity in entities {
            for community in &entity.community_ids {
                *hits.entry(community.as_str()).or_default() += 1;
            }
        }

        let mut reports: Vec<(&CommunityReport, usize)> = hits
            .into_iter()
            .filter_map(|(c, n)| self.graph.report_for(c).map(|r| (r, n)))
            .collect();
        reports.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| b.0.rank.total_cmp(&a.0.rank))
                .then_with(|| a.0.community.cmp(&b.0.community))
        });

        let mut columns = vec!["id", "title"];
        if self.params.include_community_rank {
            columns.push("rank");
        }
        columns.push("content");

        let mut section = SectionWriter::new("Reports", columns, budget);
        for (report, _) in reports {
            let mut cells = vec![short_id(&report.short_id, &report.community), cell(&report.title)];
            if self.params.include_community_rank {
                cells.push(number(report.rank));
            }
            cells.push(cell(report_content(report)));
            if !section.push(cells) {
                break;
            }
        }
        section.finish()
    }

    fn entities_section(&self, entities: &[&Entity], budget: usize) -> SectionWriter {
        let mut columns = vec!["id", "entity", "description"];
        if self.params.include_entity_rank {
            columns.push("number of relationships");
        }

        let mut section = SectionWriter::new("Entities", columns, budget);
        for entity in entities {
            let mut cells = vec![
                short_id(&entity.short_id, &entity.id),
                cell(&entity.title),
                cell(&entity.description),
            ];
            if self.params.include_entity_rank {
                cells.push(number(entity.rank));
            }
            if !section.push(cells) {
                break;
            }
        }
        section
    }

    /// Relationships touching the selected entities. Edges with both ends
    /// selected come first, then the strongest edges out of the selection.
    fn select_relationships(&self, entities: &[&Entity]) -> Vec<&Relationship> {
        let selected: HashSet<&str> = entities.iter().map(|e| e.title.as_str()).collect();
        let mut in_network = Vec::new();
        let mut out_network = Vec::new();
        for rel in &self.graph.relationships {
            let source = selected.contains(rel.source.as_str());
            let target = selected.contains(rel.target.as_str());
            match (source, target) {
                (true, true) => in_network.push(rel),
                (true, false) | (false, true) => out_network.push(rel),
                _ => {}
            }
        }

        let by_strength = |a: &&Relationship, b: &&Relationship| {
            b.rank
                .total_cmp(&a.rank)
                .then_with(|| b.weight.total_cmp(&a.weight))
        };
        in_network.sort_by(by_strength);
        out_network.sort_by(by_strength);

        let limit = self.params.top_k_relationships * entities.len().max(1);
        in_network.extend(out_network);
        in_network.truncate(limit);
        in_network
    }

    fn relationships_section(&self, entities: &[&Entity], budget: usize) -> SectionWriter {
        let mut columns = vec!["id", "source", "target", "description"];
        if self.params.include_relationship_weight {
            columns.push("weight");
        }

        let mut section = SectionWriter::new("Relationships", columns, budget);
        for rel in self.select_relationships(entities) {
            let mut cells = vec![
                short_id(&rel.short_id, &rel.id),
                cell(&rel.source),
                cell(&rel.target),
                cell(&rel.description),
            ];
            if self.params.include_relationship_weight {
                cells.push(number(rel.weight));
            }
            if !section.push(cells) {
                break;
            }
        }
        section
    }

    fn claims_section(&self, entities: &[&Entity], budget: usize) -> SectionWriter {
        let columns = vec![
            "id",
            "entity",
            "object_id",
            "status",
            "start_date",
            "end_date",
            "description",
        ];
        let mut section = SectionWriter::new("Claims", columns, budget);
        for entity in entities {
            for claim in self.graph.claims.iter().filter(|c| c.subject_id == entity.title) {
                let cells = vec![
                    short_id(&claim.short_id, &claim.id),
                    cell(&claim.subject_id),
                    cell(&claim.object_id),
                    cell(&claim.status),
                    cell(&claim.start_date),
                    cell(&claim.end_date),
                    cell(&claim.description),
                ];
                if !section.push(cells) {
                    return section;
                }
            }
        }
        section
    }

    fn sources_section(&self, entities: &[&Entity], budget: usize) -> Option<(String, ContextTable)> {
        let mut seen = HashSet::new();
        let mut section = SectionWriter::new("Sources", vec!["id", "text"], budget);
        for entity in entities {
            for unit_id in &entity.text_unit_ids {
                if !seen.insert(unit_id.as_str()) {
                    continue;
                }
                let Some(unit) = self.graph.text_unit(unit_id) else {
                    continue;
                };
                if !section.push(vec![short_id(&unit.short_id, &unit.id), cell(&unit.text)]) {
                    return section.finish();
                }
            }
        }
        section.finish()
    }
}

#[async_trait]
impl ContextBuilder for LocalContextBuilder {
    fn name(&self) -> &str {
        "local"
    }

    async fn build_context(
        &self,
        query: &str,
        history: &[Message],
        options: &ContextOptions,
    ) -> Result<RetrievalContext, ContextError> {
        let mut sections = Vec::new();

        let conversation = self.conversation_section(history, options);
        let conversation_tokens = conversation
            .as_ref()
            .map(|(text, _)| graphchat_core::token::estimate_tokens(text))
            .unwrap_or(0);
        sections.extend(conversation);

        let remaining = options.max_tokens.saturating_sub(conversation_tokens);
        let community_budget = (remaining as f32 * self.params.community_prop) as usize;
        let text_unit_budget = (remaining as f32 * self.params.text_unit_prop) as usize;
        let local_budget = remaining.saturating_sub(community_budget + text_unit_budget);

        let entities = self.map_entities(query);
        debug!(
            query_len = query.len(),
            mapped_entities = entities.len(),
            remaining,
            "Local context: entities mapped"
        );

        sections.extend(self.reports_section(&entities, community_budget));

        // Entities, relationships and claims draw from one shared pool.
        let entity_section = self.entities_section(&entities, local_budget);
        let mut pool = local_budget.saturating_sub(entity_section.tokens());
        let relationship_section = self.relationships_section(&entities, pool);
        pool = pool.saturating_sub(relationship_section.tokens());
        let claim_section = self.claims_section(&entities, pool);
        sections.extend(entity_section.finish());
        sections.extend(relationship_section.finish());
        sections.extend(claim_section.finish());

        sections.extend(self.sources_section(&entities, text_unit_budget));

        let (texts, records): (Vec<String>, Vec<ContextTable>) = sections.into_iter().unzip();
        let context = RetrievalContext::single(texts.join("\n\n"), records);
        debug!(
            tables = context.records.len(),
            rows = context.record_count(),
            "Local context built"
        );
        Ok(context)
    }
}

/// Split a lowercased query into match terms.
///
/// Words of three or more characters count, minus stop words. Scripts
/// written without spaces (Chinese, Japanese, Korean) arrive as one long
/// run, so those runs become overlapping character bigrams instead.
fn query_terms(query_lower: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for word in query_lower.split(|c: char| !c.is_alphanumeric()) {
        let mut rest = word;
        while let Some(first) = rest.chars().next() {
            let cjk = is_cjk(first);
            let end = rest.find(|c: char| is_cjk(c) != cjk).unwrap_or(rest.len());
            let (segment, tail) = rest.split_at(end);
            if cjk {
                push_bigrams(segment, &mut terms);
            } else if segment.chars().count() >= 3 && !STOP_WORDS.contains(&segment) {
                terms.push(segment.to_string());
            }
            rest = tail;
        }
    }
    terms.sort();
    terms.dedup();
    terms
}

fn push_bigrams(segment: &str, terms: &mut Vec<String>) {
    let chars: Vec<char> = segment.chars().collect();
    if chars.len() == 1 {
        terms.push(segment.to_string());
        return;
    }
    terms.extend(chars.windows(2).map(|pair| pair.iter().collect::<String>()));
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30ff}'   // kana
        | '\u{3400}'..='\u{4dbf}' // CJK extension A
        | '\u{4e00}'..='\u{9fff}'
        | '\u{ac00}'..='\u{d7af}' // hangul
        | '\u{f900}'..='\u{faff}'
    )
}

const STOP_WORDS: &[&str] = &[
    "the", "and", "are", "for", "has", "have", "how", "its", "was", "what", "when", "where",
    "which", "who", "why", "with", "does", "did", "about", "tell", "from", "that", "this",
];

fn short_id(short: &str, fallback: &str) -> String {
    if short.is_empty() {
        fallback.to_string()
    } else {
        short.to_string()
    }
}

fn report_content(report: &CommunityReport) -> &str {
    if report.full_content.is_empty() {
        &report.summary
    } else {
        &report.full_content
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Claim, TextUnit};

    fn graph() -> Arc<KnowledgeGraph> {
        let entities = vec![
            Entity {
                id: "e1".into(),
                short_id: "0".into(),
                title: "COMPANY A".into(),
                description: "A manufacturer of widgets".into(),
                rank: 3.0,
                community_ids: vec!["1".into()],
                text_unit_ids: vec!["t1".into()],
                ..Default::default()
            },
            Entity {
                id: "e2".into(),
                short_id: "1".into(),
                title: "PERSON C".into(),
                description: "Chief executive of Company A".into(),
                rank: 1.0,
                community_ids: vec!["1".into()],
                text_unit_ids: vec!["t1".into()],
                ..Default::default()
            },
            Entity {
                id: "e3".into(),
                short_id: "2".into(),
                title: "HARBOR".into(),
                description: "A port town".into(),
                ..Default::default()
            },
        ];
        let relationships = vec![Relationship {
            id: "r1".into(),
            short_id: "0".into(),
            source: "PERSON C".into(),
            target: "COMPANY A".into(),
            description: "leads".into(),
            weight: 2.0,
            ..Default::default()
        }];
        let reports = vec![CommunityReport {
            community: "1".into(),
            title: "Company A leadership".into(),
            full_content: "Company A is led by Person C.".into(),
            rank: 7.0,
            ..Default::default()
        }];
        let text_units = vec![TextUnit {
            id: "t1".into(),
            text: "Company A was founded by Person C.".into(),
            ..Default::default()
        }];
        let claims = vec![Claim {
            id: "c1".into(),
            short_id: "0".into(),
            subject_id: "COMPANY A".into(),
            object_id: "NONE".into(),
            status: "SUSPECTED".into(),
            description: "Company A is suspected of price fixing".into(),
            ..Default::default()
        }];
        Arc::new(KnowledgeGraph::from_parts(
            entities,
            relationships,
            reports,
            text_units,
            claims,
            2,
        ))
    }

    fn options(max_tokens: usize) -> ContextOptions {
        ContextOptions {
            max_tokens,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn context_has_all_sections() {
        let builder = LocalContextBuilder::new(graph(), LocalContextParams::default());
        let ctx = builder
            .build_context("Tell me about Company A", &[], &options(4_000))
            .await
            .unwrap();

        assert!(ctx.text.contains("-----Entities-----"));
        assert!(ctx.text.contains("-----Relationships-----"));
        assert!(ctx.text.contains("-----Claims-----"));
        assert!(ctx.text.contains("-----Reports-----"));
        assert!(ctx.text.contains("-----Sources-----"));
        assert_eq!(ctx.batches.len(), 1);
        assert_eq!(ctx.table("claims").unwrap().rows.len(), 1);
        assert!(!ctx.text.contains("HARBOR"));
    }

    #[tokio::test]
    async fn best_match_comes_first() {
        let builder = LocalContextBuilder::new(graph(), LocalContextParams::default());
        let ctx = builder
            .build_context("Who runs Company A?", &[], &options(4_000))
            .await
            .unwrap();
        let entities = ctx.table("entities").unwrap();
        assert_eq!(entities.rows[0]["entity"], "COMPANY A");
    }

    #[tokio::test]
    async fn conversation_uses_recent_user_turns() {
        let builder = LocalContextBuilder::new(graph(), LocalContextParams::default());
        let history = vec![
            Message::system("persona"),
            Message::user("first question"),
            Message::assistant("first answer"),
            Message::user("second question"),
        ];
        let ctx = builder
            .build_context("Company A", &history, &options(4_000))
            .await
            .unwrap();

        assert!(ctx.text.starts_with("-----Conversation-----"));
        let turns = ctx.table("conversation").unwrap();
        assert_eq!(turns.rows.len(), 2);
        assert!(!ctx.text.contains("first answer"));
        assert!(!ctx.text.contains("persona"));
    }

    #[tokio::test]
    async fn unmatched_query_gives_empty_context() {
        let builder = LocalContextBuilder::new(graph(), LocalContextParams::default());
        let ctx = builder
            .build_context("quantum chromodynamics", &[], &options(4_000))
            .await
            .unwrap();
        assert!(ctx.is_empty());
    }

    #[tokio::test]
    async fn tiny_budget_stays_bounded() {
        let builder = LocalContextBuilder::new(graph(), LocalContextParams::default());
        let ctx = builder
            .build_context("Company A", &[], &options(40))
            .await
            .unwrap();
        assert!(graphchat_core::token::estimate_tokens(&ctx.text) <= 40);
    }

    #[test]
    fn cjk_runs_split_into_bigrams() {
        assert_eq!(query_terms("公司的创始人"), vec!["公司", "创始", "司的", "始人", "的创"]);
        assert_eq!(query_terms("甲"), vec!["甲"]);
        assert_eq!(query_terms("widget公司 the port"), vec!["port", "widget", "公司"]);
    }

    #[tokio::test]
    async fn cjk_query_matches_partial_title() {
        let entities = vec![
            Entity {
                id: "e1".into(),
                title: "甲公司".into(),
                description: "一家零件制造商".into(),
                rank: 2.0,
                ..Default::default()
            },
            Entity {
                id: "e2".into(),
                title: "港口".into(),
                description: "一个小镇".into(),
                ..Default::default()
            },
        ];
        let graph = Arc::new(KnowledgeGraph::from_parts(
            entities,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            2,
        ));
        let builder = LocalContextBuilder::new(graph, LocalContextParams::default());

        let ctx = builder
            .build_context("这家公司的创始人是谁", &[], &options(4_000))
            .await
            .unwrap();
        let entities = ctx.table("entities").unwrap();
        assert_eq!(entities.rows.len(), 1);
        assert_eq!(entities.rows[0]["entity"], "甲公司");
    }
}
