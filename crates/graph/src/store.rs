//! In-memory knowledge graph, loaded once at startup.
//!
//! The indexer writes its output tables to a directory. Each table is read
//! from `<dir>/<table>.parquet`, or from `<dir>/<table>.json` as an array of
//! rows when no parquet file exists. After loading, the graph is immutable
//! and shared read-only across requests.

use std::collections::HashMap;
use std::path::Path;

use graphchat_core::error::ContextError;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::columnar;
use crate::model::{Claim, CommunityReport, Entity, NodeMembership, Relationship, TextUnit};

pub const ENTITY_TABLE: &str = "create_final_entities";
pub const NODE_TABLE: &str = "create_final_nodes";
pub const RELATIONSHIP_TABLE: &str = "create_final_relationships";
pub const COMMUNITY_REPORT_TABLE: &str = "create_final_community_reports";
pub const TEXT_UNIT_TABLE: &str = "create_final_text_units";
pub const COVARIATE_TABLE: &str = "create_final_covariates";

/// The loaded indexer output.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    pub reports: Vec<CommunityReport>,
    pub text_units: Vec<TextUnit>,
    pub claims: Vec<Claim>,
    text_unit_index: HashMap<String, usize>,
    entity_index: HashMap<String, usize>,
}

/// Row counts, for startup logs and `graphchat check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphStats {
    pub entities: usize,
    pub relationships: usize,
    pub reports: usize,
    pub text_units: usize,
    pub claims: usize,
}

impl KnowledgeGraph {
    /// Assemble a graph from already-parsed rows.
    ///
    /// Reports above `community_level` are dropped and entity community
    /// memberships are cut to the communities that still have a report.
    pub fn from_parts(
        mut entities: Vec<Entity>,
        relationships: Vec<Relationship>,
        mut reports: Vec<CommunityReport>,
        text_units: Vec<TextUnit>,
        claims: Vec<Claim>,
        community_level: u32,
    ) -> Self {
        reports.retain(|r| r.level <= community_level);
        let report_communities: std::collections::HashSet<&str> =
            reports.iter().map(|r| r.community.as_str()).collect();
        for entity in &mut entities {
            entity
                .community_ids
                .retain(|c| report_communities.contains(c.as_str()));
        }

        let text_unit_index = text_units
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i))
            .collect();
        let entity_index = entities
            .iter()
            .enumerate()
            .map(|(i, e)| (e.title.clone(), i))
            .collect();

        Self {
            entities,
            relationships,
            reports,
            text_units,
            claims,
            text_unit_index,
            entity_index,
        }
    }

    /// Load all tables from `dir`.
    ///
    /// Entities, relationships, community reports and text units are
    /// required; claims are optional. The node table, when present, fills
    /// in community membership and degree for entities at or below
    /// `community_level`.
    pub fn load(dir: &Path, community_level: u32) -> Result<Self, ContextError> {
        info!(dir = %dir.display(), community_level, "Loading knowledge graph tables");

        let mut entities: Vec<Entity> = read_table(dir, ENTITY_TABLE)?;
        if let Some(nodes) = read_optional_table::<NodeMembership>(dir, NODE_TABLE)? {
            apply_memberships(&mut entities, &nodes, community_level);
        }
        let relationships = read_table(dir, RELATIONSHIP_TABLE)?;
        let reports = read_table(dir, COMMUNITY_REPORT_TABLE)?;
        let text_units = read_table(dir, TEXT_UNIT_TABLE)?;
        let claims = read_optional_table(dir, COVARIATE_TABLE)?.unwrap_or_else(|| {
            warn!("No claims table found; claims section will be empty");
            Vec::new()
        });

        let graph = Self::from_parts(
            entities,
            relationships,
            reports,
            text_units,
            claims,
            community_level,
        );
        let stats = graph.stats();
        info!(
            entities = stats.entities,
            relationships = stats.relationships,
            reports = stats.reports,
            text_units = stats.text_units,
            claims = stats.claims,
            "Knowledge graph loaded"
        );
        Ok(graph)
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            entities: self.entities.len(),
            relationships: self.relationships.len(),
            reports: self.reports.len(),
            text_units: self.text_units.len(),
            claims: self.claims.len(),
        }
    }

    pub fn entity_by_title(&self, title: &str) -> Option<&Entity> {
        self.entity_index.get(title).map(|&i| &self.entities[i])
    }

    pub fn text_unit(&self, id: &str) -> Option<&TextUnit> {
        self.text_unit_index.get(id).map(|&i| &self.text_units[i])
    }

    pub fn report_for(&self, community: &str) -> Option<&CommunityReport> {
        self.reports.iter().find(|r| r.community == community)
    }
}

fn apply_memberships(entities: &mut [Entity], nodes: &[NodeMembership], community_level: u32) {
    let mut by_title: HashMap<&str, Vec<&NodeMembership>> = HashMap::new();
    for node in nodes.iter().filter(|n| n.level <= community_level) {
        by_title.entry(node.title.as_str()).or_default().push(node);
    }

    for entity in entities.iter_mut() {
        let Some(memberships) = by_title.get(entity.title.as_str()) else {
            continue;
        };
        for node in memberships {
            if !entity.community_ids.contains(&node.community) {
                entity.community_ids.push(node.community.clone());
            }
            if entity.rank == 0.0 {
                entity.rank = node.degree;
            }
        }
    }
}

fn read_table<T: DeserializeOwned>(dir: &Path, table: &str) -> Result<Vec<T>, ContextError> {
    read_optional_table(dir, table)?.ok_or_else(|| ContextError::TableLoad {
        table: table.to_string(),
        reason: format!(
            "neither {table}.parquet nor {table}.json found in {}",
            dir.display()
        ),
    })
}

fn read_optional_table<T: DeserializeOwned>(
    dir: &Path,
    table: &str,
) -> Result<Option<Vec<T>>, ContextError> {
    let load_error = |reason: String| ContextError::TableLoad {
        table: table.to_string(),
        reason,
    };

    let parquet_path = dir.join(format!("{table}.parquet"));
    if parquet_path.exists() {
        let rows = columnar::read_rows(&parquet_path, table)?;
        return rows
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<T>, _>>()
            .map(Some)
            .map_err(|e| load_error(e.to_string()));
    }

    let path = dir.join(format!("{table}.json"));
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(&path).map_err(|e| load_error(e.to_string()))?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| load_error(e.to_string()))
}
