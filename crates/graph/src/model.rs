//! Row types for the indexer output tables.
//!
//! Field names follow the indexer's column names; aliases cover the
//! variants seen across indexer versions. Ids may be exported as numbers
//! or strings, so they are normalized to `String` on load.

use serde::{Deserialize, Deserializer, Serialize};

/// A graph node: a named entity extracted from the source documents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Entity {
    #[serde(deserialize_with = "id_string")]
    pub id: String,

    #[serde(default, alias = "human_readable_id", deserialize_with = "id_string")]
    pub short_id: String,

    #[serde(alias = "name")]
    pub title: String,

    #[serde(default, rename = "type")]
    pub entity_type: String,

    #[serde(default)]
    pub description: String,

    /// Node degree; the "number of relationships" column
    #[serde(default, alias = "degree")]
    pub rank: f32,

    #[serde(default, alias = "communities", deserialize_with = "id_list")]
    pub community_ids: Vec<String>,

    #[serde(default, deserialize_with = "id_list")]
    pub text_unit_ids: Vec<String>,
}

/// A node-to-community assignment at one hierarchy level.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeMembership {
    #[serde(alias = "id")]
    pub title: String,

    #[serde(deserialize_with = "id_string")]
    pub community: String,

    #[serde(default)]
    pub level: u32,

    #[serde(default)]
    pub degree: f32,
}

/// A directed edge between two entity titles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(deserialize_with = "id_string")]
    pub id: String,

    #[serde(default, alias = "human_readable_id", deserialize_with = "id_string")]
    pub short_id: String,

    pub source: String,
    pub target: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub weight: f32,

    #[serde(default, alias = "combined_degree")]
    pub rank: f32,

    #[serde(default, deserialize_with = "id_list")]
    pub text_unit_ids: Vec<String>,
}

/// A summary written for one community of the graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommunityReport {
    #[serde(default, deserialize_with = "id_string")]
    pub id: String,

    #[serde(default, alias = "human_readable_id", deserialize_with = "id_string")]
    pub short_id: String,

    #[serde(deserialize_with = "id_string")]
    pub community: String,

    #[serde(default)]
    pub level: u32,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub summary: String,

    #[serde(default)]
    pub full_content: String,

    #[serde(default)]
    pub rank: f32,
}

/// A chunk of source text the graph was extracted from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextUnit {
    #[serde(deserialize_with = "id_string")]
    pub id: String,

    #[serde(default, alias = "human_readable_id", deserialize_with = "id_string")]
    pub short_id: String,

    pub text: String,

    #[serde(default)]
    pub n_tokens: usize,
}

/// A claim (covariate) asserted about a subject entity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Claim {
    #[serde(deserialize_with = "id_string")]
    pub id: String,

    #[serde(default, alias = "human_readable_id", deserialize_with = "id_string")]
    pub short_id: String,

    pub subject_id: String,

    #[serde(default)]
    pub object_id: String,

    #[serde(default, rename = "type")]
    pub claim_type: String,

    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub start_date: String,

    #[serde(default)]
    pub end_date: String,

    #[serde(default)]
    pub source_text: String,
}

fn value_to_id(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        // 3.0 from a float column is still community "3"
        serde_json::Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn id_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    serde_json::Value::deserialize(d).map(value_to_id)
}

fn id_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(match serde_json::Value::deserialize(d)? {
        serde_json::Value::Array(items) => items.into_iter().map(value_to_id).collect(),
        serde_json::Value::Null => Vec::new(),
        single => vec![value_to_id(single)],
    })
}
