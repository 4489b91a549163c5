//! Configuration loading, validation, and management for graphchat.
//!
//! Loads configuration from `~/.graphchat/config.toml` (or an explicit path)
//! with environment variable overrides. Validates all settings at startup;
//! a bad config never reaches the request path.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Language-model client settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// HTTP gateway settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Retrieval and search engine settings
    #[serde(default)]
    pub search: SearchConfig,
}

fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

// ── LLM ───────────────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider label ("openai", "ollama", "dashscope", ...)
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    /// Base URL of the OpenAI-compatible endpoint
    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Chat model used by every search engine
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Client-side request timeout. The gateway itself never times out.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_llm_provider() -> String {
    "openai".into()
}
fn default_api_base() -> String {
    "https://api.openai.com/v1".into()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".into()
}
fn default_timeout_secs() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_base: default_api_base(),
            api_key: None,
            model: default_llm_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("api_base", &self.api_base)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// ── Gateway ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Model id advertised by `GET /v1/models`
    #[serde(default = "default_served_model")]
    pub served_model: String,

    /// Pause between simulated line chunks on the non-streaming path
    #[serde(default = "default_line_delay_ms")]
    pub line_delay_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8012
}
fn default_served_model() -> String {
    "graphrag-local".into()
}
fn default_line_delay_ms() -> u64 {
    50
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            served_model: default_served_model(),
            line_delay_ms: default_line_delay_ms(),
        }
    }
}

// ── Search ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Directory holding the indexer output tables
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,

    /// Deepest community level considered by both engines
    #[serde(default = "default_community_level")]
    pub community_level: u32,

    /// Target response length and format handed to the prompt
    #[serde(default = "default_response_type")]
    pub response_type: String,

    /// Persona used for the leading system turn
    #[serde(default = "default_persona")]
    pub persona: String,

    /// Most recent turns kept after windowing
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    #[serde(default)]
    pub local: LocalSearchConfig,

    #[serde(default)]
    pub global: GlobalSearchConfig,
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("output")
}
fn default_community_level() -> u32 {
    2
}
fn default_response_type() -> String {
    "multiple paragraphs".into()
}
fn default_persona() -> String {
    "You are the knowledge assistant for this organization.".into()
}
fn default_max_turns() -> usize {
    20
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            community_level: default_community_level(),
            response_type: default_response_type(),
            persona: default_persona(),
            max_turns: default_max_turns(),
            local: LocalSearchConfig::default(),
            global: GlobalSearchConfig::default(),
        }
    }
}

/// Local (entity-grounded) search parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSearchConfig {
    /// Share of the context budget given to source text units
    #[serde(default = "default_text_unit_prop")]
    pub text_unit_prop: f32,

    /// Share of the context budget given to community reports
    #[serde(default = "default_community_prop")]
    pub community_prop: f32,

    #[serde(default = "default_history_turns")]
    pub conversation_history_max_turns: usize,

    #[serde(default = "default_true")]
    pub conversation_history_user_turns_only: bool,

    #[serde(default = "default_top_k")]
    pub top_k_mapped_entities: usize,

    #[serde(default = "default_top_k")]
    pub top_k_relationships: usize,

    #[serde(default = "default_true")]
    pub include_entity_rank: bool,

    #[serde(default = "default_true")]
    pub include_relationship_weight: bool,

    #[serde(default)]
    pub include_community_rank: bool,

    /// Token budget for the rendered context
    #[serde(default = "default_local_context_tokens")]
    pub max_tokens: usize,

    /// Generation cap for the answer
    #[serde(default = "default_answer_tokens")]
    pub llm_max_tokens: u32,

    #[serde(default)]
    pub temperature: f32,
}

fn default_text_unit_prop() -> f32 {
    0.5
}
fn default_community_prop() -> f32 {
    0.1
}
fn default_history_turns() -> usize {
    5
}
fn default_top_k() -> usize {
    10
}
fn default_local_context_tokens() -> usize {
    400
}
fn default_answer_tokens() -> u32 {
    2_000
}

impl Default for LocalSearchConfig {
    fn default() -> Self {
        Self {
            text_unit_prop: default_text_unit_prop(),
            community_prop: default_community_prop(),
            conversation_history_max_turns: default_history_turns(),
            conversation_history_user_turns_only: true,
            top_k_mapped_entities: default_top_k(),
            top_k_relationships: default_top_k(),
            include_entity_rank: true,
            include_relationship_weight: true,
            include_community_rank: false,
            max_tokens: default_local_context_tokens(),
            llm_max_tokens: default_answer_tokens(),
            temperature: 0.0,
        }
    }
}

/// Global (community map-reduce) search parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSearchConfig {
    /// Token budget per map batch
    #[serde(default = "default_max_data_tokens")]
    pub max_data_tokens: usize,

    #[serde(default = "default_map_max_tokens")]
    pub map_max_tokens: u32,

    #[serde(default = "default_answer_tokens")]
    pub reduce_max_tokens: u32,

    /// Map calls in flight at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub allow_general_knowledge: bool,

    #[serde(default = "default_true")]
    pub json_mode: bool,

    #[serde(default = "default_true")]
    pub shuffle_data: bool,

    #[serde(default = "default_true")]
    pub include_community_rank: bool,

    #[serde(default)]
    pub min_community_rank: f32,

    #[serde(default = "default_true")]
    pub include_community_weight: bool,

    #[serde(default = "default_true")]
    pub normalize_community_weight: bool,

    #[serde(default)]
    pub temperature: f32,
}

fn default_max_data_tokens() -> usize {
    12_000
}
fn default_map_max_tokens() -> u32 {
    1_000
}
fn default_concurrency() -> usize {
    32
}

impl Default for GlobalSearchConfig {
    fn default() -> Self {
        Self {
            max_data_tokens: default_max_data_tokens(),
            map_max_tokens: default_map_max_tokens(),
            reduce_max_tokens: default_answer_tokens(),
            concurrency: default_concurrency(),
            allow_general_knowledge: false,
            json_mode: true,
            shuffle_data: true,
            include_community_rank: true,
            min_community_rank: 0.0,
            include_community_weight: true,
            normalize_community_weight: true,
            temperature: 0.0,
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from the default path (~/.graphchat/config.toml).
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_overrides(&Self::config_dir().join("config.toml"))
    }

    /// Load from `path`, then apply environment variable overrides:
    /// - `GRAPHRAG_API_KEY`
    /// - `API_BASE`
    /// - `GRAPHRAG_LLM_MODEL`
    /// - `INPUT_DIR`
    /// - `GRAPHCHAT_PORT`
    pub fn load_with_overrides(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var("GRAPHRAG_API_KEY").filter(|v| !v.is_empty()) {
            self.llm.api_key = Some(key);
        }
        if let Some(base) = var("API_BASE").filter(|v| !v.is_empty()) {
            self.llm.api_base = base;
        }
        if let Some(model) = var("GRAPHRAG_LLM_MODEL").filter(|v| !v.is_empty()) {
            self.llm.model = model;
        }
        if let Some(dir) = var("INPUT_DIR").filter(|v| !v.is_empty()) {
            self.search.input_dir = PathBuf::from(dir);
        }
        if let Some(port) = var("GRAPHCHAT_PORT").and_then(|v| v.parse().ok()) {
            self.gateway.port = port;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".graphchat")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let temps = [self.search.local.temperature, self.search.global.temperature];
        if temps.iter().any(|t| !(0.0..=2.0).contains(t)) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.search.max_turns == 0 {
            return Err(ConfigError::ValidationError(
                "search.max_turns must be > 0".into(),
            ));
        }

        let local = &self.search.local;
        if local.text_unit_prop < 0.0
            || local.community_prop < 0.0
            || local.text_unit_prop + local.community_prop > 1.0
        {
            return Err(ConfigError::ValidationError(
                "text_unit_prop + community_prop must be within 0.0..=1.0".into(),
            ));
        }

        if self.search.global.concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "search.global.concurrency must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
