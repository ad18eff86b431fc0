/// Configuration module for coderank.
///
/// Handles loading, validating, and providing default configuration values.
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::capability::RetryPolicy;
use crate::error::Error;
use crate::feedback::EventType;
use crate::query::DEFAULT_MAX_VARIANTS;
use crate::search::fusion::FusionStrategy;
use crate::search::types::RankOrdering;

pub const DEFAULT_CONFIG_FILE: &str = "coderank.json";

// ── Default value functions ──────────────────────────────────────────

fn default_data_dir() -> String {
    ".coderank".to_string()
}

fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

fn default_window_lines() -> usize {
    60
}

fn default_window_overlap() -> usize {
    10
}

fn default_embed_batch_size() -> usize {
    32
}

fn default_top_k() -> usize {
    10
}

fn default_candidate_pool() -> usize {
    50
}

fn default_max_variants() -> usize {
    DEFAULT_MAX_VARIANTS
}

fn default_linear_alpha() -> f64 {
    0.6
}

fn default_rrf_k() -> f64 {
    60.0
}

fn default_graph_depth() -> usize {
    1
}

fn default_graph_seed_count() -> usize {
    5
}

fn default_graph_decay() -> f64 {
    0.5
}

fn default_rerank_top_n() -> usize {
    20
}

fn default_rerank_beta() -> f64 {
    0.7
}

fn default_half_life_days() -> f64 {
    30.0
}

fn default_min_events() -> u32 {
    3
}

fn default_max_boost() -> f64 {
    0.5
}

fn default_retention_days() -> u32 {
    60
}

fn default_click_weight() -> f64 {
    0.1
}

fn default_useful_weight() -> f64 {
    0.3
}

fn default_not_useful_weight() -> f64 {
    -0.3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// Directory holding one SQLite file per collection.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub feedback: FeedbackConfig,

    #[serde(default)]
    pub capabilities: CapabilityConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IndexingConfig {
    /// Extra glob patterns to skip, on top of the built-in excludes.
    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Line-window size for files without symbol boundaries.
    #[serde(default = "default_window_lines")]
    pub window_lines: usize,

    #[serde(default = "default_window_overlap")]
    pub window_overlap: usize,

    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,

    /// Ask the embedder for its code-specific variant first.
    #[serde(default)]
    pub use_code_embeddings: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Per-scorer, per-variant candidate count before fusion.
    #[serde(default = "default_candidate_pool")]
    pub candidate_pool: usize,

    #[serde(default = "default_max_variants")]
    pub max_variants: usize,

    #[serde(default)]
    pub fusion_strategy: FusionStrategy,

    #[serde(default = "default_linear_alpha")]
    pub linear_alpha: f64,

    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,

    #[serde(default)]
    pub rank_ordering: RankOrdering,

    #[serde(default = "default_true")]
    pub use_query_expansion: bool,

    #[serde(default = "default_true")]
    pub use_feedback_ranking: bool,

    #[serde(default)]
    pub use_graph_context: bool,

    #[serde(default)]
    pub use_reranking: bool,

    #[serde(default = "default_graph_depth")]
    pub graph_depth: usize,

    #[serde(default = "default_graph_seed_count")]
    pub graph_seed_count: usize,

    #[serde(default = "default_graph_decay")]
    pub graph_decay: f64,

    #[serde(default = "default_true")]
    pub include_callers: bool,

    #[serde(default = "default_true")]
    pub include_callees: bool,

    #[serde(default = "default_rerank_top_n")]
    pub rerank_top_n: usize,

    #[serde(default = "default_rerank_beta")]
    pub rerank_beta: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct FeedbackConfig {
    /// Age at which an event counts half.
    #[serde(default = "default_half_life_days")]
    pub half_life_days: f64,

    #[serde(default = "default_min_events")]
    pub min_events: u32,

    /// Boosts are clamped to `[-max_boost, max_boost]`.
    #[serde(default = "default_max_boost")]
    pub max_boost: f64,

    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    #[serde(default = "default_click_weight")]
    pub click_weight: f64,

    #[serde(default = "default_useful_weight")]
    pub useful_weight: f64,

    #[serde(default = "default_not_useful_weight")]
    pub not_useful_weight: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CapabilityConfig {
    /// Pause before the single retry of an embedder, reranker or store call.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            indexing: IndexingConfig::default(),
            retrieval: RetrievalConfig::default(),
            feedback: FeedbackConfig::default(),
            capabilities: CapabilityConfig::default(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            max_file_bytes: default_max_file_bytes(),
            window_lines: default_window_lines(),
            window_overlap: default_window_overlap(),
            embed_batch_size: default_embed_batch_size(),
            use_code_embeddings: false,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            candidate_pool: default_candidate_pool(),
            max_variants: default_max_variants(),
            fusion_strategy: FusionStrategy::default(),
            linear_alpha: default_linear_alpha(),
            rrf_k: default_rrf_k(),
            rank_ordering: RankOrdering::default(),
            use_query_expansion: true,
            use_feedback_ranking: true,
            use_graph_context: false,
            use_reranking: false,
            graph_depth: default_graph_depth(),
            graph_seed_count: default_graph_seed_count(),
            graph_decay: default_graph_decay(),
            include_callers: true,
            include_callees: true,
            rerank_top_n: default_rerank_top_n(),
            rerank_beta: default_rerank_beta(),
        }
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            half_life_days: default_half_life_days(),
            min_events: default_min_events(),
            max_boost: default_max_boost(),
            retention_days: default_retention_days(),
            click_weight: default_click_weight(),
            useful_weight: default_useful_weight(),
            not_useful_weight: default_not_useful_weight(),
        }
    }
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl FeedbackConfig {
    #[must_use]
    pub fn weight(&self, event_type: EventType) -> f64 {
        match event_type {
            EventType::Click => self.click_weight,
            EventType::Useful => self.useful_weight,
            EventType::NotUseful => self.not_useful_weight,
        }
    }
}

impl CapabilityConfig {
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(self.retry_backoff_ms))
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to [`DEFAULT_CONFIG_FILE`].
    /// If the file does not exist, returns a default config and generates a
    /// template when the default path was used.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            DEFAULT_CONFIG_FILE
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            if path == DEFAULT_CONFIG_FILE {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        let cfg: Config = serde_json::from_str(&data)
            .map_err(|e| Error::malformed(e.to_string()))
            .with_context(|| format!("invalid config: {path}"))?;

        info!("Loaded configuration from {path}");
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        let r = &self.retrieval;
        anyhow::ensure!(!self.data_dir.trim().is_empty(), "data_dir must not be empty");
        anyhow::ensure!(r.top_k > 0, "retrieval.top_k must be positive");
        anyhow::ensure!(
            r.candidate_pool >= r.top_k,
            "retrieval.candidate_pool must be at least top_k"
        );
        anyhow::ensure!(r.max_variants > 0, "retrieval.max_variants must be positive");
        anyhow::ensure!(
            (0.0..=1.0).contains(&r.linear_alpha),
            "retrieval.linear_alpha must be within [0, 1]"
        );
        anyhow::ensure!(r.rrf_k > 0.0, "retrieval.rrf_k must be positive");
        anyhow::ensure!(
            r.graph_decay > 0.0 && r.graph_decay <= 1.0,
            "retrieval.graph_decay must be within (0, 1]"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&r.rerank_beta),
            "retrieval.rerank_beta must be within [0, 1]"
        );

        let f = &self.feedback;
        anyhow::ensure!(f.half_life_days > 0.0, "feedback.half_life_days must be positive");
        anyhow::ensure!(f.max_boost >= 0.0, "feedback.max_boost must not be negative");
        anyhow::ensure!(f.retention_days > 0, "feedback.retention_days must be positive");

        let i = &self.indexing;
        anyhow::ensure!(i.max_file_bytes > 0, "indexing.max_file_bytes must be positive");
        anyhow::ensure!(i.window_lines > 0, "indexing.window_lines must be positive");
        anyhow::ensure!(
            i.window_overlap < i.window_lines,
            "indexing.window_overlap must be smaller than window_lines"
        );
        anyhow::ensure!(i.embed_batch_size > 0, "indexing.embed_batch_size must be positive");
        for pattern in &i.exclude {
            globset::Glob::new(pattern)
                .with_context(|| format!("invalid exclude pattern: {pattern}"))?;
        }
        Ok(())
    }

    /// `data_dir` with a leading `~/` resolved against the home directory.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => dirs::home_dir().map_or_else(|| PathBuf::from(&self.data_dir), |home| home.join(rest)),
            None => PathBuf::from(&self.data_dir),
        }
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.capabilities.retry_policy()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
