//! TOML configuration.
//!
//! Every tunable of the pipeline lives here: file locations, model ids,
//! augmentation toggles, search widths, diversity policy and retry
//! backoff. All sections are optional; missing keys take the defaults
//! below.
//!
//! ```toml
//! [paths]
//! index = "./data/index.json"
//! cache_dir = "./data/cache"
//!
//! [models]
//! embedding = "text-embedding-3-small"
//! generation = "gpt-4o-mini"
//!
//! [augment]
//! rewrite = true
//! hyde = true
//!
//! [retrieval]
//! per_query_top_k = 8
//! final_top_k = 25
//!
//! [diversity]
//! k = 8
//! lambda = 0.7
//! min_keep = 0.0
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub augment: AugmentConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub diversity: DiversityConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_index_path")]
    pub index: PathBuf,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            index: default_index_path(),
            cache_dir: default_cache_dir(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/index.json")
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from("./data/cache")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelsConfig {
    #[serde(default = "default_embedding_model")]
    pub embedding: String,
    #[serde(default = "default_generation_model")]
    pub generation: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            embedding: default_embedding_model(),
            generation: default_generation_model(),
        }
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}

/// Connection settings for the OpenAI-compatible HTTP API.
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_answer_temperature")]
    pub answer_temperature: f32,
    #[serde(default = "default_augment_temperature")]
    pub augment_temperature: f32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            answer_temperature: default_answer_temperature(),
            augment_temperature: default_augment_temperature(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_answer_temperature() -> f32 {
    0.2
}
fn default_augment_temperature() -> f32 {
    0.3
}

#[derive(Debug, Deserialize, Clone)]
pub struct AugmentConfig {
    /// Ask the generation service for alternative phrasings.
    #[serde(default = "default_true")]
    pub rewrite: bool,
    /// Ask the generation service for a hypothetical answer to embed.
    #[serde(default = "default_true")]
    pub hyde: bool,
    #[serde(default = "default_max_rewrites")]
    pub max_rewrites: usize,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            rewrite: true,
            hyde: true,
            max_rewrites: default_max_rewrites(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_max_rewrites() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_per_query_top_k")]
    pub per_query_top_k: usize,
    #[serde(default = "default_final_top_k")]
    pub final_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            per_query_top_k: default_per_query_top_k(),
            final_top_k: default_final_top_k(),
        }
    }
}

fn default_per_query_top_k() -> usize {
    8
}
fn default_final_top_k() -> usize {
    25
}

/// MMR selection policy. Good values depend on the corpus.
#[derive(Debug, Deserialize, Clone)]
pub struct DiversityConfig {
    /// Maximum number of chunks placed in the context.
    #[serde(default = "default_diversity_k")]
    pub k: usize,
    /// `1.0` = pure relevance, `0.0` = pure novelty.
    #[serde(default = "default_lambda")]
    pub lambda: f32,
    /// A non-first candidate is kept only if its MMR score exceeds this.
    #[serde(default)]
    pub min_keep: f32,
}

impl Default for DiversityConfig {
    fn default() -> Self {
        Self {
            k: default_diversity_k(),
            lambda: default_lambda(),
            min_keep: 0.0,
        }
    }
}

fn default_diversity_k() -> usize {
    8
}
fn default_lambda() -> f32 {
    0.7
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    8000
}
fn default_jitter_ms() -> u64 {
    250
}
fn default_max_retries() -> u32 {
    4
}

impl Config {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.retrieval.per_query_top_k == 0 {
            bail!("retrieval.per_query_top_k must be >= 1");
        }
        if self.retrieval.final_top_k == 0 {
            bail!("retrieval.final_top_k must be >= 1");
        }
        if self.diversity.k == 0 {
            bail!("diversity.k must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.diversity.lambda) {
            bail!("diversity.lambda must be in [0.0, 1.0]");
        }
        if self.augment.max_rewrites > 10 {
            bail!("augment.max_rewrites must be <= 10");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            bail!("retry.base_delay_ms must be <= retry.max_delay_ms");
        }
        if self.models.embedding.trim().is_empty() || self.models.generation.trim().is_empty() {
            bail!("models.embedding and models.generation must not be empty");
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}
