use serde::Deserialize;

use crate::error::{Error, Result};

/// Top-level engine configuration.
///
/// Deserialized from TOML by the embedding application; every field has
/// a default so a partial file (or an empty one) is valid. The value is
/// immutable once handed to the coordinator or the pipeline.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Base URL of the embedding endpoint (OpenAI-compatible).
    #[serde(default)]
    pub base_url: Option<String>,
    /// Model identifier sent with each request.
    #[serde(default)]
    pub model: Option<String>,
    /// Vector dimensionality. Vectors of any other length are rejected.
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Texts per provider call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Retries per batch on transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Exponential backoff base: delay is `base^attempt` seconds.
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    /// Batches allowed in flight at once.
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,
    /// Per-request HTTP timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: None,
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            backoff_base_secs: default_backoff_base_secs(),
            max_concurrent_batches: default_max_concurrent_batches(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_dims() -> usize {
    384
}
fn default_batch_size() -> usize {
    100
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_secs() -> u64 {
    2
}
fn default_max_concurrent_batches() -> usize {
    4
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Weight of the vector channel in score fusion.
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    /// Weight of the lexical channel in score fusion.
    #[serde(default = "default_text_weight")]
    pub text_weight: f64,
    /// Vector results below this similarity are dropped before fusion.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Candidates fetched per channel before fusion.
    #[serde(default = "default_candidate_pool")]
    pub candidate_pool: usize,
    /// Pool expansion factor when reranking: the coordinator requests
    /// `candidate_multiplier × k` candidates for the rerank stage.
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    /// Passages longer than this are word-truncated before scoring.
    #[serde(default = "default_rerank_max_words")]
    pub rerank_max_words: usize,
    /// Deadline for a joined hybrid search, in milliseconds.
    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,
    #[serde(default = "default_use_hybrid")]
    pub use_hybrid: bool,
    #[serde(default)]
    pub use_reranking: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_weight: default_vector_weight(),
            text_weight: default_text_weight(),
            similarity_threshold: default_similarity_threshold(),
            candidate_pool: default_candidate_pool(),
            candidate_multiplier: default_candidate_multiplier(),
            rerank_max_words: default_rerank_max_words(),
            search_timeout_ms: default_search_timeout_ms(),
            use_hybrid: default_use_hybrid(),
            use_reranking: false,
        }
    }
}

fn default_vector_weight() -> f64 {
    0.7
}
fn default_text_weight() -> f64 {
    0.3
}
fn default_similarity_threshold() -> f64 {
    0.05
}
fn default_candidate_pool() -> usize {
    100
}
fn default_candidate_multiplier() -> usize {
    5
}
fn default_rerank_max_words() -> usize {
    256
}
fn default_search_timeout_ms() -> u64 {
    5_000
}
fn default_use_hybrid() -> bool {
    true
}

impl Config {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Config> {
        let config: Config =
            toml::from_str(content).map_err(|e| Error::Config(format!("parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dims == 0 {
            return Err(Error::Config("embedding.dims must be non-zero".into()));
        }
        if self.embedding.batch_size == 0 {
            return Err(Error::Config("embedding.batch_size must be non-zero".into()));
        }
        if self.embedding.max_concurrent_batches == 0 {
            return Err(Error::Config(
                "embedding.max_concurrent_batches must be non-zero".into(),
            ));
        }
        let r = &self.retrieval;
        if r.vector_weight < 0.0 || r.text_weight < 0.0 {
            return Err(Error::Config("fusion weights must be non-negative".into()));
        }
        if r.vector_weight + r.text_weight <= 0.0 {
            return Err(Error::Config("fusion weights must not both be zero".into()));
        }
        if r.candidate_multiplier == 0 {
            return Err(Error::Config(
                "retrieval.candidate_multiplier must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
