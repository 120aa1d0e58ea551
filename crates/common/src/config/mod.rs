//! Configuration management for the JuriSearch retrieval core
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use crate::errors::{Result, RetrievalError};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main retrieval configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    /// Shard catalog configuration
    #[serde(default)]
    pub shards: ShardsConfig,

    /// Lexical index configuration
    #[serde(default)]
    pub lexical: LexicalConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Vector store configuration
    #[serde(default)]
    pub vector: VectorConfig,

    /// Reranking configuration
    #[serde(default)]
    pub rerank: RerankConfig,

    /// Score fusion configuration
    #[serde(default)]
    pub fusion: FusionConfig,

    /// Concurrency configuration
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Index cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShardsConfig {
    /// All known shards, one lexical index and one vector collection each
    #[serde(default = "default_catalog")]
    pub catalog: Vec<String>,

    /// Shards holding general/presentation material
    #[serde(default = "default_general_shards")]
    pub general: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LexicalConfig {
    /// BM25 k1 parameter (term-frequency saturation)
    #[serde(default = "default_k1")]
    pub k1: f32,

    /// BM25 b parameter (document-length normalization)
    #[serde(default = "default_b")]
    pub b: f32,

    /// Tokenizer strategy: french, simple
    #[serde(default = "default_tokenizer")]
    pub tokenizer: String,

    /// Per-shard lexical search timeout in seconds (covers index build)
    #[serde(default = "default_lexical_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for the embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,

    /// Batch size for embedding requests
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorConfig {
    /// Vector store provider: http, memory
    #[serde(default = "default_vector_provider")]
    pub provider: String,

    /// Vector store base URL (required for the http provider)
    pub base_url: Option<String>,

    /// API key sent as the api-key header
    pub api_key: Option<String>,

    /// Per-shard vector query timeout in seconds
    #[serde(default = "default_vector_timeout")]
    pub timeout_secs: u64,

    /// Over-fetch multiplier applied before dedup/rerank
    #[serde(default = "default_over_fetch")]
    pub over_fetch_factor: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RerankConfig {
    /// Rerank provider: http, mock
    #[serde(default = "default_rerank_provider")]
    pub provider: String,

    /// Rerank endpoint base URL (required for the http provider)
    pub base_url: Option<String>,

    /// API key for the rerank service
    pub api_key: Option<String>,

    /// Cross-encoder model name
    #[serde(default = "default_rerank_model")]
    pub model: String,

    /// Maximum candidates passed to the model per search
    #[serde(default = "default_rerank_top_k")]
    pub top_k: usize,

    /// Rerank call timeout in seconds
    #[serde(default = "default_rerank_timeout")]
    pub timeout_secs: u64,

    /// Weights for the post-rerank combined score
    #[serde(default)]
    pub weights: RerankWeightsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RerankWeightsConfig {
    /// Weight of the normalized lexical score
    #[serde(default = "default_rerank_lexical_weight")]
    pub lexical: f32,

    /// Weight of the normalized vector score
    #[serde(default = "default_rerank_vector_weight")]
    pub vector: f32,

    /// Weight of the normalized rerank score
    #[serde(default = "default_rerank_rerank_weight")]
    pub rerank: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FusionConfig {
    /// Score normalization method: min_max, softmax, rank
    #[serde(default = "default_normalize_method")]
    pub normalize_method: String,

    /// Weight of the lexical family in the fused score
    #[serde(default = "default_fusion_weight")]
    pub lexical_weight: f32,

    /// Weight of the vector family in the fused score
    #[serde(default = "default_fusion_weight")]
    pub vector_weight: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Upper bound on concurrent shard/source tasks per process
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Index cache backend: memory, disk, redis
    #[serde(default = "default_cache_backend")]
    pub backend: String,

    /// Root directory for the disk backend
    #[serde(default = "default_cache_dir")]
    pub dir: String,

    /// Redis URL for the redis backend
    pub redis_url: Option<String>,

    /// Blob TTL in seconds for the redis backend (0 = no expiry)
    #[serde(default = "default_redis_ttl")]
    pub redis_ttl_secs: u64,
}

// Default value functions
fn default_catalog() -> Vec<String> {
    vec![
        "general".to_string(),
        "partie_1".to_string(),
        "partie_2".to_string(),
        "partie_3".to_string(),
    ]
}
fn default_general_shards() -> Vec<String> {
    vec!["general".to_string()]
}
fn default_k1() -> f32 { 1.2 }
fn default_b() -> f32 { 0.75 }
fn default_tokenizer() -> String { "french".to_string() }
fn default_lexical_timeout() -> u64 { 10 }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { 768 }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_batch_size() -> usize { 10 }
fn default_vector_provider() -> String { "http".to_string() }
fn default_vector_timeout() -> u64 { 10 }
fn default_over_fetch() -> usize { 2 }
fn default_rerank_provider() -> String { "mock".to_string() }
fn default_rerank_model() -> String { "rerank-multilingual-v3".to_string() }
fn default_rerank_top_k() -> usize { 10 }
fn default_rerank_timeout() -> u64 { 10 }
fn default_rerank_lexical_weight() -> f32 { 0.3 }
fn default_rerank_vector_weight() -> f32 { 0.3 }
fn default_rerank_rerank_weight() -> f32 { 0.4 }
fn default_normalize_method() -> String { "min_max".to_string() }
fn default_fusion_weight() -> f32 { 0.5 }
fn default_max_concurrent() -> usize { 8 }
fn default_cache_backend() -> String { "memory".to_string() }
fn default_cache_dir() -> String { "data/index_cache".to_string() }
fn default_redis_ttl() -> u64 { 86_400 }

impl SearchConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__LEXICAL__K1=0.9
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Cross-field checks that serde defaults cannot express
    pub fn validate(&self) -> Result<()> {
        if self.shards.catalog.is_empty() {
            return Err(RetrievalError::Configuration {
                message: "shards.catalog must list at least one shard".to_string(),
            });
        }
        for shard in &self.shards.general {
            if !self.shards.catalog.contains(shard) {
                return Err(RetrievalError::Configuration {
                    message: format!("general shard '{}' is not in the catalog", shard),
                });
            }
        }
        if self.lexical.k1 < 0.0 || !(0.0..=1.0).contains(&self.lexical.b) {
            return Err(RetrievalError::Configuration {
                message: "lexical.k1 must be >= 0 and lexical.b within [0, 1]".to_string(),
            });
        }
        if self.embedding.dimension == 0 {
            return Err(RetrievalError::Configuration {
                message: "embedding.dimension must be positive".to_string(),
            });
        }
        if self.vector.over_fetch_factor == 0 {
            return Err(RetrievalError::Configuration {
                message: "vector.over_fetch_factor must be at least 1".to_string(),
            });
        }
        if self.runtime.max_concurrent_tasks == 0 {
            return Err(RetrievalError::Configuration {
                message: "runtime.max_concurrent_tasks must be at least 1".to_string(),
            });
        }
        let fusion_sum = self.fusion.lexical_weight + self.fusion.vector_weight;
        if self.fusion.lexical_weight < 0.0 || self.fusion.vector_weight < 0.0 || fusion_sum <= 0.0
        {
            return Err(RetrievalError::Configuration {
                message: "fusion weights must be non-negative with a positive sum".to_string(),
            });
        }
        let w = &self.rerank.weights;
        if w.lexical < 0.0 || w.vector < 0.0 || w.rerank < 0.0 || w.lexical + w.vector + w.rerank <= 0.0
        {
            return Err(RetrievalError::Configuration {
                message: "rerank weights must be non-negative with a positive sum".to_string(),
            });
        }
        Ok(())
    }
}

impl LexicalConfig {
    /// Per-shard lexical timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl EmbeddingConfig {
    /// Embedding request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl VectorConfig {
    /// Per-shard vector query timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RerankConfig {
    /// Rerank call timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            shards: ShardsConfig::default(),
            lexical: LexicalConfig::default(),
            embedding: EmbeddingConfig::default(),
            vector: VectorConfig::default(),
            rerank: RerankConfig::default(),
            fusion: FusionConfig::default(),
            runtime: RuntimeConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for ShardsConfig {
    fn default() -> Self {
        Self {
            catalog: default_catalog(),
            general: default_general_shards(),
        }
    }
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            k1: default_k1(),
            b: default_b(),
            tokenizer: default_tokenizer(),
            timeout_secs: default_lexical_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            provider: default_vector_provider(),
            base_url: None,
            api_key: None,
            timeout_secs: default_vector_timeout(),
            over_fetch_factor: default_over_fetch(),
        }
    }
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            provider: default_rerank_provider(),
            base_url: None,
            api_key: None,
            model: default_rerank_model(),
            top_k: default_rerank_top_k(),
            timeout_secs: default_rerank_timeout(),
            weights: RerankWeightsConfig::default(),
        }
    }
}

impl Default for RerankWeightsConfig {
    fn default() -> Self {
        Self {
            lexical: default_rerank_lexical_weight(),
            vector: default_rerank_vector_weight(),
            rerank: default_rerank_rerank_weight(),
        }
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            normalize_method: default_normalize_method(),
            lexical_weight: default_fusion_weight(),
            vector_weight: default_fusion_weight(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            dir: default_cache_dir(),
            redis_url: None,
            redis_ttl_secs: default_redis_ttl(),
        }
    }
}
