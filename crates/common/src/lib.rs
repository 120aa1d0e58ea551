//! JuriSearch Common Library
//!
//! Shared code for the JuriSearch retrieval stack including:
//! - Corpus document model and providers
//! - Embedding client abstraction
//! - Error types and handling
//! - Configuration management
//! - Index cache stores
//! - Metrics and observability

pub mod cache;
pub mod config;
pub mod corpus;
pub mod embeddings;
pub mod errors;
pub mod metrics;

// Re-export commonly used types
pub use cache::IndexCacheStore;
pub use config::SearchConfig;
pub use corpus::{Document, DocumentProvider, MetaValue};
pub use embeddings::Embedder;
pub use errors::{Result, RetrievalError};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;
