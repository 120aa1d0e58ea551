//! Error types for the JuriSearch retrieval core
//!
//! Provides:
//! - Distinct error types for each failure mode of the search pipeline
//! - Machine-readable error codes
//! - Hard vs. degraded classification (only hard errors reach callers)

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using RetrievalError
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidFormat,
    UnknownShard,

    // External provider errors (8xxx)
    ProviderUnavailable,
    EmbeddingError,
    EmbeddingTimeout,
    RerankerUnavailable,
    CacheError,

    // Index errors (4xxx)
    IndexBuildFailure,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidFormat => 1002,
            ErrorCode::UnknownShard => 1003,

            // Index (4xxx)
            ErrorCode::IndexBuildFailure => 4001,

            // External (8xxx)
            ErrorCode::ProviderUnavailable => 8001,
            ErrorCode::EmbeddingError => 8002,
            ErrorCode::EmbeddingTimeout => 8003,
            ErrorCode::RerankerUnavailable => 8004,
            ErrorCode::CacheError => 8005,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Retrieval core error types
#[derive(Error, Debug)]
pub enum RetrievalError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    #[error("Unknown shard: {shard}")]
    UnknownShard { shard: String },

    // External provider errors
    #[error("Provider '{provider}' unavailable: {message}")]
    ProviderUnavailable { provider: String, message: String },

    #[error("Embedding service error: {message}")]
    EmbeddingFailure { message: String },

    #[error("Embedding timeout after {timeout_ms}ms")]
    EmbeddingTimeout { timeout_ms: u64 },

    #[error("Reranker unavailable: {message}")]
    RerankerUnavailable { message: String },

    #[error("Cache error: {message}")]
    CacheFailure { message: String },

    // Index errors
    #[error("Index build failed for shard '{shard}': {message}")]
    IndexBuildFailure { shard: String, message: String },

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl RetrievalError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            RetrievalError::Validation { .. } => ErrorCode::ValidationError,
            RetrievalError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            RetrievalError::UnknownShard { .. } => ErrorCode::UnknownShard,
            RetrievalError::ProviderUnavailable { .. } => ErrorCode::ProviderUnavailable,
            RetrievalError::EmbeddingFailure { .. } => ErrorCode::EmbeddingError,
            RetrievalError::EmbeddingTimeout { .. } => ErrorCode::EmbeddingTimeout,
            RetrievalError::RerankerUnavailable { .. } => ErrorCode::RerankerUnavailable,
            RetrievalError::CacheFailure { .. } => ErrorCode::CacheError,
            RetrievalError::IndexBuildFailure { .. } => ErrorCode::IndexBuildFailure,
            RetrievalError::Internal { .. } => ErrorCode::InternalError,
            RetrievalError::Configuration { .. } => ErrorCode::ConfigurationError,
            RetrievalError::Serialization(_) => ErrorCode::SerializationError,
            RetrievalError::HttpClient(_) => ErrorCode::ProviderUnavailable,
            RetrievalError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Check if this error must be returned to the caller as a hard failure.
    ///
    /// Only malformed requests and broken configuration are hard; every
    /// runtime/provider failure degrades the result instead.
    pub fn is_hard(&self) -> bool {
        matches!(
            self,
            RetrievalError::Validation { .. }
                | RetrievalError::InvalidFormat { .. }
                | RetrievalError::UnknownShard { .. }
                | RetrievalError::Configuration { .. }
        )
    }

    /// Check if this error is absorbed by the pipeline (logged, result degraded)
    pub fn is_degraded(&self) -> bool {
        !self.is_hard()
    }
}

impl From<std::io::Error> for RetrievalError {
    fn from(err: std::io::Error) -> Self {
        RetrievalError::CacheFailure {
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for RetrievalError {
    fn from(err: redis::RedisError) -> Self {
        RetrievalError::CacheFailure {
            message: err.to_string(),
        }
    }
}
