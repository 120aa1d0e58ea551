//! Index cache stores
//!
//! Persistence for serialized lexical-index blobs, keyed by
//! `(shard, fingerprint)`:
//! - In-memory store (process-local, default)
//! - Disk store (blob files, survives restarts)
//! - Redis store (shared across processes)

use crate::config::CacheConfig;
use crate::errors::{Result, RetrievalError};
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Key-value persistence for serialized index blobs
///
/// A `get` miss and a `get` failure are distinct: failures surface as
/// errors so the caller can log them, but both end in a rebuild.
#[async_trait]
pub trait IndexCacheStore: Send + Sync {
    /// Fetch the blob cached for a shard at a given fingerprint
    async fn get(&self, shard: &str, fingerprint: &str) -> Result<Option<Vec<u8>>>;

    /// Store the blob for a shard at a given fingerprint
    async fn put(&self, shard: &str, fingerprint: &str, blob: &[u8]) -> Result<()>;

    /// Drop every cached blob of a shard
    async fn invalidate(&self, shard: &str) -> Result<()>;
}

/// Cache key builder helpers
pub mod keys {
    /// Replace path- and key-hostile characters in a shard name
    pub fn sanitize(segment: &str) -> String {
        segment
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    /// Build an index blob key
    pub fn index_blob(shard: &str, fingerprint: &str) -> String {
        format!("index:{}:{}", sanitize(shard), fingerprint)
    }

    /// Build the key pattern matching every blob of a shard
    pub fn shard_pattern(shard: &str) -> String {
        format!("index:{}:*", sanitize(shard))
    }

    /// Build the blob file name for the disk store
    pub fn blob_file(fingerprint: &str) -> String {
        format!("{}.bin", sanitize(fingerprint))
    }
}

/// Process-local cache store
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IndexCacheStore for MemoryCacheStore {
    async fn get(&self, shard: &str, fingerprint: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(shard)
            .and_then(|blobs| blobs.get(fingerprint))
            .cloned())
    }

    async fn put(&self, shard: &str, fingerprint: &str, blob: &[u8]) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries
            .entry(shard.to_string())
            .or_default()
            .insert(fingerprint.to_string(), blob.to_vec());
        Ok(())
    }

    async fn invalidate(&self, shard: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(shard);
        Ok(())
    }
}

/// Disk-backed cache store
///
/// Blob layout: `<root>/<shard>/<fingerprint>.bin`. Writes go through a
/// temporary file and a rename so a crash never leaves a truncated blob.
pub struct DiskCacheStore {
    root: PathBuf,
}

impl DiskCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn shard_dir(&self, shard: &str) -> PathBuf {
        self.root.join(keys::sanitize(shard))
    }

    fn blob_path(&self, shard: &str, fingerprint: &str) -> PathBuf {
        self.shard_dir(shard).join(keys::blob_file(fingerprint))
    }
}

#[async_trait]
impl IndexCacheStore for DiskCacheStore {
    async fn get(&self, shard: &str, fingerprint: &str) -> Result<Option<Vec<u8>>> {
        let path = self.blob_path(shard, fingerprint);
        match tokio::fs::read(&path).await {
            Ok(blob) => {
                debug!(shard = shard, path = %path.display(), "Index cache hit");
                Ok(Some(blob))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(shard = shard, path = %path.display(), "Index cache miss");
                Ok(None)
            }
            Err(e) => Err(RetrievalError::CacheFailure {
                message: format!("Failed to read '{}': {}", path.display(), e),
            }),
        }
    }

    async fn put(&self, shard: &str, fingerprint: &str, blob: &[u8]) -> Result<()> {
        let dir = self.shard_dir(shard);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| RetrievalError::CacheFailure {
                message: format!("Failed to create '{}': {}", dir.display(), e),
            })?;

        let path = self.blob_path(shard, fingerprint);
        let tmp = dir.join(format!("{}.tmp", keys::blob_file(fingerprint)));
        tokio::fs::write(&tmp, blob)
            .await
            .map_err(|e| RetrievalError::CacheFailure {
                message: format!("Failed to write '{}': {}", tmp.display(), e),
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| RetrievalError::CacheFailure {
                message: format!("Failed to commit '{}': {}", path.display(), e),
            })?;

        debug!(shard = shard, bytes = blob.len(), path = %path.display(), "Index blob stored");
        Ok(())
    }

    async fn invalidate(&self, shard: &str) -> Result<()> {
        let dir = self.shard_dir(shard);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RetrievalError::CacheFailure {
                message: format!("Failed to remove '{}': {}", dir.display(), e),
            }),
        }
    }
}

/// Redis-backed cache store, shared across processes
pub struct RedisCacheStore {
    connection: RwLock<MultiplexedConnection>,
    ttl_secs: u64,
}

impl RedisCacheStore {
    /// Connect to Redis
    pub async fn new(url: &str, ttl_secs: u64) -> Result<Self> {
        let client = Client::open(url).map_err(|e| RetrievalError::CacheFailure {
            message: format!("Failed to create Redis client: {}", e),
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| RetrievalError::CacheFailure {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        Ok(Self {
            connection: RwLock::new(connection),
            ttl_secs,
        })
    }
}

#[async_trait]
impl IndexCacheStore for RedisCacheStore {
    async fn get(&self, shard: &str, fingerprint: &str) -> Result<Option<Vec<u8>>> {
        let key = keys::index_blob(shard, fingerprint);
        let mut conn = self.connection.write().await;

        let blob: Option<Vec<u8>> =
            conn.get(&key)
                .await
                .map_err(|e| RetrievalError::CacheFailure {
                    message: format!("Failed to get key '{}': {}", key, e),
                })?;

        match &blob {
            Some(_) => debug!(key = %key, "Index cache hit"),
            None => debug!(key = %key, "Index cache miss"),
        }
        Ok(blob)
    }

    async fn put(&self, shard: &str, fingerprint: &str, blob: &[u8]) -> Result<()> {
        let key = keys::index_blob(shard, fingerprint);
        let mut conn = self.connection.write().await;

        let _: () = if self.ttl_secs > 0 {
            conn.set_ex(&key, blob, self.ttl_secs).await
        } else {
            conn.set(&key, blob).await
        }
        .map_err(|e| RetrievalError::CacheFailure {
            message: format!("Failed to set key '{}': {}", key, e),
        })?;

        debug!(key = %key, bytes = blob.len(), "Index blob stored");
        Ok(())
    }

    async fn invalidate(&self, shard: &str) -> Result<()> {
        let pattern = keys::shard_pattern(shard);
        let mut conn = self.connection.write().await;

        let matched: Vec<String> = redis::cmd("KEYS")
            .arg(&pattern)
            .query_async(&mut *conn)
            .await
            .map_err(|e| RetrievalError::CacheFailure {
                message: format!("Failed to list keys '{}': {}", pattern, e),
            })?;

        if !matched.is_empty() {
            let deleted: i32 =
                conn.del(&matched)
                    .await
                    .map_err(|e| RetrievalError::CacheFailure {
                        message: format!("Failed to delete keys '{}': {}", pattern, e),
                    })?;
            debug!(pattern = %pattern, deleted, "Index cache invalidated");
        }
        Ok(())
    }
}

/// Create a cache store based on configuration
pub async fn create_cache_store(config: &CacheConfig) -> Result<Arc<dyn IndexCacheStore>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryCacheStore::new())),
        "disk" => Ok(Arc::new(DiskCacheStore::new(&config.dir))),
        "redis" => {
            let url = config
                .redis_url
                .as_deref()
                .ok_or_else(|| RetrievalError::Configuration {
                    message: "cache.redis_url required for the redis backend".to_string(),
                })?;
            Ok(Arc::new(
                RedisCacheStore::new(url, config.redis_ttl_secs).await?,
            ))
        }
        other => {
            tracing::warn!(backend = other, "Unknown cache backend, using memory");
            Ok(Arc::new(MemoryCacheStore::new()))
        }
    }
}
