use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use crate::models::{CacheEntry, Tier};

/// Errors that can occur with cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Memo of prior match results keyed by fingerprint.
///
/// Writes are idempotent upserts, so concurrent writers for the same key
/// may race; last write wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    async fn put(&self, key: &str, entry: &CacheEntry) -> Result<(), CacheError>;

    /// Approximate number of locally held entries
    fn entry_count(&self) -> u64;
}

/// In-process store, used in tests and when Redis is not configured
#[derive(Clone)]
pub struct MemoryCacheStore {
    entries: moka::future::Cache<String, CacheEntry>,
}

impl MemoryCacheStore {
    pub fn new(max_entries: u64, ttl_secs: u64) -> Self {
        let entries = moka::future::CacheBuilder::new(max_entries)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();
        Self { entries }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let entry = self.entries.get(key).await;
        tracing::trace!("Memory cache {}: {}", if entry.is_some() { "hit" } else { "miss" }, key);
        Ok(entry)
    }

    async fn put(&self, key: &str, entry: &CacheEntry) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), entry.clone()).await;
        Ok(())
    }

    fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }
}

/// Two-tier store
///
/// Implements L1 (in-memory) and L2 (Redis) caching strategy.
/// L1 is fastest but limited in size, L2 is shared across instances.
pub struct TieredCacheStore {
    // Store ConnectionManager in a Mutex for interior mutability
    redis: Arc<tokio::sync::Mutex<ConnectionManager>>,
    l1_cache: moka::future::Cache<String, Vec<u8>>,
    ttl_secs: u64,
}

impl TieredCacheStore {
    /// Connect to Redis and build the L1 cache
    pub async fn connect(redis_url: &str, l1_size: u64, ttl_secs: u64) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        let redis = redis::aio::ConnectionManager::new(client).await?;

        let l1_cache = moka::future::CacheBuilder::new(l1_size)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Ok(Self {
            redis: Arc::new(tokio::sync::Mutex::new(redis)),
            l1_cache,
            ttl_secs,
        })
    }
}

#[async_trait]
impl CacheStore for TieredCacheStore {
    /// Get an entry (L1 first, then L2)
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        if let Some(bytes) = self.l1_cache.get(key).await {
            tracing::trace!("L1 cache hit: {}", key);
            return Ok(Some(serde_json::from_slice(&bytes)?));
        }

        let mut conn = self.redis.lock().await;
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut *conn)
            .await?;
        drop(conn);

        let Some(json) = value else {
            tracing::trace!("Cache miss: {}", key);
            return Ok(None);
        };

        tracing::trace!("L2 cache hit: {}", key);
        let entry = serde_json::from_str(&json)?;
        self.l1_cache.insert(key.to_string(), json.into_bytes()).await;
        Ok(Some(entry))
    }

    /// Set an entry in both tiers
    async fn put(&self, key: &str, entry: &CacheEntry) -> Result<(), CacheError> {
        let json = serde_json::to_string(entry)?;

        self.l1_cache.insert(key.to_string(), json.as_bytes().to_vec()).await;

        let ttl = entry.ttl_secs.min(self.ttl_secs).max(1);
        let mut conn = self.redis.lock().await;
        let _: () = redis::cmd("SETEX")
            .arg(key)
            .arg(ttl)
            .arg(json)
            .query_async(&mut *conn)
            .await?;
        drop(conn);

        tracing::trace!("Cache set: {}", key);
        Ok(())
    }

    fn entry_count(&self) -> u64 {
        self.l1_cache.entry_count()
    }
}

/// Cache key builder
pub struct CacheKey;

impl CacheKey {
    /// Build a cache key for a match result
    pub fn matches(tier: Tier, fingerprint: &str) -> String {
        format!("match:{}:{}", tier, fingerprint)
    }
}
