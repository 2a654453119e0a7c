//! Key-value tier with per-key expiry backing the roster cache.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use bb8_redis::redis;
use tokio::time::Instant;
use tracing::Instrument;

use crate::db::redis::RedisPool;
use crate::error::StorageError;
use crate::utils::timeout::bounded;

const SCAN_BATCH: usize = 200;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
    /// Keys currently stored under `prefix`, in no particular order.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

pub struct RedisCacheStore {
    pool: RedisPool,
    timeout: Duration,
}

impl RedisCacheStore {
    pub fn new(pool: RedisPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

fn cache_err(err: impl std::fmt::Display) -> StorageError {
    StorageError::Cache(err.to_string())
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        bounded("redis_get", self.timeout, async {
            let mut conn = self.pool.get().await.map_err(cache_err)?;
            let value: Option<String> = redis::cmd("GET")
                .arg(key)
                .query_async::<_, Option<String>>(&mut *conn)
                .await
                .map_err(cache_err)?;
            Ok::<_, StorageError>(value)
        })
        .instrument(tracing::debug_span!("redis_get", key))
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError> {
        let ttl_seconds = ttl.as_secs().max(1);
        bounded("redis_set", self.timeout, async {
            let mut conn = self.pool.get().await.map_err(cache_err)?;
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(ttl_seconds)
                .query_async::<_, ()>(&mut *conn)
                .await
                .map_err(cache_err)?;
            Ok::<_, StorageError>(())
        })
        .instrument(tracing::debug_span!("redis_set", key, ttl_seconds))
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        bounded("redis_del", self.timeout, async {
            let mut conn = self.pool.get().await.map_err(cache_err)?;
            redis::cmd("DEL")
                .arg(key)
                .query_async::<_, ()>(&mut *conn)
                .await
                .map_err(cache_err)?;
            Ok::<_, StorageError>(())
        })
        .instrument(tracing::debug_span!("redis_del", key))
        .await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let pattern = format!("{}*", prefix);
        bounded("redis_scan", self.timeout, async {
            let mut conn = self.pool.get().await.map_err(cache_err)?;
            let mut cursor: u64 = 0;
            let mut keys = Vec::new();
            loop {
                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query_async::<_, (u64, Vec<String>)>(&mut *conn)
                    .await
                    .map_err(cache_err)?;
                keys.extend(batch);
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            // SCAN may return a key more than once.
            keys.sort();
            keys.dedup();
            Ok::<_, StorageError>(keys)
        })
        .instrument(tracing::debug_span!("redis_scan", prefix))
        .await
    }
}

/// Process-local cache used when no Redis URL is configured.
#[derive(Default, Clone)]
pub struct InMemoryCacheStore {
    entries: Arc<Mutex<HashMap<String, (String, Instant)>>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut HashMap<String, (String, Instant)>) -> R) -> R {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        f(&mut entries)
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.with_entries(|entries| entries.get(key).map(|(value, _)| value.clone())))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError> {
        let expires_at = Instant::now() + ttl;
        self.with_entries(|entries| {
            entries.insert(key.to_string(), (value.to_string(), expires_at));
        });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.with_entries(|entries| {
            entries.remove(key);
        });
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self.with_entries(|entries| {
            let mut keys: Vec<String> = entries
                .keys()
                .filter(|key| key.starts_with(prefix))
                .cloned()
                .collect();
            keys.sort();
            keys
        }))
    }
}
