//! Tenant-scoped response cache.
//!
//! Keys are namespaced `cache:<tenant>:<sha256-hex>` where the hash covers
//! the canonical (recursively key-sorted) JSON of the request `input`, so a
//! reordered-but-equal payload hits the same entry and no entry is ever
//! shared across tenants.
//!
//! The pipeline must never fail solely because the cache is unavailable:
//! transport errors are logged and treated as misses, writes are
//! best-effort.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Fixed TTL for cached responses.
pub const CACHE_TTL: Duration = Duration::from_secs(300);

const MEMORY_MAX_ENTRIES: usize = 10_000;

#[derive(Clone)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: SystemTime,
}

/// Response cache over Redis, with an in-process fallback for local runs and
/// tests.
#[derive(Clone)]
pub struct ResponseCache {
    backend: CacheBackend,
    ttl: Duration,
}

#[derive(Clone)]
enum CacheBackend {
    Memory(Arc<DashMap<String, CacheEntry>>),
    Redis(redis::Client),
}

impl ResponseCache {
    /// In-process cache with the standard 5-minute TTL.
    pub fn new_memory() -> Self {
        Self {
            backend: CacheBackend::Memory(Arc::new(DashMap::new())),
            ttl: CACHE_TTL,
        }
    }

    /// Redis-backed cache. Verifies the connection with a PING.
    pub async fn new_redis(redis_url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;

        Ok(Self {
            backend: CacheBackend::Redis(client),
            ttl: CACHE_TTL,
        })
    }

    #[cfg(test)]
    fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Cache key for `(tenant, input)`.
    pub fn key(tenant: &str, input: &serde_json::Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(canonical_json(input).as_bytes());
        format!("cache:{tenant}:{:x}", hasher.finalize())
    }

    /// Fetch a cached response. Misses and transport errors both come back
    /// as `None`; errors are logged.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        match &self.backend {
            CacheBackend::Memory(store) => {
                if let Some(entry) = store.get(key) {
                    if entry.expires_at > SystemTime::now() {
                        debug!(key, "cache hit (memory)");
                        return Some(entry.value.clone());
                    }
                    drop(entry);
                    store.remove(key);
                }
                debug!(key, "cache miss (memory)");
                None
            }
            CacheBackend::Redis(client) => match self.get_redis(client, key).await {
                Ok(Some(value)) => {
                    debug!(key, "cache hit (redis)");
                    Some(value)
                }
                Ok(None) => {
                    debug!(key, "cache miss (redis)");
                    None
                }
                Err(e) => {
                    warn!(key, error = %e, "cache get failed, treating as miss");
                    None
                }
            },
        }
    }

    /// Store a response. Failures are logged, never propagated.
    pub async fn set(&self, key: &str, value: &[u8]) {
        match &self.backend {
            CacheBackend::Memory(store) => {
                if store.len() >= MEMORY_MAX_ENTRIES {
                    if let Some(evict) = store.iter().next().map(|e| e.key().clone()) {
                        store.remove(&evict);
                    }
                }
                store.insert(
                    key.to_string(),
                    CacheEntry {
                        value: value.to_vec(),
                        expires_at: SystemTime::now() + self.ttl,
                    },
                );
            }
            CacheBackend::Redis(client) => {
                if let Err(e) = self.set_redis(client, key, value).await {
                    warn!(key, error = %e, "cache set failed");
                }
            }
        }
    }

    async fn get_redis(
        &self,
        client: &redis::Client,
        key: &str,
    ) -> Result<Option<Vec<u8>>, redis::RedisError> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        redis::cmd("GET").arg(key).query_async(&mut conn).await
    }

    async fn set_redis(
        &self,
        client: &redis::Client,
        key: &str,
        value: &[u8],
    ) -> Result<(), redis::RedisError> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        redis::cmd("SETEX")
            .arg(key)
            .arg(self.ttl.as_secs())
            .arg(value)
            .query_async(&mut conn)
            .await
    }
}

/// Canonical JSON: objects serialized with keys in sorted order at every
/// depth, everything else as serde_json emits it. Key stability must not
/// depend on how the caller's map type orders iteration.
pub fn canonical_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}
