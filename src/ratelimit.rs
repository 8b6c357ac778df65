//! Tenant token-bucket rate limiter.
//!
//! Buckets are keyed `ratelimit:<tenant>` with capacity 100 and a refill of
//! 10 tokens/s. The Redis backend performs the read-modify-write as a single
//! server-side Lua script, so concurrent admissions for one tenant are
//! serialized and the bucket never overdrafts. The in-process backend holds
//! each bucket behind its map entry's lock.
//!
//! Rate limiting fails open: a store error is logged and the request is
//! admitted rather than refused on infrastructure trouble.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Default bucket capacity per tenant.
pub const DEFAULT_CAPACITY: f64 = 100.0;
/// Default refill rate, tokens per second.
pub const DEFAULT_REFILL_RATE: f64 = 10.0;

/// Idle expiry on persisted buckets.
const BUCKET_IDLE_EXPIRY_SECS: u64 = 600;

/// Atomic token-bucket update. KEYS[1] = bucket, ARGV = capacity, refill
/// rate, now (fractional seconds). Returns 1 when a token was taken.
const TOKEN_BUCKET_SCRIPT: &str = r#"
local tokens = tonumber(redis.call('HGET', KEYS[1], 'tokens'))
local last = tonumber(redis.call('HGET', KEYS[1], 'last_update'))
local capacity = tonumber(ARGV[1])
local refill = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
if tokens == nil or last == nil then
  tokens = capacity
  last = now
end
tokens = math.min(capacity, tokens + (now - last) * refill)
local allowed = 0
if tokens >= 1 then
  tokens = tokens - 1
  allowed = 1
end
redis.call('HSET', KEYS[1], 'tokens', tokens, 'last_update', now)
redis.call('EXPIRE', KEYS[1], ARGV[4])
return allowed
"#;

struct Bucket {
    tokens: f64,
    last_update: f64,
}

/// Per-tenant token bucket limiter.
#[derive(Clone)]
pub struct TenantRateLimiter {
    backend: LimiterBackend,
    capacity: f64,
    refill_rate: f64,
}

#[derive(Clone)]
enum LimiterBackend {
    Memory(Arc<DashMap<String, Bucket>>),
    Redis {
        client: redis::Client,
        script: Arc<redis::Script>,
    },
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

impl TenantRateLimiter {
    /// In-process limiter with the standard capacity and refill rate.
    pub fn new_memory() -> Self {
        Self::new_memory_with(DEFAULT_CAPACITY, DEFAULT_REFILL_RATE)
    }

    /// In-process limiter with explicit parameters.
    pub fn new_memory_with(capacity: f64, refill_rate: f64) -> Self {
        Self {
            backend: LimiterBackend::Memory(Arc::new(DashMap::new())),
            capacity,
            refill_rate,
        }
    }

    /// Redis-backed limiter. Verifies the connection with a PING.
    pub async fn new_redis(redis_url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;

        Ok(Self {
            backend: LimiterBackend::Redis {
                client,
                script: Arc::new(redis::Script::new(TOKEN_BUCKET_SCRIPT)),
            },
            capacity: DEFAULT_CAPACITY,
            refill_rate: DEFAULT_REFILL_RATE,
        })
    }

    /// Take one token from `tenant`'s bucket. `true` = admitted.
    pub async fn check(&self, tenant: &str) -> bool {
        let key = format!("ratelimit:{tenant}");
        match &self.backend {
            LimiterBackend::Memory(buckets) => self.check_memory(buckets, &key),
            LimiterBackend::Redis { client, script } => {
                match self.check_redis(client, script, &key).await {
                    Ok(allowed) => allowed,
                    Err(e) => {
                        warn!(tenant, error = %e, "rate limit store error, admitting");
                        true
                    }
                }
            }
        }
    }

    fn check_memory(&self, buckets: &DashMap<String, Bucket>, key: &str) -> bool {
        let now = now_secs();
        let mut bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            last_update: now,
        });

        let elapsed = (now - bucket.last_update).max(0.0);
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.capacity);
        bucket.last_update = now;

        if bucket.tokens < 1.0 {
            debug!(key, "rate limit exceeded");
            return false;
        }
        bucket.tokens -= 1.0;
        true
    }

    async fn check_redis(
        &self,
        client: &redis::Client,
        script: &redis::Script,
        key: &str,
    ) -> Result<bool, redis::RedisError> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        let allowed: i64 = script
            .key(key)
            .arg(self.capacity)
            .arg(self.refill_rate)
            .arg(now_secs())
            .arg(BUCKET_IDLE_EXPIRY_SECS)
            .invoke_async(&mut conn)
            .await?;
        Ok(allowed == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_full_bucket_admits_up_to_capacity() {
        let limiter = TenantRateLimiter::new_memory_with(5.0, 0.0);

        for i in 0..5 {
            assert!(limiter.check("acme").await, "request {i} should pass");
        }
        assert!(!limiter.check("acme").await, "bucket must be drained");
    }

    #[tokio::test]
    async fn test_bucket_refills_over_time() {
        // 2 tokens, 10/s refill: drained bucket recovers within ~100ms.
        let limiter = TenantRateLimiter::new_memory_with(2.0, 10.0);

        assert!(limiter.check("t").await);
        assert!(limiter.check("t").await);
        assert!(!limiter.check("t").await);

        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        assert!(limiter.check("t").await, "refill must restore a token");
    }

    #[tokio::test]
    async fn test_tenants_have_independent_buckets() {
        let limiter = TenantRateLimiter::new_memory_with(1.0, 0.0);

        assert!(limiter.check("alice").await);
        assert!(!limiter.check("alice").await);
        assert!(limiter.check("bob").await, "bob has his own bucket");
    }

    #[tokio::test]
    async fn test_refill_never_exceeds_capacity() {
        let limiter = TenantRateLimiter::new_memory_with(3.0, 1000.0);

        // Drain, wait long enough to "refill" far past capacity.
        for _ in 0..3 {
            limiter.check("t").await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let mut admitted = 0;
        for _ in 0..10 {
            if limiter.check("t").await {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 3, "refill is capped at capacity");
    }

    #[tokio::test]
    async fn test_concurrent_tenants_each_get_a_token() {
        let limiter = TenantRateLimiter::new_memory_with(5.0, 0.0);

        let mut handles = Vec::new();
        for i in 0..20 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(
                async move { limiter.check(&format!("tenant-{i}")).await },
            ));
        }

        for handle in handles {
            assert!(handle.await.expect("task completes"));
        }
    }
}
