//! Redis counter store with connection management and per-operation timeouts.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};

use turnstile_core::StoreError;
use turnstile_core::ports::{CounterStore, KeyTtl};

/// Redis connection configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Upper bound on a single command round-trip
    pub op_timeout: Duration,
    /// Whether to fallback to the in-memory store if Redis is unavailable
    pub fallback_to_memory: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_timeout: Duration::from_secs(5),
            op_timeout: Duration::from_millis(100),
            fallback_to_memory: true,
        }
    }
}

impl RedisConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            connect_timeout: Duration::from_secs(
                std::env::var("REDIS_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            op_timeout: Duration::from_millis(
                std::env::var("REDIS_OP_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(100),
            ),
            fallback_to_memory: std::env::var("REDIS_FALLBACK_TO_MEMORY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        }
    }
}

/// Redis-backed counter store.
///
/// Uses connection manager for automatic reconnection. Every command is
/// bounded by `op_timeout`; a slow store surfaces as `StoreError::Timeout`.
pub struct RedisCounterStore {
    conn: ConnectionManager,
    config: RedisConfig,
    /// Lua script for atomic increment with expiry on first write
    incr_script: Script,
    /// Same as `incr_script` over every key of one call
    incr_all_script: Script,
}

impl RedisCounterStore {
    pub async fn new(config: RedisConfig) -> Result<Self, StoreError> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        // Use timeout to prevent hanging if Redis is unreachable
        let conn_manager_fut = ConnectionManager::new(client);
        let conn = tokio::time::timeout(config.connect_timeout, conn_manager_fut)
            .await
            .map_err(|_| StoreError::Connection("Connection timed out".to_string()))?
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let incr_script = Script::new(
            r#"
            local delta = tonumber(ARGV[1])
            local current = redis.call('INCRBY', KEYS[1], delta)
            if current == delta then
                redis.call('EXPIRE', KEYS[1], tonumber(ARGV[2]))
            end
            return current
            "#,
        );

        // ARGV[1] is the TTL, ARGV[i + 1] the delta for KEYS[i].
        let incr_all_script = Script::new(
            r#"
            local ttl = tonumber(ARGV[1])
            local values = {}
            for i, key in ipairs(KEYS) do
                local delta = tonumber(ARGV[i + 1])
                local current = redis.call('INCRBY', key, delta)
                if current == delta then
                    redis.call('EXPIRE', key, ttl)
                end
                values[i] = current
            end
            return values
            "#,
        );

        tracing::info!(url = %config.url, "Connected to Redis counter store");

        Ok(Self {
            conn,
            config,
            incr_script,
            incr_all_script,
        })
    }

    /// Create from environment configuration.
    pub async fn from_env() -> Result<Self, StoreError> {
        Self::new(RedisConfig::from_env()).await
    }

    async fn run<T, F>(&self, op: &'static str, key: &str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, RedisError>>,
    {
        match tokio::time::timeout(self.config.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::warn!(op, key = %key, error = %e, "Redis command failed");
                if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
                    Err(StoreError::Connection(e.to_string()))
                } else {
                    Err(StoreError::Operation(e.to_string()))
                }
            }
            Err(_) => {
                let ms = self.config.op_timeout.as_millis() as u64;
                tracing::warn!(op, key = %key, timeout_ms = ms, "Redis command timed out");
                Err(StoreError::Timeout(ms))
            }
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        self.run("INCRBY", key, async move { conn.incr(key, delta).await })
            .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let secs = ttl.as_secs().max(1) as i64;
        self.run("EXPIRE", key, async move { conn.expire(key, secs).await })
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        self.run("GET", key, async move { conn.get(key).await }).await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let secs = ttl.as_secs().max(1);
        self.run("SETEX", key, async move {
            conn.set_ex::<_, _, ()>(key, value, secs).await
        })
        .await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let label = keys.first().map(String::as_str).unwrap_or_default();
        self.run("DEL", label, async move { conn.del(keys).await })
            .await
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        self.run("KEYS", pattern, async move { conn.keys(pattern).await })
            .await
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, StoreError> {
        let mut conn = self.conn.clone();
        let secs: i64 = self
            .run("TTL", key, async move { conn.ttl(key).await })
            .await?;
        Ok(match secs {
            -2 => KeyTtl::Missing,
            -1 => KeyTtl::Persistent,
            s => KeyTtl::Expires(Duration::from_secs(s.max(0) as u64)),
        })
    }

    async fn incr_with_expiry(
        &self,
        key: &str,
        delta: i64,
        ttl: Duration,
    ) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let secs = ttl.as_secs().max(1);
        let mut invocation = self.incr_script.key(key);
        invocation.arg(delta).arg(secs);
        self.run("INCRBY+EXPIRE", key, async move {
            invocation.invoke_async(&mut conn).await
        })
        .await
    }

    async fn incr_all_with_expiry(
        &self,
        increments: &[(String, i64)],
        ttl: Duration,
    ) -> Result<Vec<i64>, StoreError> {
        let Some((label, _)) = increments.first() else {
            return Ok(Vec::new());
        };
        let mut conn = self.conn.clone();
        let mut invocation = self.incr_all_script.prepare_invoke();
        invocation.arg(ttl.as_secs().max(1));
        for (key, delta) in increments {
            invocation.key(key.as_str()).arg(*delta);
        }
        self.run("INCRBY+EXPIRE*", label, async move {
            invocation.invoke_async(&mut conn).await
        })
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        self.run("PING", "", async move {
            let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn get_test_store() -> Option<RedisCounterStore> {
        let config = RedisConfig {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6389".to_string()),
            connect_timeout: Duration::from_secs(1),
            op_timeout: Duration::from_millis(500),
            fallback_to_memory: false,
        };

        RedisCounterStore::new(config).await.ok()
    }

    #[tokio::test]
    async fn test_redis_incr_with_expiry() {
        let store = match get_test_store().await {
            Some(s) => s,
            None => {
                tracing::warn!("Redis not available, skipping test");
                return;
            }
        };

        let key = "test_turnstile:incr";
        store.delete(&[key.to_string()]).await.unwrap();

        assert_eq!(
            store
                .incr_with_expiry(key, 1, Duration::from_secs(1))
                .await
                .unwrap(),
            1
        );
        assert_eq!(store.incr(key, 2).await.unwrap(), 3);
        assert!(matches!(store.ttl(key).await.unwrap(), KeyTtl::Expires(_)));

        // Wait for expiration
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(store.get(key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_redis_keys_and_delete() {
        let store = match get_test_store().await {
            Some(s) => s,
            None => return,
        };

        let keys = vec![
            "test_turnstile:scan:a".to_string(),
            "test_turnstile:scan:b".to_string(),
        ];
        for key in &keys {
            store.incr(key, 1).await.unwrap();
        }
        assert_eq!(store.ttl(&keys[0]).await.unwrap(), KeyTtl::Persistent);

        let mut found = store.keys_matching("test_turnstile:scan:*").await.unwrap();
        found.sort();
        assert_eq!(found, keys);

        assert_eq!(store.delete(&keys).await.unwrap(), 2);
        assert_eq!(store.ttl(&keys[0]).await.unwrap(), KeyTtl::Missing);
    }
    #[tokio::test]
    async fn test_redis_incr_all_with_expiry() {
        let store = match get_test_store().await {
            Some(s) => s,
            None => return,
        };

        let increments = vec![
            ("test_turnstile:all:requests".to_string(), 1),
            ("test_turnstile:all:tokens".to_string(), 250),
        ];
        let keys: Vec<String> = increments.iter().map(|(k, _)| k.clone()).collect();
        store.delete(&keys).await.unwrap();

        let values = store
            .incr_all_with_expiry(&increments, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(values, vec![1, 250]);
        assert!(matches!(store.ttl(&keys[1]).await.unwrap(), KeyTtl::Expires(_)));
        assert!(store.ping().await.is_ok());

        store.delete(&keys).await.unwrap();
    }
}
