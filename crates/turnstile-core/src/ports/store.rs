//! Counter store port.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    Missing,
    /// The key exists but never expires.
    Persistent,
    Expires(Duration),
}

/// Counter store trait - abstraction over a shared TTL-capable key-value store.
///
/// `incr` must be atomic under any number of concurrent callers. Nothing
/// makes `incr` followed by `expire` atomic unless an implementation
/// overrides `incr_with_expiry`.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Add `delta` to the integer at `key` (absent keys count as 0) and
    /// return the new value.
    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    /// Set a TTL on `key`. Returns false if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Delete keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Keys matching a glob pattern (`*` and `?`).
    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    async fn ttl(&self, key: &str) -> Result<KeyTtl, StoreError>;

    /// Increment, then set `ttl` if this call created the key.
    async fn incr_with_expiry(
        &self,
        key: &str,
        delta: i64,
        ttl: Duration,
    ) -> Result<i64, StoreError> {
        let value = self.incr(key, delta).await?;
        if value == delta {
            self.expire(key, ttl).await?;
        }
        Ok(value)
    }

    /// Apply several `incr_with_expiry` calls as one unit: either every
    /// increment lands or none does. The provided version rolls already
    /// applied increments back when a later one fails; stores with
    /// server-side scripting should override it with a single round trip.
    async fn incr_all_with_expiry(
        &self,
        increments: &[(String, i64)],
        ttl: Duration,
    ) -> Result<Vec<i64>, StoreError> {
        let mut values = Vec::with_capacity(increments.len());
        for (key, delta) in increments {
            match self.incr_with_expiry(key, *delta, ttl).await {
                Ok(value) => values.push(value),
                Err(e) => {
                    for (applied, delta) in increments[..values.len()].iter().rev() {
                        if let Err(undo) = self.incr(applied, -delta).await {
                            tracing::error!(key = %applied, error = %undo, "Failed to roll back increment");
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(values)
    }

    /// Cheap round trip used by health checks.
    async fn ping(&self) -> Result<(), StoreError> {
        self.get("health:ping").await.map(|_| ())
    }

    /// Read an integer counter, treating absent keys as 0.
    async fn get_counter(&self, key: &str) -> Result<i64, StoreError> {
        match self.get(key).await? {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| StoreError::Operation(format!("{key} is not an integer: {raw}"))),
            None => Ok(0),
        }
    }
}
