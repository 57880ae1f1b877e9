//! In-memory counter store - used as fallback when Redis is unavailable.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::GlobBuilder;
use tokio::sync::RwLock;

use turnstile_core::StoreError;
use turnstile_core::ports::{Clock, CounterStore, KeyTtl, SystemClock};

struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

/// In-memory counter store using a HashMap behind an async RwLock.
///
/// Expiry is evaluated against the injected clock, so tests can move time
/// forward without sleeping.
/// Note: Counters are per-process and lost on restart.
pub struct InMemoryCounterStore {
    store: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
            clock,
        }
    }

    fn is_expired(entry: &Entry, now: DateTime<Utc>) -> bool {
        entry.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }

    fn deadline(&self, ttl: Duration) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        self.clock
            .now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let now = self.clock.now();
        let mut store = self.store.write().await;

        if store.get(key).is_some_and(|e| Self::is_expired(e, now)) {
            store.remove(key);
        }

        let entry = store.entry(key.to_string()).or_insert_with(|| Entry {
            value: "0".to_string(),
            expires_at: None,
        });
        let current: i64 = entry
            .value
            .parse()
            .map_err(|_| StoreError::Operation(format!("{key} is not an integer")))?;
        let next = current
            .checked_add(delta)
            .ok_or_else(|| StoreError::Operation(format!("{key} would overflow")))?;
        entry.value = next.to_string();

        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let deadline = self.deadline(ttl);
        let mut store = self.store.write().await;

        match store.get_mut(key) {
            Some(entry) if !Self::is_expired(entry, now) => {
                entry.expires_at = Some(deadline);
                Ok(true)
            }
            Some(_) => {
                store.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now();
        let store = self.store.read().await;
        Ok(store
            .get(key)
            .filter(|e| !Self::is_expired(e, now))
            .map(|e| e.value.clone()))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = Some(self.deadline(ttl));
        let mut store = self.store.write().await;
        store.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let mut store = self.store.write().await;
        let removed = keys
            .iter()
            .filter_map(|k| store.remove(k))
            .filter(|e| !Self::is_expired(e, now))
            .count();
        Ok(removed as u64)
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        // Redis KEYS semantics: `*` crosses every character, `\` escapes.
        let matcher = GlobBuilder::new(pattern)
            .literal_separator(false)
            .backslash_escape(true)
            .build()
            .map_err(|e| StoreError::Operation(format!("invalid key pattern {pattern}: {e}")))?
            .compile_matcher();

        let now = self.clock.now();
        let mut store = self.store.write().await;
        store.retain(|_, e| !Self::is_expired(e, now));

        let mut keys: Vec<String> = store
            .keys()
            .filter(|k| matcher.is_match(k.as_str()))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, StoreError> {
        let now = self.clock.now();
        let store = self.store.read().await;
        Ok(match store.get(key) {
            None => KeyTtl::Missing,
            Some(e) if Self::is_expired(e, now) => KeyTtl::Missing,
            Some(Entry {
                expires_at: None, ..
            }) => KeyTtl::Persistent,
            Some(Entry {
                expires_at: Some(exp),
                ..
            }) => KeyTtl::Expires((*exp - now).to_std().unwrap_or_default()),
        })
    }
}
