//! Fixed-window counter.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use turnstile_core::StoreError;
use turnstile_core::domain::{RateLimitResult, bucket_index, bucket_reset_at, counter_key};
use turnstile_core::ports::{Clock, CounterStore};

/// Counts hits per identifier in fixed, non-overlapping windows.
///
/// Each bucket is one store key. The first increment in a bucket sets its
/// TTL to the window length, so buckets disappear on their own once the
/// window has passed.
pub struct WindowCounter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    prefix: String,
}

impl WindowCounter {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Key and bucket of `identifier` for the window containing now.
    pub fn current_bucket(&self, identifier: &str, window_secs: u64) -> (String, i64) {
        let window_secs = window_secs.max(1);
        let bucket = bucket_index(self.clock.unix(), window_secs);
        (
            counter_key(&self.prefix, identifier, window_secs, bucket),
            bucket,
        )
    }

    /// Count one hit and decide. A zero limit denies without counting.
    pub async fn check(
        &self,
        identifier: &str,
        limit: u64,
        window_secs: u64,
    ) -> Result<RateLimitResult, StoreError> {
        let window_secs = window_secs.max(1);
        let (key, bucket) = self.current_bucket(identifier, window_secs);

        if limit == 0 {
            return Ok(build_result(key, bucket, window_secs, limit, 0, false));
        }

        // Redis runs this as one script; other stores leave a gap between
        // the increment and the expire that the sweeper covers.
        let current = self
            .store
            .incr_with_expiry(&key, 1, Duration::from_secs(window_secs))
            .await?;
        let current = current.max(0) as u64;

        Ok(build_result(
            key,
            bucket,
            window_secs,
            limit,
            current,
            current <= limit,
        ))
    }

    /// Read the current bucket without counting. `allowed` says whether the
    /// next hit would pass.
    pub async fn peek(
        &self,
        identifier: &str,
        limit: u64,
        window_secs: u64,
    ) -> Result<RateLimitResult, StoreError> {
        let window_secs = window_secs.max(1);
        let (key, bucket) = self.current_bucket(identifier, window_secs);
        let current = self.store.get_counter(&key).await?.max(0) as u64;

        Ok(build_result(
            key,
            bucket,
            window_secs,
            limit,
            current,
            current < limit,
        ))
    }

    /// Undo one counted hit on `key`.
    ///
    /// The key names its own bucket, so the decrement never lands in a later
    /// window. If the bucket already expired the decrement would leave a
    /// negative key behind without a TTL; that residue is removed.
    pub async fn release(&self, key: &str) -> Result<(), StoreError> {
        let value = self.store.incr(key, -1).await?;
        if value < 0 {
            self.store.delete(&[key.to_string()]).await?;
        }
        Ok(())
    }

    /// Result returned when the store could not be reached.
    pub fn fail_open(&self, identifier: &str, limit: u64, window_secs: u64) -> RateLimitResult {
        let window_secs = window_secs.max(1);
        let (key, bucket) = self.current_bucket(identifier, window_secs);
        RateLimitResult {
            degraded: true,
            ..build_result(key, bucket, window_secs, limit, 0, true)
        }
    }
}

fn build_result(
    key: String,
    bucket: i64,
    window_secs: u64,
    limit: u64,
    current: u64,
    allowed: bool,
) -> RateLimitResult {
    let reset = bucket_reset_at(bucket, window_secs);
    RateLimitResult {
        allowed,
        limit,
        current,
        remaining: limit.saturating_sub(current),
        reset_at: Utc
            .timestamp_opt(reset, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC),
        window_secs,
        window_name: None,
        key,
        degraded: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnstile_core::ports::{KeyTtl, ManualClock};
    use turnstile_infra::InMemoryCounterStore;

    fn counter_at(unix: i64) -> (Arc<ManualClock>, Arc<InMemoryCounterStore>, WindowCounter) {
        let clock = Arc::new(ManualClock::at_unix(unix));
        let store = Arc::new(InMemoryCounterStore::with_clock(clock.clone()));
        let counter = WindowCounter::new(store.clone(), clock.clone(), "ratelimit");
        (clock, store, counter)
    }

    #[tokio::test]
    async fn test_limit_hits_pass_and_next_is_denied() {
        let (_, _, counter) = counter_at(1_000);

        for expected_remaining in (0..5).rev() {
            let result = counter.check("ip:10.0.0.1", 5, 60).await.unwrap();
            assert!(result.allowed);
            assert_eq!(result.remaining, expected_remaining);
        }

        let denied = counter.check("ip:10.0.0.1", 5, 60).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.current, 6);
        assert_eq!(denied.remaining, 0);
    }

    #[tokio::test]
    async fn test_reset_at_is_bucket_boundary() {
        let (_, _, counter) = counter_at(1_000);
        let result = counter.check("ip:10.0.0.1", 5, 60).await.unwrap();
        // floor(1000 / 60) = 16, boundary at 17 * 60
        assert_eq!(result.reset_at.timestamp(), 1_020);
        assert_eq!(result.key, "ratelimit:ip:10.0.0.1:60:16");
    }

    #[tokio::test]
    async fn test_counter_restarts_after_reset() {
        let (clock, _, counter) = counter_at(1_000);
        for _ in 0..3 {
            counter.check("user:1:chat", 3, 60).await.unwrap();
        }
        assert!(!counter.check("user:1:chat", 3, 60).await.unwrap().allowed);

        clock.set(Utc.timestamp_opt(1_020, 0).unwrap());
        let fresh = counter.check("user:1:chat", 3, 60).await.unwrap();
        assert!(fresh.allowed);
        assert_eq!(fresh.current, 1);
    }

    #[tokio::test]
    async fn test_first_hit_sets_window_ttl() {
        let (_, store, counter) = counter_at(1_000);
        let result = counter.check("user:1:chat", 3, 60).await.unwrap();
        assert_eq!(
            store.ttl(&result.key).await.unwrap(),
            KeyTtl::Expires(Duration::from_secs(60))
        );
    }

    #[tokio::test]
    async fn test_zero_limit_always_denies_without_counting() {
        let (_, store, counter) = counter_at(1_000);
        let result = counter.check("plan:bob:ai:premium", 0, 60).await.unwrap();
        assert!(!result.allowed);
        assert_eq!(store.get(&result.key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_peek_does_not_count() {
        let (_, _, counter) = counter_at(1_000);
        counter.check("user:1:chat", 2, 60).await.unwrap();

        let first = counter.peek("user:1:chat", 2, 60).await.unwrap();
        let second = counter.peek("user:1:chat", 2, 60).await.unwrap();
        assert_eq!(first.current, 1);
        assert_eq!(second.current, 1);
        assert!(second.allowed);
    }

    #[tokio::test]
    async fn test_release_gives_back_one_hit() {
        let (_, _, counter) = counter_at(1_000);
        counter.check("user:1:chat", 2, 60).await.unwrap();
        let second = counter.check("user:1:chat", 2, 60).await.unwrap();

        counter.release(&second.key).await.unwrap();
        assert_eq!(counter.peek("user:1:chat", 2, 60).await.unwrap().current, 1);
    }

    #[tokio::test]
    async fn test_release_after_expiry_leaves_no_residue() {
        let (clock, store, counter) = counter_at(1_000);
        let result = counter.check("user:1:chat", 2, 60).await.unwrap();

        clock.advance(chrono::Duration::seconds(120));
        counter.release(&result.key).await.unwrap();
        assert_eq!(store.ttl(&result.key).await.unwrap(), KeyTtl::Missing);
    }
}
