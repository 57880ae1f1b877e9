//! Sweep for counter keys that lost their TTL.
//!
//! Outside Redis the increment and the expire on a fresh key are two
//! separate calls. A crash between them leaves a key that never expires
//! and keeps counting. The sweep finds persistent counter keys and gives
//! them back a lifetime: window keys until the end of the bucket named in
//! the key, everything else the fallback TTL.

use std::sync::Arc;
use std::time::Duration;

use turnstile_core::StoreError;
use turnstile_core::domain::bucket_reset_at;
use turnstile_core::ports::{Clock, CounterStore, KeyTtl};

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    /// Persistent keys that were given a TTL.
    pub repaired: usize,
    /// Persistent window keys whose bucket had already ended.
    pub removed: usize,
}

pub struct TtlSweeper {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    rate_key_prefix: String,
    quota_key_prefix: String,
    fallback_ttl: Duration,
}

impl TtlSweeper {
    pub fn new(
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        rate_key_prefix: impl Into<String>,
        quota_key_prefix: impl Into<String>,
        fallback_ttl: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            rate_key_prefix: rate_key_prefix.into(),
            quota_key_prefix: quota_key_prefix.into(),
            fallback_ttl,
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let mut report = SweepReport::default();

        for prefix in [&self.rate_key_prefix, &self.quota_key_prefix] {
            let keys = self.store.keys_matching(&format!("{prefix}:*")).await?;
            report.scanned += keys.len();

            for key in keys {
                if self.store.ttl(&key).await? != KeyTtl::Persistent {
                    continue;
                }

                match self.ttl_for(&key) {
                    Some(ttl) => {
                        if self.store.expire(&key, ttl).await? {
                            report.repaired += 1;
                        }
                    }
                    None => {
                        report.removed += self.store.delete(&[key]).await? as usize;
                    }
                }
            }
        }

        if report.repaired > 0 || report.removed > 0 {
            tracing::warn!(
                scanned = report.scanned,
                repaired = report.repaired,
                removed = report.removed,
                "Swept counter keys without TTL"
            );
        } else {
            tracing::debug!(scanned = report.scanned, "TTL sweep found nothing to repair");
        }

        Ok(report)
    }

    /// TTL a persistent key should get; `None` when its bucket has ended.
    fn ttl_for(&self, key: &str) -> Option<Duration> {
        let Some(bucket_end) = self.window_bucket_end(key) else {
            return Some(self.fallback_ttl);
        };
        let left = bucket_end - self.clock.unix();
        (left > 0).then(|| Duration::from_secs(left as u64))
    }

    /// End of the bucket encoded in a `<prefix>:<identifier>:<window>:<bucket>` key.
    fn window_bucket_end(&self, key: &str) -> Option<i64> {
        let rest = key.strip_prefix(&self.rate_key_prefix)?.strip_prefix(':')?;
        let mut parts = rest.rsplitn(3, ':');
        let bucket: i64 = parts.next()?.parse().ok()?;
        let window_secs: u64 = parts.next()?.parse().ok()?;
        parts.next()?;
        Some(bucket_reset_at(bucket, window_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnstile_core::ports::ManualClock;
    use turnstile_infra::InMemoryCounterStore;

    fn sweeper_at(unix: i64) -> (Arc<InMemoryCounterStore>, TtlSweeper) {
        let clock = Arc::new(ManualClock::at_unix(unix));
        let store = Arc::new(InMemoryCounterStore::with_clock(clock.clone()));
        let sweeper = TtlSweeper::new(
            store.clone(),
            clock,
            "ratelimit",
            "quota",
            Duration::from_secs(90_000),
        );
        (store, sweeper)
    }

    #[tokio::test]
    async fn test_window_key_gets_rest_of_its_bucket() {
        let (store, sweeper) = sweeper_at(1_000);
        // bucket 16 of a 60s window ends at 1020
        store.incr("ratelimit:user:1:chat:60:16", 1).await.unwrap();

        let report = sweeper.sweep().await.unwrap();
        assert_eq!(report.repaired, 1);
        assert_eq!(
            store.ttl("ratelimit:user:1:chat:60:16").await.unwrap(),
            KeyTtl::Expires(Duration::from_secs(20))
        );
    }

    #[tokio::test]
    async fn test_stale_window_key_is_removed() {
        let (store, sweeper) = sweeper_at(10_000);
        store.incr("ratelimit:ip:10.0.0.1:60:16", 1).await.unwrap();

        let report = sweeper.sweep().await.unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(
            store.ttl("ratelimit:ip:10.0.0.1:60:16").await.unwrap(),
            KeyTtl::Missing
        );
    }

    #[tokio::test]
    async fn test_quota_key_gets_fallback_ttl_and_healthy_keys_are_untouched() {
        let (store, sweeper) = sweeper_at(1_000);
        store.incr("quota:alice:1970-01-01:requests", 3).await.unwrap();
        store
            .incr_with_expiry("ratelimit:plan:alice:60:16", 1, Duration::from_secs(20))
            .await
            .unwrap();

        let report = sweeper.sweep().await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.repaired, 1);
        assert_eq!(
            store.ttl("quota:alice:1970-01-01:requests").await.unwrap(),
            KeyTtl::Expires(Duration::from_secs(90_000))
        );
    }
}
