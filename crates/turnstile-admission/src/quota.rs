//! Daily quota tracker.
//!
//! Usage accumulates per user per UTC day in two counters, one for
//! requests and one for tokens. The logical day is midnight-anchored; the
//! keys themselves live for 25 hours so that a late write near midnight
//! never loses its TTL before the day is over. A new day uses new keys, so
//! counts start again at zero without any explicit reset.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use turnstile_core::StoreError;
use turnstile_core::domain::{
    CapMode, DAY_SECS, PlanTier, QuotaState, bucket_index, bucket_reset_at, key_segment,
};
use turnstile_core::ports::{Clock, CounterStore};

use crate::config::AdmissionConfig;

/// What `check` answers while the counter store is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaFailurePolicy {
    /// Deny while the store is unreachable.
    FailClosed,
    FailOpen,
}

impl QuotaFailurePolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "closed" | "fail_closed" | "deny" => Some(QuotaFailurePolicy::FailClosed),
            "open" | "fail_open" | "allow" => Some(QuotaFailurePolicy::FailOpen),
            _ => None,
        }
    }
}

pub struct QuotaTracker {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    prefix: String,
    policy: QuotaFailurePolicy,
    warning_percent: f64,
    key_ttl: Duration,
}

impl QuotaTracker {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, config: &AdmissionConfig) -> Self {
        Self {
            store,
            clock,
            prefix: config.quota_key_prefix.clone(),
            policy: config.quota_failure_policy,
            warning_percent: config.warning_percent,
            key_ttl: config.quota_ttl,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Current usage for `user_id` on `tier`. Never mutates.
    pub async fn check(&self, user_id: &str, tier: PlanTier) -> QuotaState {
        let now = self.clock.now();
        let (requests_key, tokens_key) = self.day_keys(user_id, now);

        let usage = async {
            let requests = self.store.get_counter(&requests_key).await?;
            let tokens = self.store.get_counter(&tokens_key).await?;
            Ok::<_, StoreError>((requests, tokens))
        }
        .await;

        match usage {
            Ok((requests, tokens)) => {
                let state = self.state(tier, requests.max(0) as u64, tokens.max(0) as u64, now);
                if state.warning && !state.exceeded {
                    tracing::debug!(
                        user_id = %user_id,
                        plan = %tier,
                        requests_percent = state.requests_percent,
                        tokens_percent = state.tokens_percent,
                        "Quota usage above warning threshold"
                    );
                }
                state
            }
            Err(e) => {
                tracing::error!(
                    user_id = %user_id,
                    plan = %tier,
                    policy = ?self.policy,
                    error = %e,
                    "Counter store unavailable for quota check"
                );
                self.fallback_state(tier, now)
            }
        }
    }

    /// Record one request and `tokens` tokens for today, as one unit.
    ///
    /// Keys are created with the 25 hour TTL on first write.
    pub async fn increment(&self, user_id: &str, tokens: u64) -> Result<(), StoreError> {
        let now = self.clock.now();
        let (requests_key, tokens_key) = self.day_keys(user_id, now);

        let mut increments = vec![(requests_key, 1)];
        if tokens > 0 {
            increments.push((tokens_key, i64::try_from(tokens).unwrap_or(i64::MAX)));
        }

        self.store
            .incr_all_with_expiry(&increments, self.key_ttl)
            .await?;
        Ok(())
    }

    /// Pattern matching every quota key of `user_id`.
    pub fn user_pattern(&self, escaped_user_id: &str) -> String {
        format!("{}:{escaped_user_id}:*", self.prefix)
    }

    fn day_keys(&self, user_id: &str, now: DateTime<Utc>) -> (String, String) {
        let day = now.format("%Y-%m-%d");
        let user = key_segment(user_id);
        (
            format!("{}:{user}:{day}:requests", self.prefix),
            format!("{}:{user}:{day}:tokens", self.prefix),
        )
    }

    fn state(&self, tier: PlanTier, requests_used: u64, tokens_used: u64, now: DateTime<Utc>) -> QuotaState {
        let limits = tier.limits();
        let requests_ratio = ratio(requests_used, limits.daily_requests);
        let tokens_ratio = ratio(tokens_used, limits.daily_tokens);

        // Raw counts decide; percentages are display values only.
        let exceeded =
            requests_used >= limits.daily_requests || tokens_used >= limits.daily_tokens;
        let warning = requests_ratio >= self.warning_percent || tokens_ratio >= self.warning_percent;
        let allowed = !(exceeded && limits.cap_mode == CapMode::Hard);

        QuotaState {
            plan: tier,
            cap_mode: limits.cap_mode,
            requests_used,
            requests_limit: limits.daily_requests,
            tokens_used,
            tokens_limit: limits.daily_tokens,
            requests_percent: requests_ratio.clamp(0.0, 100.0),
            tokens_percent: tokens_ratio.clamp(0.0, 100.0),
            reset_at: next_midnight(now),
            warning,
            exceeded,
            allowed,
            overage: exceeded && limits.cap_mode == CapMode::Soft,
            degraded: false,
        }
    }

    fn fallback_state(&self, tier: PlanTier, now: DateTime<Utc>) -> QuotaState {
        let mut state = self.state(tier, 0, 0, now);
        state.degraded = true;
        state.allowed = self.policy == QuotaFailurePolicy::FailOpen;
        state
    }
}

fn ratio(used: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 100.0;
    }
    used as f64 * 100.0 / limit as f64
}

/// Start of the next UTC day.
pub fn next_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let reset = bucket_reset_at(bucket_index(now.timestamp(), DAY_SECS), DAY_SECS);
    Utc.timestamp_opt(reset, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
