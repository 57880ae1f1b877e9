//! Permission gate - one allow/deny decision per admission check.
//!
//! Order of checks:
//! 1. burst windows configured for the action, on `user:<id>:<action>`
//! 2. the per-model AI allowance when the action names a model class
//! 3. the plan allowance on `plan:<id>`
//! 4. the daily quota
//!
//! The first denial wins and later checks are skipped. The gate never
//! records usage; callers report consumption through `record_usage` once
//! the gated work actually happened.

use std::collections::HashMap;
use std::sync::Arc;

use turnstile_core::StoreError;
use turnstile_core::domain::{
    AdmissionStatus, ModelClass, PermissionDecision, PlanTier, RateLimitResult,
    WindowSpec, key_segment,
};
use turnstile_core::ports::{Clock, CounterStore};

use crate::config::AdmissionConfig;
use crate::quota::QuotaTracker;
use crate::rate_limit::{RateLimitEngine, action_identifier, most_restrictive};
use crate::window::WindowCounter;

/// What the caller wants to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub name: String,
    /// Set for AI actions; selects the per-model multiplier.
    pub model: Option<ModelClass>,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: None,
        }
    }

    pub fn ai(name: impl Into<String>, model: ModelClass) -> Self {
        Self {
            name: name.into(),
            model: Some(model),
        }
    }
}

pub struct PermissionGate {
    rate_limits: RateLimitEngine,
    quota: QuotaTracker,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    action_limits: HashMap<String, Vec<WindowSpec>>,
}

impl PermissionGate {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, config: &AdmissionConfig) -> Self {
        let counter = WindowCounter::new(store.clone(), clock.clone(), config.rate_key_prefix.clone());
        Self {
            rate_limits: RateLimitEngine::new(counter),
            quota: QuotaTracker::new(store.clone(), clock.clone(), config),
            store,
            clock,
            action_limits: config.action_limits.clone(),
        }
    }

    pub fn rate_limits(&self) -> &RateLimitEngine {
        &self.rate_limits
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Decide whether `user_id` on `tier` may perform `action` now.
    pub async fn evaluate(&self, user_id: &str, action: &Action, tier: PlanTier) -> PermissionDecision {
        let mut counted = Vec::new();
        let mut evaluated: Vec<RateLimitResult> = Vec::new();

        if let Some(windows) = self.action_limits.get(&action.name) {
            let identifier = action_identifier(user_id, &action.name);
            let results = self.rate_limits.check_windows(&identifier, windows).await;
            counted.extend(counted_keys(&results));

            if let Some(denied) = most_restrictive(&results).filter(|r| !r.allowed) {
                tracing::info!(
                    user_id = %user_id,
                    action = %action.name,
                    window = denied.window_name.as_deref().unwrap_or("unnamed"),
                    reset_at = %denied.reset_at,
                    "Request throttled by action window"
                );
                return PermissionDecision::rate_limited(tier, denied.clone(), counted);
            }
            evaluated.extend(results);
        }

        if let Some(model) = action.model {
            let result = self.rate_limits.check_for_model(user_id, tier, model).await;
            counted.extend(counted_keys(std::slice::from_ref(&result)));
            if !result.allowed {
                tracing::info!(
                    user_id = %user_id,
                    plan = %tier,
                    model = %model,
                    "Request throttled by model allowance"
                );
                return PermissionDecision::rate_limited(tier, result, counted);
            }
            evaluated.push(result);
        }

        let plan_result = self.rate_limits.check_for_plan(user_id, tier).await;
        counted.extend(counted_keys(std::slice::from_ref(&plan_result)));
        if !plan_result.allowed {
            // A plan window covering the whole day is the tier's daily allowance.
            if tier.limits().rate.spans_day() {
                tracing::info!(user_id = %user_id, plan = %tier, "Daily plan allowance used up");
                return PermissionDecision::quota_exceeded(tier, Some(plan_result), None, counted);
            }
            tracing::info!(user_id = %user_id, plan = %tier, "Request throttled by plan window");
            return PermissionDecision::rate_limited(tier, plan_result, counted);
        }

        let quota = self.quota.check(user_id, tier).await;
        if !quota.allowed {
            tracing::info!(
                user_id = %user_id,
                plan = %tier,
                requests_used = quota.requests_used,
                tokens_used = quota.tokens_used,
                degraded = quota.degraded,
                "Daily quota exceeded"
            );
            return PermissionDecision::quota_exceeded(tier, Some(plan_result), Some(quota), counted);
        }
        if quota.overage {
            tracing::info!(user_id = %user_id, plan = %tier, "Soft quota exceeded, billing overage");
        }

        // Report the window closest to its limit; ties go to the plan window.
        let reported = std::iter::once(&plan_result)
            .chain(evaluated.iter())
            .min_by_key(|r| r.remaining)
            .cloned()
            .unwrap_or_else(|| plan_result.clone());

        PermissionDecision::allow(tier, reported, quota, counted)
    }

    /// Report consumption after the gated work succeeded. Returns whether it
    /// was recorded; store failures are logged, never raised.
    pub async fn record_usage(&self, user_id: &str, tokens: u64) -> bool {
        match self.quota.increment(user_id, tokens).await {
            Ok(()) => {
                tracing::debug!(user_id = %user_id, tokens, "Usage recorded");
                true
            }
            Err(e) => {
                tracing::error!(user_id = %user_id, tokens, error = %e, "Failed to record usage");
                false
            }
        }
    }

    /// Read-only snapshot of plan throughput and daily quota.
    pub async fn status(&self, user_id: &str, tier: PlanTier) -> AdmissionStatus {
        AdmissionStatus {
            plan: tier,
            rate_limit: self.rate_limits.peek_for_plan(user_id, tier).await,
            quota: self.quota.check(user_id, tier).await,
        }
    }

    /// Give back every hit `decision` counted, for callers that know the
    /// gated work did not happen (or that exclude successful requests).
    /// Returns how many counters were decremented.
    pub async fn release(&self, decision: &PermissionDecision) -> usize {
        let mut released = 0;
        for key in &decision.counted_keys {
            if self.rate_limits.release_key(key).await {
                released += 1;
            }
        }
        released
    }

    /// Release keys reported by an earlier decision of `user_id`. Keys that
    /// do not belong to one of that user's windows are skipped.
    pub async fn release_for(&self, user_id: &str, keys: &[String]) -> usize {
        let prefix = self.rate_limits.counter().prefix();
        let user = key_segment(user_id);
        let owned = [
            format!("{prefix}:user:{user}:"),
            format!("{prefix}:plan:{user}:"),
        ];

        let mut released = 0;
        for key in keys {
            if !owned.iter().any(|p| key.starts_with(p.as_str())) {
                tracing::warn!(user_id = %user_id, key = %key, "Refusing to release foreign key");
                continue;
            }
            if self.rate_limits.release_key(key).await {
                released += 1;
            }
        }
        released
    }

    /// Administrative reset: delete every window and quota key of `user_id`.
    pub async fn reset(&self, user_id: &str) -> Result<u64, StoreError> {
        let escaped = escape_glob(&key_segment(user_id));
        let prefix = self.rate_limits.counter().prefix();
        let patterns = [
            format!("{prefix}:user:{escaped}:*"),
            format!("{prefix}:plan:{escaped}:*"),
            self.quota.user_pattern(&escaped),
        ];

        let mut keys = Vec::new();
        for pattern in &patterns {
            keys.extend(self.store.keys_matching(pattern).await?);
        }
        let deleted = self.store.delete(&keys).await?;

        tracing::warn!(user_id = %user_id, deleted, "Admission counters reset");
        Ok(deleted)
    }
}

/// Keys that a check actually incremented.
fn counted_keys(results: &[RateLimitResult]) -> impl Iterator<Item = String> + '_ {
    results
        .iter()
        .filter(|r| !r.degraded && r.current > 0)
        .map(|r| r.key.clone())
}

fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '{' | '}' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
