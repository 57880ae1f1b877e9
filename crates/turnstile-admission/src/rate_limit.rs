//! Rate limit engine - throughput shaping on top of the window counter.
//!
//! Every check fails open: when the counter store errors or times out the
//! engine logs the failure and answers `allowed = true` with
//! `remaining = limit` and `degraded = true`.

use futures::future::join_all;

use turnstile_core::domain::{ModelClass, PlanTier, RateLimitResult, WindowSpec, key_segment};

use crate::window::WindowCounter;

pub struct RateLimitEngine {
    counter: WindowCounter,
}

impl RateLimitEngine {
    pub fn new(counter: WindowCounter) -> Self {
        Self { counter }
    }

    pub fn counter(&self) -> &WindowCounter {
        &self.counter
    }

    /// One `(limit, window)` check against `identifier`.
    pub async fn check_single(&self, identifier: &str, limit: u64, window_secs: u64) -> RateLimitResult {
        match self.counter.check(identifier, limit, window_secs).await {
            Ok(result) => {
                if !result.allowed {
                    tracing::debug!(
                        identifier = %identifier,
                        limit,
                        window_secs,
                        current = result.current,
                        "Rate limit exceeded"
                    );
                }
                result
            }
            Err(e) => {
                tracing::warn!(
                    identifier = %identifier,
                    window_secs,
                    error = %e,
                    "Counter store unavailable, failing open"
                );
                self.counter.fail_open(identifier, limit, window_secs)
            }
        }
    }

    pub async fn check_window(&self, identifier: &str, window: &WindowSpec) -> RateLimitResult {
        let mut result = self
            .check_single(identifier, window.limit, window.window_secs)
            .await;
        result.window_name = window.name.clone();
        result
    }

    /// Count the hit in every window concurrently; results keep the order of `windows`.
    pub async fn check_windows(&self, identifier: &str, windows: &[WindowSpec]) -> Vec<RateLimitResult> {
        join_all(windows.iter().map(|w| self.check_window(identifier, w))).await
    }

    /// Burst protection: the first denying window decides, carrying its own
    /// `reset_at`. If every window allows, the first result is returned.
    /// `None` when `windows` is empty.
    pub async fn check_multi_window(
        &self,
        identifier: &str,
        windows: &[WindowSpec],
    ) -> Option<RateLimitResult> {
        let results = self.check_windows(identifier, windows).await;
        most_restrictive(&results).cloned()
    }

    /// Throughput allowance of the user's plan, on `plan:<user_id>`.
    pub async fn check_for_plan(&self, user_id: &str, tier: PlanTier) -> RateLimitResult {
        self.check_window(&plan_identifier(user_id), &tier.limits().rate)
            .await
    }

    /// AI allowance for one model class, the plan limit scaled by the model multiplier.
    pub async fn check_for_model(
        &self,
        user_id: &str,
        tier: PlanTier,
        model: ModelClass,
    ) -> RateLimitResult {
        let window = tier.limits().model_window(model);
        self.check_window(&model_identifier(user_id, model), &window)
            .await
    }

    /// Plan allowance without counting, for status displays.
    pub async fn peek_for_plan(&self, user_id: &str, tier: PlanTier) -> RateLimitResult {
        let window = tier.limits().rate;
        let identifier = plan_identifier(user_id);
        let mut result = match self
            .counter
            .peek(&identifier, window.limit, window.window_secs)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(identifier = %identifier, error = %e, "Counter store unavailable for status");
                self.counter
                    .fail_open(&identifier, window.limit, window.window_secs)
            }
        };
        result.window_name = window.name;
        result
    }

    /// Give back a hit counted by an earlier check. Degraded and uncounted
    /// results are ignored. Returns whether a counter was decremented.
    pub async fn release(&self, result: &RateLimitResult) -> bool {
        if result.degraded || result.current == 0 {
            return false;
        }
        self.release_key(&result.key).await
    }

    pub async fn release_key(&self, key: &str) -> bool {
        match self.counter.release(key).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to release counted hit");
                false
            }
        }
    }
}

/// First denied result, else the first result.
pub fn most_restrictive(results: &[RateLimitResult]) -> Option<&RateLimitResult> {
    results
        .iter()
        .find(|r| !r.allowed)
        .or_else(|| results.first())
}

pub fn plan_identifier(user_id: &str) -> String {
    format!("plan:{}", key_segment(user_id))
}

pub fn model_identifier(user_id: &str, model: ModelClass) -> String {
    format!("plan:{}:ai:{model}", key_segment(user_id))
}

/// Identifier of the burst windows of one action of one user.
pub fn action_identifier(user_id: &str, action: &str) -> String {
    format!("user:{}:{}", key_segment(user_id), key_segment(action))
}
