//! Decision types returned by the admission checks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CapMode, PlanTier};
use crate::error::AdmissionError;

/// Outcome of one fixed-window check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u64,
    pub current: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
    pub window_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_name: Option<String>,
    /// Counter key this check touched.
    #[serde(skip)]
    pub key: String,
    /// Set when the store failed and the result is a fail-open fallback.
    #[serde(default)]
    pub degraded: bool,
}

impl RateLimitResult {
    /// Seconds from `now` until the window resets, never below one.
    pub fn retry_after(&self, now: DateTime<Utc>) -> u64 {
        seconds_until(self.reset_at, now)
    }
}

/// Daily usage of one user against their plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaState {
    pub plan: PlanTier,
    pub cap_mode: CapMode,
    pub requests_used: u64,
    pub requests_limit: u64,
    pub tokens_used: u64,
    pub tokens_limit: u64,
    /// Display percentage, clamped to `[0, 100]`.
    pub requests_percent: f64,
    /// Display percentage, clamped to `[0, 100]`.
    pub tokens_percent: f64,
    pub reset_at: DateTime<Utc>,
    /// Either dimension at or above the warning threshold.
    pub warning: bool,
    /// Either dimension at or above its limit, compared on raw counts.
    pub exceeded: bool,
    pub allowed: bool,
    /// Soft-capped usage past the limit, to be billed later.
    pub overage: bool,
    /// Set when the store failed and the state is a policy fallback.
    #[serde(default)]
    pub degraded: bool,
}

impl QuotaState {
    pub fn requests_remaining(&self) -> u64 {
        self.requests_limit.saturating_sub(self.requests_used)
    }

    pub fn retry_after(&self, now: DateTime<Utc>) -> u64 {
        seconds_until(self.reset_at, now)
    }
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenialReason {
    RateLimited,
    QuotaExceeded,
}

impl DenialReason {
    /// Machine-readable code for HTTP-facing callers.
    pub fn code(self) -> &'static str {
        match self {
            DenialReason::RateLimited => "RATE_LIMIT_EXCEEDED",
            DenialReason::QuotaExceeded => "QUOTA_EXCEEDED",
        }
    }
}

/// Result of one admission evaluation. Built fresh per call, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionDecision {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<QuotaState>,
    pub plan: PlanTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_hint: Option<PlanTier>,
    /// Keys incremented while evaluating, for `release`.
    #[serde(skip)]
    pub counted_keys: Vec<String>,
}

impl PermissionDecision {
    pub fn allow(
        plan: PlanTier,
        rate_limit: RateLimitResult,
        quota: QuotaState,
        counted_keys: Vec<String>,
    ) -> Self {
        Self {
            allowed: true,
            reason: None,
            rate_limit: Some(rate_limit),
            quota: Some(quota),
            plan,
            upgrade_hint: None,
            counted_keys,
        }
    }

    pub fn rate_limited(
        plan: PlanTier,
        rate_limit: RateLimitResult,
        counted_keys: Vec<String>,
    ) -> Self {
        Self {
            allowed: false,
            reason: Some(DenialReason::RateLimited),
            rate_limit: Some(rate_limit),
            quota: None,
            plan,
            upgrade_hint: None,
            counted_keys,
        }
    }

    /// Quota denial. Either the daily plan window or the quota state blocked.
    pub fn quota_exceeded(
        plan: PlanTier,
        rate_limit: Option<RateLimitResult>,
        quota: Option<QuotaState>,
        counted_keys: Vec<String>,
    ) -> Self {
        Self {
            allowed: false,
            reason: Some(DenialReason::QuotaExceeded),
            rate_limit,
            quota,
            plan,
            upgrade_hint: plan.next(),
            counted_keys,
        }
    }

    /// When the blocking constraint lifts. For allowed decisions, the
    /// earliest reset among the attached results.
    pub fn reset_at(&self) -> Option<DateTime<Utc>> {
        match self.reason {
            Some(DenialReason::QuotaExceeded) => self
                .quota
                .as_ref()
                .map(|q| q.reset_at)
                .or_else(|| self.rate_limit.as_ref().map(|r| r.reset_at)),
            _ => self.rate_limit.as_ref().map(|r| r.reset_at),
        }
    }

    pub fn retry_after(&self, now: DateTime<Utc>) -> Option<u64> {
        self.reset_at().map(|reset| seconds_until(reset, now))
    }

    /// Limit and remaining of the constraint that matters for this decision.
    pub fn limit_and_remaining(&self) -> Option<(u64, u64)> {
        match (self.reason, &self.rate_limit, &self.quota) {
            (Some(DenialReason::QuotaExceeded), _, Some(q)) => {
                Some((q.requests_limit, q.requests_remaining()))
            }
            (_, Some(r), _) => Some((r.limit, r.remaining)),
            (_, None, Some(q)) => Some((q.requests_limit, q.requests_remaining())),
            (_, None, None) => None,
        }
    }

    /// Human-readable explanation of a denial.
    pub fn message(&self, now: DateTime<Utc>) -> Option<String> {
        let retry = self.retry_after(now).unwrap_or(0);
        match self.reason? {
            DenialReason::RateLimited => Some(format!(
                "Rate limit exceeded. Try again in {retry} seconds."
            )),
            DenialReason::QuotaExceeded => Some(match self.upgrade_hint {
                Some(next) => format!(
                    "Daily quota for the {} plan is used up. It resets in {retry} seconds, or upgrade to {next} for a higher limit.",
                    self.plan
                ),
                None => format!(
                    "Daily quota for the {} plan is used up. It resets in {retry} seconds.",
                    self.plan
                ),
            }),
        }
    }

    /// Turn a denial into a structured error, passing allowed decisions through.
    pub fn into_result(self, now: DateTime<Utc>) -> Result<Self, AdmissionError> {
        let Some(reason) = self.reason else {
            return Ok(self);
        };
        let reset_at = self.reset_at().unwrap_or(now);
        let retry_after = seconds_until(reset_at, now);
        let limit = self.limit_and_remaining().map(|(l, _)| l).unwrap_or(0);
        Err(match reason {
            DenialReason::RateLimited => AdmissionError::Throttled {
                limit,
                reset_at,
                retry_after,
            },
            DenialReason::QuotaExceeded => AdmissionError::QuotaExceeded {
                plan: self.plan,
                limit,
                reset_at,
                retry_after,
                upgrade_hint: self.upgrade_hint,
            },
        })
    }
}

/// Read-only snapshot for display and telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionStatus {
    pub plan: PlanTier,
    pub rate_limit: RateLimitResult,
    pub quota: QuotaState,
}

fn seconds_until(reset: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (reset - now).num_seconds().max(1) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window_result(allowed: bool, reset_secs: i64) -> RateLimitResult {
        RateLimitResult {
            allowed,
            limit: 5,
            current: if allowed { 3 } else { 6 },
            remaining: if allowed { 2 } else { 0 },
            reset_at: Utc.timestamp_opt(reset_secs, 0).unwrap(),
            window_secs: 10,
            window_name: None,
            key: "ratelimit:user:1:chat:10:1".to_string(),
            degraded: false,
        }
    }

    #[test]
    fn test_rate_limited_decision_carries_retry_hint() {
        let now = Utc.timestamp_opt(1_000, 0).unwrap();
        let decision =
            PermissionDecision::rate_limited(PlanTier::Pro, window_result(false, 1_010), vec![]);

        assert_eq!(decision.retry_after(now), Some(10));
        assert_eq!(decision.upgrade_hint, None);
        match decision.into_result(now) {
            Err(AdmissionError::Throttled {
                retry_after, limit, ..
            }) => {
                assert_eq!(retry_after, 10);
                assert_eq!(limit, 5);
            }
            other => panic!("expected throttled, got {other:?}"),
        }
    }

    #[test]
    fn test_quota_denial_suggests_next_tier() {
        let now = Utc.timestamp_opt(1_000, 0).unwrap();
        let decision = PermissionDecision::quota_exceeded(
            PlanTier::Free,
            Some(window_result(false, 86_400)),
            None,
            vec![],
        );

        assert_eq!(decision.upgrade_hint, Some(PlanTier::Basic));
        let message = decision.message(now).unwrap();
        assert!(message.contains("upgrade to basic"));
        assert!(matches!(
            decision.into_result(now),
            Err(AdmissionError::QuotaExceeded {
                upgrade_hint: Some(PlanTier::Basic),
                ..
            })
        ));
    }

    #[test]
    fn test_retry_after_is_at_least_one_second() {
        let now = Utc.timestamp_opt(2_000, 0).unwrap();
        assert_eq!(window_result(false, 1_990).retry_after(now), 1);
    }

    #[test]
    fn test_reason_codes_serialize_for_http_callers() {
        assert_eq!(DenialReason::RateLimited.code(), "RATE_LIMIT_EXCEEDED");
        assert_eq!(
            serde_json::to_string(&DenialReason::QuotaExceeded).unwrap(),
            "\"QUOTA_EXCEEDED\""
        );
    }
}
