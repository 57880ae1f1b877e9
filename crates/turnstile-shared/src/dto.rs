//! Data Transfer Objects - request/response types for the admission API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use turnstile_core::domain::{
    AdmissionStatus, DenialReason, ModelClass, PermissionDecision, PlanTier, QuotaState,
    RateLimitResult,
};

/// Request to evaluate one action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateRequest {
    pub user_id: String,
    pub action: String,
    /// Model class for AI actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelClass>,
    /// Overrides the resolved plan. Trusted callers only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanTier>,
}

/// Consumption report after the gated work happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRequest {
    pub user_id: String,
    #[serde(default)]
    pub tokens: u64,
}

/// Outcome of an evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub allowed: bool,
    pub plan: PlanTier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota: Option<QuotaState>,
    /// Counters this evaluation incremented; hand them back through the
    /// release endpoint when the gated work did not happen.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub counted_keys: Vec<String>,
}

impl From<PermissionDecision> for DecisionResponse {
    fn from(decision: PermissionDecision) -> Self {
        Self {
            allowed: decision.allowed,
            plan: decision.plan,
            reason: decision.reason,
            rate_limit: decision.rate_limit,
            quota: decision.quota,
            counted_keys: decision.counted_keys,
        }
    }
}

/// Hits of an earlier evaluation to give back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub user_id: String,
    #[serde(default)]
    pub counted_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseResponse {
    pub user_id: String,
    pub released: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageResponse {
    pub user_id: String,
    pub tokens: u64,
    pub recorded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub user_id: String,
    pub plan: PlanTier,
    pub rate_limit: RateLimitResult,
    pub quota: QuotaState,
}

impl StatusResponse {
    pub fn new(user_id: impl Into<String>, status: AdmissionStatus) -> Self {
        Self {
            user_id: user_id.into(),
            plan: status.plan,
            rate_limit: status.rate_limit,
            quota: status.quota,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetResponse {
    pub user_id: String,
    pub deleted: u64,
    pub reset_at: DateTime<Utc>,
}
