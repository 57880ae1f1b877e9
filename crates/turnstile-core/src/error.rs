//! Admission-level error types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::PlanTier;

/// Counter store errors.
///
/// Every variant means the store could not answer; callers apply their
/// failure policy instead of propagating it.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Store connection failed: {0}")]
    Connection(String),

    #[error("Store operation timed out after {0} ms")]
    Timeout(u64),

    #[error("Store operation failed: {0}")]
    Operation(String),
}

/// Plan resolver errors.
#[derive(Debug, Clone, Error)]
pub enum PlanError {
    #[error("Unknown plan tier: {0}")]
    UnknownTier(String),

    #[error("Plan lookup failed: {0}")]
    Lookup(String),
}

/// Structured denials, built from a denied `PermissionDecision`.
#[derive(Debug, Clone, Error)]
pub enum AdmissionError {
    #[error("Rate limit exceeded, retry after {retry_after}s")]
    Throttled {
        limit: u64,
        reset_at: DateTime<Utc>,
        retry_after: u64,
    },

    #[error("Daily quota exceeded for plan {plan}, resets at {reset_at}")]
    QuotaExceeded {
        plan: PlanTier,
        limit: u64,
        reset_at: DateTime<Utc>,
        retry_after: u64,
        upgrade_hint: Option<PlanTier>,
    },

    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl AdmissionError {
    /// Seconds until the denial can be retried, if retrying makes sense.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            AdmissionError::Throttled { retry_after, .. }
            | AdmissionError::QuotaExceeded { retry_after, .. } => Some(*retry_after),
            AdmissionError::StoreUnavailable(_) => None,
        }
    }
}
