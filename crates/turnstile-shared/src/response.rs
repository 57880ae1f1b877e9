//! Standardized API response types (RFC 7807 compliant for errors).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use turnstile_core::domain::PlanTier;

/// Standard successful API response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
        }
    }
}

/// RFC 7807 Problem Details, extended with admission metadata.
///
/// See: https://datatracker.ietf.org/doc/html/rfc7807
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "type")]
    pub error_type: String,

    pub title: String,

    pub status: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// Machine-readable denial code, e.g. `RATE_LIMIT_EXCEEDED`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Seconds until the request may be retried.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<DateTime<Utc>>,

    /// Next plan tier with a higher allowance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_hint: Option<PlanTier>,
}

impl ErrorResponse {
    pub fn new(status: u16, title: impl Into<String>) -> Self {
        Self {
            error_type: "about:blank".to_string(),
            title: title.into(),
            status,
            detail: None,
            code: None,
            retry_after: None,
            reset_at: None,
            upgrade_hint: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_retry(mut self, retry_after: u64, reset_at: DateTime<Utc>) -> Self {
        self.retry_after = Some(retry_after);
        self.reset_at = Some(reset_at);
        self
    }

    pub fn with_upgrade_hint(mut self, hint: Option<PlanTier>) -> Self {
        self.upgrade_hint = hint;
        self
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(400, "Bad Request").with_detail(detail)
    }

    pub fn too_many_requests(detail: impl Into<String>) -> Self {
        Self::new(429, "Too Many Requests")
            .with_detail(detail)
            .with_code("RATE_LIMIT_EXCEEDED")
    }

    pub fn quota_exceeded(detail: impl Into<String>) -> Self {
        Self::new(403, "Quota Exceeded")
            .with_detail(detail)
            .with_code("QUOTA_EXCEEDED")
    }

    pub fn service_unavailable(detail: impl Into<String>) -> Self {
        Self::new(503, "Service Unavailable").with_detail(detail)
    }
}
