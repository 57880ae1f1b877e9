//! Error handling - RFC 7807 responses carrying admission metadata.

use actix_web::{HttpResponse, HttpResponseBuilder, ResponseError, http::StatusCode};
use chrono::{DateTime, Utc};
use std::fmt;

use turnstile_core::domain::{PermissionDecision, RateLimitResult};
use turnstile_core::{AdmissionError, StoreError};
use turnstile_shared::ErrorResponse;

/// Application-level error type that converts to RFC 7807 responses.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    /// A denied admission check, with the detail shown to the caller and
    /// the remaining allowance of the constraint that denied it.
    Denied {
        error: AdmissionError,
        detail: String,
        remaining: u64,
    },
    Unavailable(String),
}

impl AppError {
    /// Pass allowed decisions through and turn denials into errors.
    pub fn check(decision: PermissionDecision, now: DateTime<Utc>) -> Result<PermissionDecision, AppError> {
        let detail = decision.message(now);
        let remaining = decision
            .limit_and_remaining()
            .map(|(_, remaining)| remaining)
            .unwrap_or(0);

        decision.into_result(now).map_err(|error| {
            let detail = detail.unwrap_or_else(|| error.to_string());
            AppError::Denied {
                error,
                detail,
                remaining,
            }
        })
    }

    /// Denial for a single throttled window.
    pub fn throttled(result: &RateLimitResult, now: DateTime<Utc>) -> Self {
        let retry_after = result.retry_after(now);
        AppError::Denied {
            error: AdmissionError::Throttled {
                limit: result.limit,
                reset_at: result.reset_at,
                retry_after,
            },
            detail: format!("Rate limit exceeded. Try again in {retry_after} seconds."),
            remaining: 0,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Denied { error, .. } => write!(f, "{}", error),
            AppError::Unavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Denied { error, .. } => match error {
                AdmissionError::Throttled { .. } => StatusCode::TOO_MANY_REQUESTS,
                AdmissionError::QuotaExceeded { .. } => StatusCode::FORBIDDEN,
                AdmissionError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());

        let body = match self {
            AppError::BadRequest(detail) => ErrorResponse::bad_request(detail),
            AppError::Denied {
                error,
                detail,
                remaining,
            } => match error {
                AdmissionError::Throttled {
                    limit,
                    reset_at,
                    retry_after,
                } => {
                    insert_rate_limit_headers(&mut builder, *limit, *remaining, *reset_at);
                    builder.insert_header(("Retry-After", retry_after.to_string()));
                    ErrorResponse::too_many_requests(detail).with_retry(*retry_after, *reset_at)
                }
                AdmissionError::QuotaExceeded {
                    limit,
                    reset_at,
                    retry_after,
                    upgrade_hint,
                    ..
                } => {
                    insert_rate_limit_headers(&mut builder, *limit, *remaining, *reset_at);
                    builder.insert_header(("Retry-After", retry_after.to_string()));
                    ErrorResponse::quota_exceeded(detail)
                        .with_retry(*retry_after, *reset_at)
                        .with_upgrade_hint(*upgrade_hint)
                }
                AdmissionError::StoreUnavailable(e) => {
                    tracing::error!(error = %e, "Counter store unavailable");
                    ErrorResponse::service_unavailable("Admission state is temporarily unavailable")
                }
            },
            AppError::Unavailable(detail) => ErrorResponse::service_unavailable(detail),
        };

        builder.json(body)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "Counter store error");
        AppError::Unavailable("Admission state is temporarily unavailable".to_string())
    }
}

/// `X-RateLimit-*` headers; reset is a unix timestamp.
pub fn insert_rate_limit_headers(
    builder: &mut HttpResponseBuilder,
    limit: u64,
    remaining: u64,
    reset_at: DateTime<Utc>,
) {
    builder
        .insert_header(("X-RateLimit-Limit", limit.to_string()))
        .insert_header(("X-RateLimit-Remaining", remaining.to_string()))
        .insert_header(("X-RateLimit-Reset", reset_at.timestamp().to_string()));
}

/// Result type alias for handlers.
pub type AppResult<T> = Result<T, AppError>;
