//! Liveness of the admission service and reachability of its counter store.

use actix_web::{HttpResponse, web};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` while rate limits fail open.
    pub status: &'static str,
    pub version: &'static str,
    pub counter_store: StoreHealth,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct StoreHealth {
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /api/health
///
/// 503 when the counter store does not answer, so load balancers can
/// drain an instance whose decisions are all degraded.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let counter_store = match state.store.ping().await {
        Ok(()) => StoreHealth {
            reachable: true,
            error: None,
        },
        Err(e) => {
            tracing::warn!(error = %e, "Counter store unreachable");
            StoreHealth {
                reachable: false,
                error: Some(e.to_string()),
            }
        }
    };

    let reachable = counter_store.reachable;
    let response = HealthResponse {
        status: if reachable { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        counter_store,
        checked_at: state.clock.now(),
    };

    if reachable {
        HttpResponse::Ok().json(response)
    } else {
        HttpResponse::ServiceUnavailable().json(response)
    }
}
