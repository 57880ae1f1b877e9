//! Per-address admission middleware.
//!
//! Counts every request under `ip:<address>` against the configured window
//! before the handler runs. The check fails open like every rate limit
//! check. Depending on the release policy, a counted hit is given back once
//! the response is known.

use actix_web::{
    Error, ResponseError,
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::StatusCode,
    web,
};
use std::future::{Future, Ready, ready};
use std::pin::Pin;
use std::rc::Rc;
use turnstile_core::domain::key_segment;

use crate::middleware::AppError;
use crate::state::AppState;

/// When a counted hit is given back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReleasePolicy {
    /// Every admitted request keeps its hit.
    #[default]
    Never,
    /// Give the hit back when the handler errors or answers 5xx.
    OnFailure,
    /// Give the hit back when the handler succeeds, so only failures count.
    OnSuccess,
}

impl ReleasePolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "never" | "none" => Some(ReleasePolicy::Never),
            "on_failure" | "failure" => Some(ReleasePolicy::OnFailure),
            "on_success" | "success" => Some(ReleasePolicy::OnSuccess),
            _ => None,
        }
    }

    /// Whether to release for a response status; `None` means the handler errored.
    pub fn should_release(self, status: Option<StatusCode>) -> bool {
        match (self, status) {
            (ReleasePolicy::Never, _) => false,
            (ReleasePolicy::OnFailure, None) => true,
            (ReleasePolicy::OnFailure, Some(status)) => status.is_server_error(),
            (ReleasePolicy::OnSuccess, None) => false,
            (ReleasePolicy::OnSuccess, Some(status)) => status.is_success(),
        }
    }
}

/// Admission middleware factory. Reads the gate and window from `AppState`.
pub struct IpAdmission;

impl<S, B> Transform<S, ServiceRequest> for IpAdmission
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = IpAdmissionService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(IpAdmissionService {
            service: Rc::new(service),
        }))
    }
}

pub struct IpAdmissionService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for IpAdmissionService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);

        Box::pin(async move {
            let state = req.app_data::<web::Data<AppState>>().cloned();
            let Some((state, window)) =
                state.and_then(|s| s.ip_limit.clone().map(|window| (s, window)))
            else {
                return service.call(req).await.map(ServiceResponse::map_into_left_body);
            };

            let address = req
                .connection_info()
                .realip_remote_addr()
                .unwrap_or("unknown")
                .to_string();
            let identifier = format!("ip:{}", key_segment(&address));

            let result = state.gate.rate_limits().check_window(&identifier, &window).await;

            if !result.allowed {
                tracing::warn!(
                    address = %address,
                    limit = result.limit,
                    reset_at = %result.reset_at,
                    "Address rate limit exceeded"
                );
                let response = AppError::throttled(&result, state.clock.now()).error_response();
                let (http_req, _payload) = req.into_parts();
                return Ok(ServiceResponse::new(http_req, response).map_into_right_body());
            }

            let outcome = service.call(req).await;

            let status = outcome.as_ref().ok().map(|res| res.status());
            if state.release_policy.should_release(status) {
                state.gate.rate_limits().release(&result).await;
            }

            outcome.map(ServiceResponse::map_into_left_body)
        })
    }
}
