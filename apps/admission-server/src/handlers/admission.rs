//! Admission endpoints.

use actix_web::{HttpResponse, web};

use turnstile_admission::Action;
use turnstile_shared::ApiResponse;
use turnstile_shared::dto::{
    DecisionResponse, EvaluateRequest, ReleaseRequest, ReleaseResponse, ResetResponse,
    StatusResponse, UsageRequest, UsageResponse,
};

use crate::middleware::error::insert_rate_limit_headers;
use crate::middleware::{AppError, AppResult};
use crate::state::AppState;

/// POST /api/admission/evaluate
///
/// 200 with the decision when allowed; 429 or 403 problem details otherwise.
pub async fn evaluate(
    state: web::Data<AppState>,
    body: web::Json<EvaluateRequest>,
) -> AppResult<HttpResponse> {
    let req = body.into_inner();
    if req.user_id.trim().is_empty() || req.action.trim().is_empty() {
        return Err(AppError::BadRequest(
            "user_id and action are required".to_string(),
        ));
    }

    let tier = match req.plan {
        Some(plan) => plan,
        None => state.plan_for(&req.user_id).await,
    };
    let action = match req.model {
        Some(model) => Action::ai(req.action, model),
        None => Action::new(req.action),
    };

    let decision = state.gate.evaluate(&req.user_id, &action, tier).await;
    let now = state.clock.now();
    let decision = AppError::check(decision, now)?;

    let mut response = HttpResponse::Ok();
    if let (Some((limit, remaining)), Some(reset_at)) =
        (decision.limit_and_remaining(), decision.reset_at())
    {
        insert_rate_limit_headers(&mut response, limit, remaining, reset_at);
    }

    Ok(response.json(ApiResponse::ok(DecisionResponse::from(decision))))
}

/// POST /api/admission/release
///
/// Gives back the hits listed by an earlier allowed evaluation, for callers
/// whose gated work did not happen. Keys outside the user's windows are ignored.
pub async fn release(
    state: web::Data<AppState>,
    body: web::Json<ReleaseRequest>,
) -> AppResult<HttpResponse> {
    let req = body.into_inner();
    if req.user_id.trim().is_empty() {
        return Err(AppError::BadRequest("user_id is required".to_string()));
    }

    let released = state.gate.release_for(&req.user_id, &req.counted_keys).await;

    Ok(HttpResponse::Ok().json(ApiResponse::ok(ReleaseResponse {
        user_id: req.user_id,
        released,
    })))
}

/// POST /api/admission/usage
pub async fn record_usage(
    state: web::Data<AppState>,
    body: web::Json<UsageRequest>,
) -> AppResult<HttpResponse> {
    let req = body.into_inner();
    if req.user_id.trim().is_empty() {
        return Err(AppError::BadRequest("user_id is required".to_string()));
    }

    if !state.gate.record_usage(&req.user_id, req.tokens).await {
        return Err(AppError::Unavailable(
            "Usage could not be recorded, retry later".to_string(),
        ));
    }

    Ok(HttpResponse::Accepted().json(ApiResponse::ok(UsageResponse {
        user_id: req.user_id,
        tokens: req.tokens,
        recorded: true,
    })))
}

/// GET /api/admission/status/{user_id}
pub async fn status(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let user_id = path.into_inner();
    let tier = state.plan_for(&user_id).await;
    let status = state.gate.status(&user_id, tier).await;

    HttpResponse::Ok().json(ApiResponse::ok(StatusResponse::new(user_id, status)))
}

/// DELETE /api/admission/counters/{user_id}
pub async fn reset(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let user_id = path.into_inner();
    let deleted = state.gate.reset(&user_id).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::ok_with_message(
        ResetResponse {
            user_id,
            deleted,
            reset_at: state.clock.now(),
        },
        "Admission counters reset",
    )))
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use actix_web::{App, dev::ServiceResponse, http::StatusCode, test};
    use serde_json::{Value, json};

    use turnstile_admission::AdmissionConfig;
    use turnstile_core::domain::{PlanTier, WindowSpec};
    use turnstile_core::ports::ManualClock;
    use turnstile_infra::{InMemoryCounterStore, InMemoryPlanResolver};

    use crate::handlers::configure_routes;
    use crate::middleware::ReleasePolicy;
    use crate::state::AppState;

    // 2024-03-10T15:30:00Z
    const NOW: i64 = 1_710_084_600;
    // 2024-03-11T00:00:00Z
    const MIDNIGHT: i64 = 1_710_115_200;

    fn state_with(ip_limit: Option<WindowSpec>, release_policy: ReleasePolicy) -> AppState {
        let clock = Arc::new(ManualClock::at_unix(NOW));
        let store = Arc::new(InMemoryCounterStore::with_clock(clock.clone()));
        let plans = Arc::new(
            InMemoryPlanResolver::new(PlanTier::Free)
                .with_assignment("basic-user", PlanTier::Basic)
                .with_assignment("pro-user", PlanTier::Pro),
        );
        let admission = AdmissionConfig::default()
            .with_action("chat", vec![WindowSpec::named(2, 60, "minute")]);

        AppState::with_parts(store, clock, plans, &admission, ip_limit, release_policy)
    }

    fn state() -> AppState {
        state_with(None, ReleasePolicy::Never)
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(actix_web::web::Data::new($state))
                    .configure(configure_routes),
            )
            .await
        };
    }

    fn header<'a, B>(res: &'a ServiceResponse<B>, name: &str) -> &'a str {
        res.headers().get(name).unwrap().to_str().unwrap()
    }

    fn evaluate_request(body: Value) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/api/admission/evaluate")
            .set_json(body)
    }

    #[actix_web::test]
    async fn test_evaluate_allows_and_sets_headers() {
        let app = app!(state());

        let res = test::call_service(
            &app,
            evaluate_request(json!({"user_id": "alice", "action": "summarize"})).to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(header(&res, "X-RateLimit-Limit"), "10");
        assert_eq!(header(&res, "X-RateLimit-Remaining"), "9");
        assert_eq!(header(&res, "X-RateLimit-Reset"), MIDNIGHT.to_string());

        let body: Value = test::read_body_json(res).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["allowed"], true);
        assert_eq!(body["data"]["plan"], "free");
    }

    #[actix_web::test]
    async fn test_free_plan_exhaustion_returns_quota_problem() {
        let app = app!(state());

        for _ in 0..10 {
            let res = test::call_service(
                &app,
                evaluate_request(json!({"user_id": "alice", "action": "summarize"})).to_request(),
            )
            .await;
            assert_eq!(res.status(), StatusCode::OK);
        }

        let res = test::call_service(
            &app,
            evaluate_request(json!({"user_id": "alice", "action": "summarize"})).to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(header(&res, "Retry-After"), (MIDNIGHT - NOW).to_string());

        let body: Value = test::read_body_json(res).await;
        assert_eq!(body["code"], "QUOTA_EXCEEDED");
        assert_eq!(body["upgrade_hint"], "basic");
        assert_eq!(body["retry_after"], MIDNIGHT - NOW);
        assert_eq!(body["reset_at"], "2024-03-11T00:00:00Z");
    }

    #[actix_web::test]
    async fn test_action_burst_returns_429() {
        let app = app!(state());
        let chat = json!({"user_id": "pro-user", "action": "chat"});

        for _ in 0..2 {
            let res = test::call_service(&app, evaluate_request(chat.clone()).to_request()).await;
            assert_eq!(res.status(), StatusCode::OK);
        }

        let res = test::call_service(&app, evaluate_request(chat).to_request()).await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(header(&res, "X-RateLimit-Remaining"), "0");
        assert_eq!(header(&res, "Retry-After"), "60");

        let body: Value = test::read_body_json(res).await;
        assert_eq!(body["status"], 429);
        assert_eq!(body["code"], "RATE_LIMIT_EXCEEDED");
        assert!(body.get("upgrade_hint").is_none());
    }

    #[actix_web::test]
    async fn test_plan_override_and_model_allowance() {
        let app = app!(state());

        let res = test::call_service(
            &app,
            evaluate_request(json!({
                "user_id": "alice",
                "action": "generate",
                "model": "premium",
                "plan": "pro"
            }))
            .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = test::call_service(
            &app,
            evaluate_request(json!({
                "user_id": "basic-user",
                "action": "generate",
                "model": "premium"
            }))
            .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[actix_web::test]
    async fn test_release_gives_back_evaluated_hits() {
        let app = app!(state());
        let chat = json!({"user_id": "pro-user", "action": "chat"});

        let first: Value = test::call_and_read_body_json(
            &app,
            evaluate_request(chat.clone()).to_request(),
        )
        .await;
        let keys = first["data"]["counted_keys"].clone();
        assert_eq!(keys.as_array().unwrap().len(), 2);

        let req = test::TestRequest::post()
            .uri("/api/admission/release")
            .set_json(json!({"user_id": "pro-user", "counted_keys": keys}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["released"], 2);

        for _ in 0..2 {
            let res = test::call_service(&app, evaluate_request(chat.clone()).to_request()).await;
            assert_eq!(res.status(), StatusCode::OK);
        }
    }

    #[actix_web::test]
    async fn test_release_ignores_keys_of_other_users() {
        let app = app!(state());

        let alice: Value = test::call_and_read_body_json(
            &app,
            evaluate_request(json!({"user_id": "alice", "action": "summarize"})).to_request(),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/admission/release")
            .set_json(json!({"user_id": "mallory", "counted_keys": alice["data"]["counted_keys"]}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["released"], 0);

        let req = test::TestRequest::get()
            .uri("/api/admission/status/alice")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["rate_limit"]["current"], 1);
    }

    #[actix_web::test]
    async fn test_evaluate_rejects_missing_user() {
        let app = app!(state());
        let res = test::call_service(
            &app,
            evaluate_request(json!({"user_id": " ", "action": "chat"})).to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_usage_then_status_reflects_consumption() {
        let app = app!(state());

        let req = test::TestRequest::post()
            .uri("/api/admission/usage")
            .set_json(json!({"user_id": "basic-user", "tokens": 1500}))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::ACCEPTED);

        let req = test::TestRequest::get()
            .uri("/api/admission/status/basic-user")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["plan"], "basic");
        assert_eq!(body["data"]["quota"]["requests_used"], 1);
        assert_eq!(body["data"]["quota"]["tokens_used"], 1500);
        assert_eq!(body["data"]["rate_limit"]["current"], 0);
    }

    #[actix_web::test]
    async fn test_reset_clears_counters() {
        let app = app!(state());

        test::call_service(
            &app,
            evaluate_request(json!({"user_id": "alice", "action": "summarize"})).to_request(),
        )
        .await;

        let req = test::TestRequest::delete()
            .uri("/api/admission/counters/alice")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["deleted"], 1);

        let req = test::TestRequest::get()
            .uri("/api/admission/status/alice")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["rate_limit"]["current"], 0);
    }

    #[actix_web::test]
    async fn test_ip_limit_throttles_before_handlers() {
        let app = app!(state_with(
            Some(WindowSpec::named(2, 60, "ip")),
            ReleasePolicy::Never
        ));
        let peer: SocketAddr = "10.0.0.7:4000".parse().unwrap();

        for _ in 0..2 {
            let req = test::TestRequest::get()
                .uri("/api/health")
                .peer_addr(peer)
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        }

        let req = test::TestRequest::get()
            .uri("/api/health")
            .peer_addr(peer)
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(header(&res, "X-RateLimit-Limit"), "2");
    }

    #[actix_web::test]
    async fn test_on_success_policy_only_counts_failures() {
        let app = app!(state_with(
            Some(WindowSpec::named(1, 60, "ip")),
            ReleasePolicy::OnSuccess
        ));
        let peer: SocketAddr = "10.0.0.8:4000".parse().unwrap();

        for _ in 0..3 {
            let req = test::TestRequest::get()
                .uri("/api/health")
                .peer_addr(peer)
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        }

        let bad = test::TestRequest::post()
            .uri("/api/admission/usage")
            .peer_addr(peer)
            .set_json(json!({"user_id": ""}))
            .to_request();
        assert_eq!(
            test::call_service(&app, bad).await.status(),
            StatusCode::BAD_REQUEST
        );

        let req = test::TestRequest::get()
            .uri("/api/health")
            .peer_addr(peer)
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
