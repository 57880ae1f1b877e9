//! HTTP handlers and route configuration.

mod admission;
mod health;

use actix_web::web;

use crate::middleware::IpAdmission;

/// Configure all application routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .wrap(IpAdmission)
            .route("/health", web::get().to(health::health_check))
            .service(
                web::scope("/admission")
                    .route("/evaluate", web::post().to(admission::evaluate))
                    .route("/release", web::post().to(admission::release))
                    .route("/usage", web::post().to(admission::record_usage))
                    .route("/status/{user_id}", web::get().to(admission::status))
                    .route("/counters/{user_id}", web::delete().to(admission::reset)),
            ),
    );
}
