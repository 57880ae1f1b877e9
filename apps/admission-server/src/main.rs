//! # Turnstile Admission Server
//!
//! The main entry point for the Actix-web HTTP server.

use actix_web::{App, HttpServer, web};
use tracing_actix_web::TracingLogger;

mod background;
mod config;
mod handlers;
mod middleware;
mod state;
mod telemetry;

use config::AppConfig;
use state::AppState;
use telemetry::TelemetryConfig;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    telemetry::init_telemetry(&TelemetryConfig::from_env());

    let config = AppConfig::from_env();

    tracing::info!(
        host = %config.host,
        port = config.port,
        release_policy = ?config.release_policy,
        "Starting Turnstile admission server"
    );

    let state = AppState::new(&config)
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?;

    #[cfg(feature = "scheduler")]
    let _sweeper = background::start_sweeper(&config.sweep, state.sweeper(&config))
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?;

    HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(handlers::configure_routes)
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}
