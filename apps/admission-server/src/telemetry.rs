//! Log subscriber setup for the admission server.
//!
//! Admission decisions are logged by `turnstile_admission` with structured
//! fields (`user_id`, `plan`, `window`, `reset_at`); the JSON format keeps
//! them as separate keys for log pipelines.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "info,admission_server=debug,turnstile_admission=debug";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl LogFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" => Some(LogFormat::Pretty),
            "compact" | "text" => Some(LogFormat::Compact),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub format: LogFormat,
    /// Used when `RUST_LOG` is unset.
    pub default_filter: String,
    /// Instance name stamped on the startup line.
    pub instance: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            default_filter: DEFAULT_FILTER.to_string(),
            instance: "turnstile".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// `LOG_FORMAT` (pretty, compact, json), `ADMISSION_LOG_FILTER`, `INSTANCE_NAME`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let format = match std::env::var("LOG_FORMAT") {
            Ok(raw) => LogFormat::parse(&raw).unwrap_or_else(|| {
                eprintln!("Unknown LOG_FORMAT {raw:?}, using pretty");
                LogFormat::Pretty
            }),
            Err(_) => defaults.format,
        };
        Self {
            format,
            default_filter: std::env::var("ADMISSION_LOG_FILTER")
                .unwrap_or(defaults.default_filter),
            instance: std::env::var("INSTANCE_NAME").unwrap_or(defaults.instance),
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.default_filter))
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

pub fn init_telemetry(config: &TelemetryConfig) {
    let registry = tracing_subscriber::registry().with(config.env_filter());
    match config.format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).init(),
        LogFormat::Compact => registry.with(tracing_subscriber::fmt::layer().compact()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .init(),
    }

    tracing::info!(
        instance = %config.instance,
        format = ?config.format,
        "Admission logging initialized"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse(" text "), Some(LogFormat::Compact));
        assert_eq!(LogFormat::parse("pretty"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("xml"), None);
    }
}
