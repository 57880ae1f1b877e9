//! Application configuration loaded from environment variables.

use std::env;
use std::time::Duration;

use turnstile_admission::AdmissionConfig;
use turnstile_core::domain::WindowSpec;

#[cfg(feature = "redis")]
use turnstile_infra::RedisConfig;

use crate::middleware::ReleasePolicy;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Shared store; `None` runs on the in-memory store.
    #[cfg(feature = "redis")]
    pub redis: Option<RedisConfig>,
    pub admission: AdmissionConfig,
    /// Per-address window applied to every `/api` request; `None` disables it.
    pub ip_limit: Option<WindowSpec>,
    pub release_policy: ReleasePolicy,
    pub sweep: SweepConfig,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        #[cfg(feature = "redis")]
        let redis = env::var("REDIS_URL").ok().map(|_| RedisConfig::from_env());

        #[cfg(not(feature = "redis"))]
        if env::var("REDIS_URL").is_ok() {
            tracing::warn!("REDIS_URL is set but the redis feature is disabled, using in-memory store");
        }

        Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            #[cfg(feature = "redis")]
            redis,
            admission: AdmissionConfig::from_env(),
            ip_limit: parse_ip_limit(
                &env::var("IP_RATE_LIMIT").unwrap_or_else(|_| "120/60".to_string()),
            ),
            release_policy: env::var("RELEASE_POLICY")
                .ok()
                .and_then(|v| ReleasePolicy::parse(&v))
                .unwrap_or_default(),
            sweep: SweepConfig::from_env(),
        }
    }
}

/// `off`, `none` or `0` disable the per-address limit.
fn parse_ip_limit(raw: &str) -> Option<WindowSpec> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "off" | "none" | "0" | "" => None,
        other => {
            let spec = WindowSpec::parse(other);
            if spec.is_none() {
                tracing::warn!(value = %raw, "Ignoring malformed IP_RATE_LIMIT");
            }
            spec.map(|s| WindowSpec::named(s.limit, s.window_secs, "ip"))
        }
    }
}

/// TTL sweep schedule.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub enabled: bool,
    /// Six-field cron expression (seconds first).
    pub schedule: String,
    /// TTL given to persistent keys that do not name a window bucket.
    pub fallback_ttl: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: "0 */5 * * * *".to_string(),
            fallback_ttl: Duration::from_secs(25 * 60 * 60),
        }
    }
}

impl SweepConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env::var("SWEEP_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(defaults.enabled),
            schedule: env::var("SWEEP_SCHEDULE").unwrap_or(defaults.schedule),
            fallback_ttl: env::var("SWEEP_FALLBACK_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.fallback_ttl),
        }
    }
}
