//! Admission configuration loaded from environment variables.

use std::collections::HashMap;
use std::time::Duration;

use turnstile_core::domain::WindowSpec;

use crate::quota::QuotaFailurePolicy;

/// Admission configuration.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Prefix for fixed-window counter keys
    pub rate_key_prefix: String,
    /// Prefix for daily quota keys
    pub quota_key_prefix: String,
    /// What the quota tracker answers while the store is down
    pub quota_failure_policy: QuotaFailurePolicy,
    /// Usage percentage at which quota state raises `warning`
    pub warning_percent: f64,
    /// TTL of daily quota keys; longer than a day to absorb timezone skew
    pub quota_ttl: Duration,
    /// Burst windows per action name, all of which must allow
    pub action_limits: HashMap<String, Vec<WindowSpec>>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            rate_key_prefix: "ratelimit".to_string(),
            quota_key_prefix: "quota".to_string(),
            quota_failure_policy: QuotaFailurePolicy::FailClosed,
            warning_percent: 80.0,
            quota_ttl: Duration::from_secs(25 * 60 * 60),
            action_limits: HashMap::new(),
        }
    }
}

impl AdmissionConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let action_limits = std::env::var("ACTION_LIMITS")
            .map(|raw| parse_action_limits(&raw))
            .unwrap_or_else(|_| parse_action_limits("chat=10/60,100/3600"));

        Self {
            rate_key_prefix: std::env::var("RATE_LIMIT_KEY_PREFIX")
                .unwrap_or(defaults.rate_key_prefix),
            quota_key_prefix: std::env::var("QUOTA_KEY_PREFIX")
                .unwrap_or(defaults.quota_key_prefix),
            quota_failure_policy: std::env::var("QUOTA_FAILURE_POLICY")
                .ok()
                .and_then(|v| QuotaFailurePolicy::parse(&v))
                .unwrap_or(defaults.quota_failure_policy),
            warning_percent: std::env::var("QUOTA_WARNING_PERCENT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.warning_percent),
            quota_ttl: defaults.quota_ttl,
            action_limits,
        }
    }

    pub fn with_action(mut self, action: impl Into<String>, windows: Vec<WindowSpec>) -> Self {
        self.action_limits.insert(action.into(), windows);
        self
    }
}

/// Parse `chat=10/60,100/3600;report=5/60` into per-action burst windows.
///
/// Malformed windows are skipped with a warning rather than failing startup.
pub fn parse_action_limits(raw: &str) -> HashMap<String, Vec<WindowSpec>> {
    let mut limits = HashMap::new();

    for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((action, windows)) = entry.split_once('=') else {
            tracing::warn!(entry = %entry, "Ignoring action limit without '='");
            continue;
        };

        let windows: Vec<WindowSpec> = windows
            .split(',')
            .filter_map(|w| {
                let spec = WindowSpec::parse(w);
                if spec.is_none() {
                    tracing::warn!(action = %action, window = %w, "Ignoring malformed window");
                }
                spec
            })
            .map(|spec| {
                let name = window_name(spec.window_secs);
                WindowSpec::named(spec.limit, spec.window_secs, name)
            })
            .collect();

        if !windows.is_empty() {
            limits.insert(action.trim().to_string(), windows);
        }
    }

    limits
}

fn window_name(window_secs: u64) -> String {
    match window_secs {
        1 => "second".to_string(),
        60 => "minute".to_string(),
        3_600 => "hour".to_string(),
        86_400 => "day".to_string(),
        secs => format!("{secs}s"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_action_limits() {
        let limits = parse_action_limits("chat=10/60,100/3600; report=5/60");
        assert_eq!(
            limits["chat"],
            vec![
                WindowSpec::named(10, 60, "minute"),
                WindowSpec::named(100, 3600, "hour")
            ]
        );
        assert_eq!(limits["report"], vec![WindowSpec::named(5, 60, "minute")]);
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let limits = parse_action_limits("chat=10/60,oops;broken;empty=x/y");
        assert_eq!(limits.len(), 1);
        assert_eq!(limits["chat"].len(), 1);
    }

    #[test]
    fn test_defaults_fail_closed_with_25h_quota_ttl() {
        let config = AdmissionConfig::default();
        assert_eq!(config.quota_failure_policy, QuotaFailurePolicy::FailClosed);
        assert_eq!(config.quota_ttl, Duration::from_secs(90_000));
        assert_eq!(config.warning_percent, 80.0);
    }
}
