//! Plan tiers and their statically typed limits.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::WindowSpec;
use crate::error::PlanError;

/// Subscription level. Ordering follows severity: free < basic < pro < enterprise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Basic,
    Pro,
    Enterprise,
}

/// Whether exhausting the daily quota blocks requests or bills overage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapMode {
    Hard,
    Soft,
}

/// Model families gated separately for AI actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelClass {
    Standard,
    Advanced,
    Premium,
}

/// Per-model multipliers applied to the plan's rate limit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelMultipliers {
    pub standard: f64,
    pub advanced: f64,
    pub premium: f64,
}

/// Everything a tier grants.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanLimits {
    /// Throughput allowance for the `plan:<user>` counter.
    pub rate: WindowSpec,
    pub daily_requests: u64,
    pub daily_tokens: u64,
    pub cap_mode: CapMode,
    pub models: ModelMultipliers,
}

impl PlanTier {
    /// The fixed limits of this tier.
    pub fn limits(self) -> PlanLimits {
        match self {
            PlanTier::Free => PlanLimits {
                rate: WindowSpec::named(10, 86_400, "day"),
                daily_requests: 10,
                daily_tokens: 10_000,
                cap_mode: CapMode::Hard,
                models: ModelMultipliers {
                    standard: 1.0,
                    advanced: 0.0,
                    premium: 0.0,
                },
            },
            PlanTier::Basic => PlanLimits {
                rate: WindowSpec::named(100, 86_400, "day"),
                daily_requests: 100,
                daily_tokens: 100_000,
                cap_mode: CapMode::Hard,
                models: ModelMultipliers {
                    standard: 1.0,
                    advanced: 0.5,
                    premium: 0.0,
                },
            },
            PlanTier::Pro => PlanLimits {
                rate: WindowSpec::named(60, 60, "minute"),
                daily_requests: 2_000,
                daily_tokens: 2_000_000,
                cap_mode: CapMode::Soft,
                models: ModelMultipliers {
                    standard: 1.0,
                    advanced: 0.5,
                    premium: 0.25,
                },
            },
            PlanTier::Enterprise => PlanLimits {
                rate: WindowSpec::named(300, 60, "minute"),
                daily_requests: 20_000,
                daily_tokens: 50_000_000,
                cap_mode: CapMode::Soft,
                models: ModelMultipliers {
                    standard: 1.0,
                    advanced: 1.0,
                    premium: 0.5,
                },
            },
        }
    }

    /// The next tier up, used as the upgrade hint on denials.
    pub fn next(self) -> Option<PlanTier> {
        match self {
            PlanTier::Free => Some(PlanTier::Basic),
            PlanTier::Basic => Some(PlanTier::Pro),
            PlanTier::Pro => Some(PlanTier::Enterprise),
            PlanTier::Enterprise => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Basic => "basic",
            PlanTier::Pro => "pro",
            PlanTier::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanTier {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(PlanTier::Free),
            "basic" => Ok(PlanTier::Basic),
            "pro" => Ok(PlanTier::Pro),
            "enterprise" => Ok(PlanTier::Enterprise),
            other => Err(PlanError::UnknownTier(other.to_string())),
        }
    }
}

impl ModelClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelClass::Standard => "standard",
            ModelClass::Advanced => "advanced",
            ModelClass::Premium => "premium",
        }
    }
}

impl fmt::Display for ModelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelClass {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(ModelClass::Standard),
            "advanced" => Ok(ModelClass::Advanced),
            "premium" => Ok(ModelClass::Premium),
            other => Err(PlanError::UnknownTier(format!("model class {other}"))),
        }
    }
}

impl ModelMultipliers {
    pub fn for_model(&self, model: ModelClass) -> f64 {
        match model {
            ModelClass::Standard => self.standard,
            ModelClass::Advanced => self.advanced,
            ModelClass::Premium => self.premium,
        }
    }
}

impl PlanLimits {
    /// Rate window for AI requests against `model`. A zero limit always denies.
    pub fn model_window(&self, model: ModelClass) -> WindowSpec {
        let multiplier = self.models.for_model(model).max(0.0);
        let limit = (self.rate.limit as f64 * multiplier).floor() as u64;
        WindowSpec {
            limit,
            window_secs: self.rate.window_secs,
            name: Some(format!("ai:{model}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiers_are_ordered_by_severity() {
        assert!(PlanTier::Free < PlanTier::Basic);
        assert!(PlanTier::Basic < PlanTier::Pro);
        assert!(PlanTier::Pro < PlanTier::Enterprise);
    }

    #[test]
    fn test_upgrade_hint_walks_up_until_enterprise() {
        assert_eq!(PlanTier::Free.next(), Some(PlanTier::Basic));
        assert_eq!(PlanTier::Pro.next(), Some(PlanTier::Enterprise));
        assert_eq!(PlanTier::Enterprise.next(), None);
    }

    #[test]
    fn test_free_plan_is_ten_per_day_hard_capped() {
        let limits = PlanTier::Free.limits();
        assert_eq!(limits.rate.limit, 10);
        assert_eq!(limits.rate.window_secs, 86_400);
        assert_eq!(limits.cap_mode, CapMode::Hard);
    }

    #[test]
    fn test_parse_is_case_insensitive_and_rejects_typos() {
        assert_eq!("Pro".parse::<PlanTier>().unwrap(), PlanTier::Pro);
        assert!(matches!(
            "enterprize".parse::<PlanTier>(),
            Err(PlanError::UnknownTier(_))
        ));
    }

    #[test]
    fn test_model_window_applies_multiplier() {
        let pro = PlanTier::Pro.limits();
        assert_eq!(pro.model_window(ModelClass::Standard).limit, 60);
        assert_eq!(pro.model_window(ModelClass::Advanced).limit, 30);
        assert_eq!(pro.model_window(ModelClass::Premium).limit, 15);
        assert_eq!(
            PlanTier::Free.limits().model_window(ModelClass::Premium).limit,
            0
        );
    }
}
