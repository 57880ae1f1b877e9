//! Static plan assignments, for deployments without an entitlement service.

use std::collections::HashMap;

use async_trait::async_trait;

use turnstile_core::PlanError;
use turnstile_core::domain::PlanTier;
use turnstile_core::ports::PlanResolver;

/// Resolves plans from a fixed user -> tier table, falling back to a default tier.
#[derive(Debug, Clone)]
pub struct InMemoryPlanResolver {
    assignments: HashMap<String, PlanTier>,
    default_tier: PlanTier,
}

impl InMemoryPlanResolver {
    pub fn new(default_tier: PlanTier) -> Self {
        Self {
            assignments: HashMap::new(),
            default_tier,
        }
    }

    pub fn with_assignment(mut self, user_id: impl Into<String>, tier: PlanTier) -> Self {
        self.assignments.insert(user_id.into(), tier);
        self
    }

    /// Parse `alice=pro,bob=basic`. Entries naming an unknown tier are an error
    /// rather than silently falling back to the default.
    pub fn parse(raw: &str, default_tier: PlanTier) -> Result<Self, PlanError> {
        let mut resolver = Self::new(default_tier);
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (user, tier) = entry
                .split_once('=')
                .ok_or_else(|| PlanError::Lookup(format!("malformed plan assignment: {entry}")))?;
            resolver
                .assignments
                .insert(user.trim().to_string(), tier.parse()?);
        }
        Ok(resolver)
    }

    /// Load from `PLAN_ASSIGNMENTS` and `DEFAULT_PLAN`.
    pub fn from_env() -> Result<Self, PlanError> {
        let default_tier = match std::env::var("DEFAULT_PLAN") {
            Ok(raw) => raw.parse()?,
            Err(_) => PlanTier::Free,
        };
        let raw = std::env::var("PLAN_ASSIGNMENTS").unwrap_or_default();
        Self::parse(&raw, default_tier)
    }
}

impl Default for InMemoryPlanResolver {
    fn default() -> Self {
        Self::new(PlanTier::Free)
    }
}

#[async_trait]
impl PlanResolver for InMemoryPlanResolver {
    async fn plan_tier(&self, user_id: &str) -> Result<PlanTier, PlanError> {
        Ok(self
            .assignments
            .get(user_id)
            .copied()
            .unwrap_or(self.default_tier))
    }
}
