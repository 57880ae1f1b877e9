use async_trait::async_trait;

use crate::domain::PlanTier;
use crate::error::PlanError;

/// Plan resolver trait - read-only entitlement lookup.
///
/// The result is treated as authoritative for one evaluation.
#[async_trait]
pub trait PlanResolver: Send + Sync {
    async fn plan_tier(&self, user_id: &str) -> Result<PlanTier, PlanError>;
}
