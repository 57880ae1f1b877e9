//! Domain types - plan tiers, window arithmetic and decisions.

mod decision;
mod plan;
mod window;

pub use decision::{AdmissionStatus, DenialReason, PermissionDecision, QuotaState, RateLimitResult};
pub use plan::{CapMode, ModelClass, ModelMultipliers, PlanLimits, PlanTier};
pub use window::{DAY_SECS, WindowSpec, bucket_index, bucket_reset_at, counter_key, key_segment};
