//! Application state - shared across all handlers.

use std::sync::Arc;

use turnstile_admission::{AdmissionConfig, PermissionGate, TtlSweeper};
use turnstile_core::StoreError;
use turnstile_core::domain::{PlanTier, WindowSpec};
use turnstile_core::ports::{Clock, CounterStore, PlanResolver, SystemClock};
use turnstile_infra::{InMemoryCounterStore, InMemoryPlanResolver};

#[cfg(feature = "redis")]
use turnstile_infra::RedisCounterStore;

use crate::config::AppConfig;
use crate::middleware::ReleasePolicy;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<PermissionGate>,
    pub plans: Arc<dyn PlanResolver>,
    pub store: Arc<dyn CounterStore>,
    pub clock: Arc<dyn Clock>,
    pub ip_limit: Option<WindowSpec>,
    pub release_policy: ReleasePolicy,
}

impl AppState {
    /// Build the application state with appropriate implementations.
    pub async fn new(config: &AppConfig) -> Result<Self, StoreError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = build_store(config, clock.clone()).await?;

        let plans: Arc<dyn PlanResolver> = match InMemoryPlanResolver::from_env() {
            Ok(resolver) => Arc::new(resolver),
            Err(e) => {
                tracing::error!(error = %e, "Invalid plan assignments, every user resolves to free");
                Arc::new(InMemoryPlanResolver::default())
            }
        };

        let state = Self::with_parts(
            store,
            clock,
            plans,
            &config.admission,
            config.ip_limit.clone(),
            config.release_policy,
        );
        tracing::info!("Application state initialized");
        Ok(state)
    }

    pub fn with_parts(
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        plans: Arc<dyn PlanResolver>,
        admission: &AdmissionConfig,
        ip_limit: Option<WindowSpec>,
        release_policy: ReleasePolicy,
    ) -> Self {
        let gate = Arc::new(PermissionGate::new(store.clone(), clock.clone(), admission));
        Self {
            gate,
            plans,
            store,
            clock,
            ip_limit,
            release_policy,
        }
    }

    /// Plan of `user_id`; resolver failures fall back to the lowest tier.
    pub async fn plan_for(&self, user_id: &str) -> PlanTier {
        match self.plans.plan_tier(user_id).await {
            Ok(tier) => tier,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Plan lookup failed, using free");
                PlanTier::Free
            }
        }
    }

    #[cfg_attr(not(feature = "scheduler"), allow(dead_code))]
    pub fn sweeper(&self, config: &AppConfig) -> Arc<TtlSweeper> {
        Arc::new(TtlSweeper::new(
            self.store.clone(),
            self.clock.clone(),
            config.admission.rate_key_prefix.clone(),
            config.admission.quota_key_prefix.clone(),
            config.sweep.fallback_ttl,
        ))
    }
}

#[cfg(feature = "redis")]
async fn build_store(
    config: &AppConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn CounterStore>, StoreError> {
    let Some(redis) = &config.redis else {
        tracing::warn!("REDIS_URL not set. Counting in process memory (single instance only).");
        return Ok(Arc::new(InMemoryCounterStore::with_clock(clock)));
    };

    match RedisCounterStore::new(redis.clone()).await {
        Ok(store) => Ok(Arc::new(store)),
        Err(e) if redis.fallback_to_memory => {
            tracing::error!(
                error = %e,
                "Failed to connect to Redis. Using in-memory fallback."
            );
            Ok(Arc::new(InMemoryCounterStore::with_clock(clock)))
        }
        Err(e) => Err(e),
    }
}

#[cfg(not(feature = "redis"))]
async fn build_store(
    _config: &AppConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn CounterStore>, StoreError> {
    tracing::info!("Running without redis feature - using in-memory counter store");
    Ok(Arc::new(InMemoryCounterStore::with_clock(clock)))
}
