//! # Turnstile Infrastructure
//!
//! Concrete implementations of the ports defined in `turnstile-core`.
//!
//! ## Feature Flags
//!
//! - `full` (default) - All features enabled
//! - `minimal` - No external dependencies, in-memory only
//! - `redis` - Redis-backed counter store

pub mod plan;
pub mod store;

// Re-exports - In-Memory
pub use plan::InMemoryPlanResolver;
pub use store::InMemoryCounterStore;

// Re-exports - Redis
#[cfg(feature = "redis")]
pub use store::{RedisConfig, RedisCounterStore};
