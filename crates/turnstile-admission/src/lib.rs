//! # Turnstile Admission
//!
//! Admission control written against the ports in `turnstile-core`:
//!
//! - [`WindowCounter`] - one fixed-window counter per identifier and window
//! - [`RateLimitEngine`] - single, multi-window and plan-based throughput checks (fails open)
//! - [`QuotaTracker`] - daily request and token usage per plan (fails closed by default)
//! - [`PermissionGate`] - composes both into one allow/deny decision
//! - [`TtlSweeper`] - repairs counter keys that lost their TTL

pub mod config;
pub mod gate;
pub mod quota;
pub mod rate_limit;
pub mod sweep;
pub mod window;

pub use config::AdmissionConfig;
pub use gate::{Action, PermissionGate};
pub use quota::{QuotaFailurePolicy, QuotaTracker};
pub use rate_limit::RateLimitEngine;
pub use sweep::{SweepReport, TtlSweeper};
pub use window::WindowCounter;
