//! Ports - trait definitions for external dependencies.
//! These are the "interfaces" that infrastructure must implement.

mod clock;
mod plan;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use plan::PlanResolver;
pub use store::{CounterStore, KeyTtl};
