//! Plan resolver implementations.

mod memory;

pub use memory::InMemoryPlanResolver;
