//! Background jobs.

#[cfg(feature = "scheduler")]
mod scheduler;

#[cfg(feature = "scheduler")]
pub use scheduler::start_sweeper;
