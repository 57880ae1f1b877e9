//! # Turnstile Core
//!
//! The domain layer of the admission-control subsystem.
//! Plan tiers, window arithmetic, decision types and the ports that
//! infrastructure must implement. No infrastructure dependencies.

pub mod domain;
pub mod error;
pub mod ports;

pub use error::{AdmissionError, PlanError, StoreError};
