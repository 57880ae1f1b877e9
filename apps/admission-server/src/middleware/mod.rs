//! Middleware modules.

pub mod admission;
pub mod error;

pub use admission::{IpAdmission, ReleasePolicy};
pub use error::{AppError, AppResult};
