//! Domain services for the attendance export pipeline.

pub mod csv;
pub mod export_service;
pub mod rate_limiter;
pub mod validation;

pub use export_service::{ExportService, ExportStream};
pub use rate_limiter::{RateLimitDecision, RateLimiter};
