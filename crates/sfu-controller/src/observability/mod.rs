//! Observability module for the SFU controller.
//!
//! Provides metrics definitions and the health probe router.

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState, ReadinessStatus};
