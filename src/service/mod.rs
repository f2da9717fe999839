//! Service layer for the rendezvous pairing service
//!
//! This module contains the application state that owns the pool registry,
//! service coordination and health reporting.

pub mod app;
pub mod health;

pub use app::{AppState, ServiceError};
pub use health::{ComponentCheck, HealthCheck, HealthStatus, ServiceStats};
