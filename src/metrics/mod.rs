//! Metrics and monitoring for the rendezvous pairing service
//!
//! This module provides metrics collection and performance tracking for the
//! pairing pools.

pub mod collector;

pub use collector::{
    AttemptOutcome, MetricsCollector, MetricsTimer, PairingMetrics, PerformanceMetrics,
    QueueMetrics, ServiceMetrics,
};
