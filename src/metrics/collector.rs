//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the rendezvous pairing
//! service using Prometheus metrics. No exporter is wired up here; callers
//! that want to expose the registry can take it from [`MetricsCollector::registry`].

use crate::filter_level::FilterLevel;
use crate::types::PoolKind;
use anyhow::Result;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of a single pairing attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// A counterpart was found and the session committed
    Matched,
    /// No compatible counterpart was waiting
    NoMatch,
    /// The chosen counterpart was locked by a concurrent attempt
    LostRace,
    /// A handle went stale between selection and commit
    Aborted,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Matched => "matched",
            AttemptOutcome::NoMatch => "no_match",
            AttemptOutcome::LostRace => "lost_race",
            AttemptOutcome::Aborted => "aborted",
        }
    }
}

/// Main metrics collector for the pairing service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Pairing outcome metrics
    pairing_metrics: PairingMetrics,

    /// Queue and session occupancy metrics
    queue_metrics: QueueMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Pairing outcome metrics
#[derive(Clone)]
pub struct PairingMetrics {
    /// Successful pairings by pool and filter level
    pub pairings_total: IntCounterVec,

    /// Pairing attempts by pool and outcome
    pub attempts_total: IntCounterVec,

    /// Participants evicted after the maximum queue time
    pub queue_timeouts_total: IntCounterVec,

    /// Participants purged because their connection was no longer live
    pub stale_connections_total: IntCounterVec,

    /// Notifications that could not be delivered after retry
    pub notification_failures_total: IntCounterVec,
}

/// Queue and session occupancy metrics
#[derive(Clone)]
pub struct QueueMetrics {
    /// Participants currently waiting
    pub participants_waiting: IntGaugeVec,

    /// Sessions currently active
    pub active_sessions: IntGaugeVec,

    /// Time spent waiting before a successful pairing
    pub pairing_wait_seconds: HistogramVec,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Duration of one matchmaking cycle
    pub cycle_duration_seconds: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let pairing_metrics = PairingMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            pairing_metrics,
            queue_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Get service metrics
    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    /// Get pairing metrics
    pub fn pairing(&self) -> &PairingMetrics {
        &self.pairing_metrics
    }

    /// Get queue metrics
    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    /// Get performance metrics
    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Record the outcome of a pairing attempt
    pub fn record_attempt(&self, pool: PoolKind, outcome: AttemptOutcome) {
        self.pairing_metrics
            .attempts_total
            .with_label_values(&[pool.as_str(), outcome.as_str()])
            .inc();
    }

    /// Record a committed pairing and how long each side waited
    pub fn record_pairing(&self, pool: PoolKind, level: FilterLevel, waits: [Duration; 2]) {
        let level_str = level.number().to_string();
        self.pairing_metrics
            .pairings_total
            .with_label_values(&[pool.as_str(), level_str.as_str()])
            .inc();

        for wait in waits {
            self.queue_metrics
                .pairing_wait_seconds
                .with_label_values(&[pool.as_str()])
                .observe(wait.as_secs_f64());
        }
    }

    /// Record a timeout eviction
    pub fn record_queue_timeout(&self, pool: PoolKind) {
        self.pairing_metrics
            .queue_timeouts_total
            .with_label_values(&[pool.as_str()])
            .inc();
    }

    /// Record a stale connection purge
    pub fn record_stale_connection(&self, pool: PoolKind) {
        self.pairing_metrics
            .stale_connections_total
            .with_label_values(&[pool.as_str()])
            .inc();
    }

    /// Record a notification that was dropped
    pub fn record_notification_failure(&self, pool: PoolKind) {
        self.pairing_metrics
            .notification_failures_total
            .with_label_values(&[pool.as_str()])
            .inc();
    }

    /// Update current queue and session occupancy
    pub fn update_occupancy(&self, pool: PoolKind, waiting: usize, sessions: usize) {
        self.queue_metrics
            .participants_waiting
            .with_label_values(&[pool.as_str()])
            .set(waiting as i64);

        self.queue_metrics
            .active_sessions
            .with_label_values(&[pool.as_str()])
            .set(sessions as i64);
    }

    /// Record how long a matchmaking cycle took
    pub fn record_cycle(&self, pool: PoolKind, duration: Duration) {
        self.performance_metrics
            .cycle_duration_seconds
            .with_label_values(&[pool.as_str()])
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("rendezvous_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = IntGauge::new(
            "rendezvous_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("rendezvous_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            health_status,
            component_health,
        })
    }
}

impl PairingMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let pairings_total = IntCounterVec::new(
            Opts::new("rendezvous_pairings_total", "Total successful pairings"),
            &["pool", "level"],
        )?;
        registry.register(Box::new(pairings_total.clone()))?;

        let attempts_total = IntCounterVec::new(
            Opts::new(
                "rendezvous_pairing_attempts_total",
                "Total pairing attempts by outcome",
            ),
            &["pool", "outcome"],
        )?;
        registry.register(Box::new(attempts_total.clone()))?;

        let queue_timeouts_total = IntCounterVec::new(
            Opts::new(
                "rendezvous_queue_timeouts_total",
                "Participants evicted after maximum queue time",
            ),
            &["pool"],
        )?;
        registry.register(Box::new(queue_timeouts_total.clone()))?;

        let stale_connections_total = IntCounterVec::new(
            Opts::new(
                "rendezvous_stale_connections_total",
                "Participants purged because their connection was gone",
            ),
            &["pool"],
        )?;
        registry.register(Box::new(stale_connections_total.clone()))?;

        let notification_failures_total = IntCounterVec::new(
            Opts::new(
                "rendezvous_notification_failures_total",
                "Notifications dropped after retry",
            ),
            &["pool"],
        )?;
        registry.register(Box::new(notification_failures_total.clone()))?;

        Ok(Self {
            pairings_total,
            attempts_total,
            queue_timeouts_total,
            stale_connections_total,
            notification_failures_total,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let participants_waiting = IntGaugeVec::new(
            Opts::new(
                "rendezvous_participants_waiting",
                "Participants currently waiting in queue",
            ),
            &["pool"],
        )?;
        registry.register(Box::new(participants_waiting.clone()))?;

        let active_sessions = IntGaugeVec::new(
            Opts::new("rendezvous_active_sessions", "Sessions currently active"),
            &["pool"],
        )?;
        registry.register(Box::new(active_sessions.clone()))?;

        let pairing_wait_seconds = HistogramVec::new(
            HistogramOpts::new(
                "rendezvous_pairing_wait_seconds",
                "Time waited before a successful pairing",
            )
            .buckets(vec![1.0, 5.0, 15.0, 30.0, 45.0, 60.0, 120.0, 300.0, 900.0]),
            &["pool"],
        )?;
        registry.register(Box::new(pairing_wait_seconds.clone()))?;

        Ok(Self {
            participants_waiting,
            active_sessions,
            pairing_wait_seconds,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let cycle_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "rendezvous_cycle_duration_seconds",
                "Matchmaking cycle duration",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["pool"],
        )?;
        registry.register(Box::new(cycle_duration_seconds.clone()))?;

        Ok(Self {
            cycle_duration_seconds,
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics collector")
    }
}
