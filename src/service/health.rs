//! Health checks and status reporting
//!
//! This module builds a health report for the rendezvous service from the
//! pool managers' snapshots. It backs the `--health-check` flag and the
//! periodic status log.

use crate::pairing::ManagerSnapshot;
use crate::service::app::AppState;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Value exported on the health gauge
    pub fn as_metric(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    fn worst(self, other: HealthStatus) -> HealthStatus {
        if other.as_metric() < self.as_metric() {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// One entry per pool
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Optional error message if not healthy
    pub message: Option<String>,
}

/// Totals across all pools
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    pub participants_online: usize,
    pub participants_waiting: usize,
    pub active_sessions: usize,
    pub pairings_total: u64,
    pub timeouts_total: u64,
    pub uptime_info: String,
}

impl ServiceStats {
    fn add(&mut self, snapshot: &ManagerSnapshot) {
        self.participants_online += snapshot.online.total;
        self.participants_waiting += snapshot.queue.size;
        self.active_sessions += snapshot.active_sessions;
        self.pairings_total += snapshot.stats.successful_pairings;
        self.timeouts_total += snapshot.stats.timeouts;
    }
}

impl HealthCheck {
    /// Check every pool of the service
    pub async fn check(app_state: &AppState) -> Result<Self> {
        let running = app_state.is_running().await;
        let mut status = HealthStatus::Healthy;
        let mut checks = Vec::new();
        let mut stats = ServiceStats::default();

        let mut pools: Vec<_> = app_state.managers().keys().copied().collect();
        pools.sort();

        for pool in pools {
            let Some(manager) = app_state.manager(pool) else {
                continue;
            };
            let name = format!("{}_pool", pool);

            let check = match manager.snapshot() {
                Ok(snapshot) => {
                    stats.add(&snapshot);
                    if running && !snapshot.running {
                        ComponentCheck {
                            name,
                            status: HealthStatus::Degraded,
                            message: Some("Matchmaking cycle is not running".to_string()),
                        }
                    } else {
                        ComponentCheck {
                            name,
                            status: HealthStatus::Healthy,
                            message: None,
                        }
                    }
                }
                Err(e) => {
                    error!("Snapshot of {} pool failed: {}", pool, e);
                    ComponentCheck {
                        name,
                        status: HealthStatus::Unhealthy,
                        message: Some(format!("Snapshot failed: {}", e)),
                    }
                }
            };

            status = status.worst(check.status.clone());
            checks.push(check);
        }

        stats.uptime_info = format!(
            "Up {}s, {} pools",
            app_state.uptime().as_secs(),
            checks.len()
        );

        Ok(HealthCheck {
            status,
            service: app_state.config().service.name.clone(),
            version: crate::VERSION.to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
