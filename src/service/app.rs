//! Main application state and service coordination
//!
//! This module contains the AppState that owns one pairing manager per
//! enabled pool, the shared metrics collector and the background tasks of
//! the running service.

use crate::config::AppConfig;
use crate::metrics::MetricsCollector;
use crate::pairing::{ManagerSnapshot, PairingManager, PairingManagerConfig};
use crate::types::PoolKind;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    /// One independent manager per enabled pool
    managers: HashMap<PoolKind, PairingManager>,

    /// Metrics shared by every pool, labelled by pool
    metrics_collector: Arc<MetricsCollector>,

    /// Background task handles
    background_tasks: Vec<JoinHandle<()>>,

    /// Service status
    is_running: Arc<RwLock<bool>>,

    started_at: Instant,
}

impl AppState {
    /// Initialize the application with all pools
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing rendezvous pairing service");
        info!(
            "Configuration: service={}, pools={:?}",
            config.service.name, config.matchmaking.enabled_pools
        );

        crate::config::validate_config(&config).map_err(|e| ServiceError::Configuration {
            message: e.to_string(),
        })?;

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let managers = config
            .matchmaking
            .enabled_pools
            .iter()
            .map(|pool| {
                let manager_config = PairingManagerConfig::from_settings(*pool, &config.matchmaking);
                info!(
                    "Initialized {} pool - thresholds {:?}/{:?}/{:?}, max wait {:?}",
                    pool,
                    manager_config.policy.level_1_timeout,
                    manager_config.policy.level_2_timeout,
                    manager_config.policy.level_3_timeout,
                    manager_config.policy.max_queue_time
                );
                (
                    *pool,
                    PairingManager::with_metrics(manager_config, metrics_collector.clone()),
                )
            })
            .collect();

        Ok(Self {
            config,
            managers,
            metrics_collector,
            background_tasks: Vec::new(),
            is_running: Arc::new(RwLock::new(false)),
            started_at: Instant::now(),
        })
    }

    /// Start every pool's cycle and the service health task
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting rendezvous pairing service");

        *self.is_running.write().await = true;

        for (pool, manager) in &self.managers {
            manager.start().map_err(|e| ServiceError::Initialization {
                message: format!("Failed to start {} pool: {}", pool, e),
            })?;
        }

        self.start_background_tasks();

        info!(
            "✅ Rendezvous pairing service started with {} pools",
            self.managers.len()
        );
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of rendezvous service");

        *self.is_running.write().await = false;

        self.stop_background_tasks();

        for (pool, manager) in &self.managers {
            manager.shutdown().map_err(|e| ServiceError::BackgroundTask {
                message: format!("Failed to shut down {} pool: {}", pool, e),
            })?;
        }

        for snapshot in self.snapshots().map_err(|e| ServiceError::BackgroundTask {
            message: format!("Failed to get final stats: {}", e),
        })? {
            info!(
                "Final {} pool statistics: {:?}",
                snapshot.pool, snapshot.stats
            );
        }
        info!("✅ Rendezvous service shutdown completed");

        Ok(())
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Manager for one pool, if it is enabled
    pub fn manager(&self, pool: PoolKind) -> Option<&PairingManager> {
        self.managers.get(&pool)
    }

    pub fn managers(&self) -> &HashMap<PoolKind, PairingManager> {
        &self.managers
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics_collector.clone()
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Snapshots of every pool in a stable order
    pub fn snapshots(&self) -> Result<Vec<ManagerSnapshot>> {
        let mut pools: Vec<_> = self.managers.keys().copied().collect();
        pools.sort();
        pools
            .into_iter()
            .filter_map(|pool| self.managers.get(&pool))
            .map(|manager| manager.snapshot())
            .collect()
    }

    fn start_background_tasks(&mut self) {
        let interval_duration = self.config.health_log_interval();
        info!(
            "Starting health metrics task ({}s interval)...",
            interval_duration.as_secs()
        );

        let health_metrics_task = {
            let metrics_collector = self.metrics_collector.clone();
            let managers: Vec<PairingManager> = self.managers.values().cloned().collect();
            let is_running = self.is_running.clone();
            let started_at = self.started_at;

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(interval_duration);
                info!("Health metrics task started");

                while *is_running.read().await {
                    interval.tick().await;

                    let uptime_seconds = started_at.elapsed().as_secs() as i64;
                    metrics_collector
                        .service()
                        .uptime_seconds
                        .set(uptime_seconds);

                    let mut all_healthy = true;
                    for manager in &managers {
                        let component = format!("{}_pool", manager.pool());
                        match manager.snapshot() {
                            Ok(snapshot) => {
                                let healthy = snapshot.running;
                                all_healthy &= healthy;
                                metrics_collector.update_component_health(&component, healthy);
                                debug!(
                                    "{} pool - waiting: {}, sessions: {}, pairings: {}",
                                    snapshot.pool,
                                    snapshot.queue.size,
                                    snapshot.active_sessions,
                                    snapshot.stats.successful_pairings
                                );
                            }
                            Err(e) => {
                                all_healthy = false;
                                metrics_collector.update_component_health(&component, false);
                                warn!("Failed to snapshot {} pool: {}", manager.pool(), e);
                            }
                        }
                    }

                    // 2 = healthy, 1 = degraded
                    metrics_collector.update_health_status(if all_healthy { 2 } else { 1 });
                }

                info!("Health metrics task stopped");
            })
        };

        self.background_tasks.push(health_metrics_task);
    }

    fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            debug!("No background tasks to stop");
            return;
        }

        for (i, task) in self.background_tasks.drain(..).enumerate() {
            debug!("Aborting background task {}/{}", i + 1, task_count);
            task.abort();
        }

        info!("✅ All {} background tasks stopped", task_count);
    }
}
