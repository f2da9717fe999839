//! Main application configuration
//!
//! This module defines the primary configuration structures for the rendezvous
//! pairing service, including environment variable loading and validation.

use crate::filter_level::FilterLevelPolicy;
use crate::types::PoolKind;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub matchmaking: MatchmakingSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
    /// How often pool health is logged, in seconds
    pub health_log_interval_seconds: u64,
}

/// Matchmaking-specific settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingSettings {
    pub level_1_timeout_ms: u64,
    pub level_2_timeout_ms: u64,
    pub level_3_timeout_ms: u64,
    /// Wait after which a participant is evicted
    pub max_queue_time_ms: u64,
    /// Interval between matchmaking cycles
    pub cycle_interval_ms: u64,
    /// Delay before retrying a failed pairing notification
    pub notification_retry_delay_ms: u64,
    pub enabled_pools: Vec<PoolKind>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "rendezvous".to_string(),
            log_level: "info".to_string(),
            shutdown_timeout_seconds: 10,
            health_log_interval_seconds: 30,
        }
    }
}

impl Default for MatchmakingSettings {
    fn default() -> Self {
        Self {
            level_1_timeout_ms: 15_000,
            level_2_timeout_ms: 30_000,
            level_3_timeout_ms: 45_000,
            max_queue_time_ms: 15 * 60 * 1000,
            cycle_interval_ms: 1000,
            notification_retry_delay_ms: 100,
            enabled_pools: PoolKind::ALL.to_vec(),
        }
    }
}

impl MatchmakingSettings {
    /// Filter-level thresholds as a policy
    pub fn filter_policy(&self) -> FilterLevelPolicy {
        FilterLevelPolicy {
            level_1_timeout: Duration::from_millis(self.level_1_timeout_ms),
            level_2_timeout: Duration::from_millis(self.level_2_timeout_ms),
            level_3_timeout: Duration::from_millis(self.level_3_timeout_ms),
            max_queue_time: Duration::from_millis(self.max_queue_time_ms),
        }
    }

    /// Get cycle interval as Duration
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }

    /// Get notification retry delay as Duration
    pub fn notification_retry_delay(&self) -> Duration {
        Duration::from_millis(self.notification_retry_delay_ms)
    }
}

/// Parse a comma separated list of pool kinds
pub fn parse_pool_list(value: &str) -> Result<Vec<PoolKind>> {
    let mut pools = Vec::new();
    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let pool = PoolKind::from_str(part).map_err(|e| anyhow!("{}", e))?;
        if !pools.contains(&pool) {
            pools.push(pool);
        }
    }
    Ok(pools)
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("Invalid {} value: {}", name, value))
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key/value source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.apply_overrides(lookup)?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        config.apply_overrides(|key| env::var(key).ok())?;
        validate_config(&config)?;
        Ok(config)
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Service settings
        if let Some(name) = lookup("SERVICE_NAME") {
            self.service.name = name;
        }
        if let Some(log_level) = lookup("LOG_LEVEL") {
            self.service.log_level = log_level;
        }
        if let Some(timeout) = lookup("SHUTDOWN_TIMEOUT_SECONDS") {
            self.service.shutdown_timeout_seconds =
                parse_var("SHUTDOWN_TIMEOUT_SECONDS", &timeout)?;
        }
        if let Some(interval) = lookup("HEALTH_LOG_INTERVAL_SECONDS") {
            self.service.health_log_interval_seconds =
                parse_var("HEALTH_LOG_INTERVAL_SECONDS", &interval)?;
        }

        // Matchmaking settings
        if let Some(timeout) = lookup("FILTER_LEVEL_1_TIMEOUT") {
            self.matchmaking.level_1_timeout_ms = parse_var("FILTER_LEVEL_1_TIMEOUT", &timeout)?;
        }
        if let Some(timeout) = lookup("FILTER_LEVEL_2_TIMEOUT") {
            self.matchmaking.level_2_timeout_ms = parse_var("FILTER_LEVEL_2_TIMEOUT", &timeout)?;
        }
        if let Some(timeout) = lookup("FILTER_LEVEL_3_TIMEOUT") {
            self.matchmaking.level_3_timeout_ms = parse_var("FILTER_LEVEL_3_TIMEOUT", &timeout)?;
        }
        if let Some(max) = lookup("MAX_QUEUE_TIME") {
            self.matchmaking.max_queue_time_ms = parse_var("MAX_QUEUE_TIME", &max)?;
        }
        if let Some(interval) = lookup("QUEUE_PROCESSING_INTERVAL") {
            self.matchmaking.cycle_interval_ms = parse_var("QUEUE_PROCESSING_INTERVAL", &interval)?;
        }
        if let Some(delay) = lookup("NOTIFICATION_RETRY_DELAY_MS") {
            self.matchmaking.notification_retry_delay_ms =
                parse_var("NOTIFICATION_RETRY_DELAY_MS", &delay)?;
        }
        if let Some(pools) = lookup("ENABLED_POOLS") {
            self.matchmaking.enabled_pools = parse_pool_list(&pools)
                .map_err(|e| anyhow!("Invalid ENABLED_POOLS value: {} ({})", pools, e))?;
        }

        Ok(())
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    /// Get health log interval as Duration
    pub fn health_log_interval(&self) -> Duration {
        Duration::from_secs(self.service.health_log_interval_seconds)
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    // Validate timeouts
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }
    if config.service.health_log_interval_seconds == 0 {
        return Err(anyhow!("Health log interval must be greater than 0"));
    }

    // Validate matchmaking settings
    if config.matchmaking.cycle_interval_ms == 0 {
        return Err(anyhow!("Queue processing interval must be greater than 0"));
    }
    if config.matchmaking.enabled_pools.is_empty() {
        return Err(anyhow!("At least one pool must be enabled"));
    }
    config.matchmaking.filter_policy().validate()?;

    Ok(())
}
