//! Configuration management for the rendezvous service
//!
//! This module handles configuration loading from environment variables and
//! TOML files, validation, and default values for the pairing service.

pub mod app;

// Re-export commonly used types
pub use app::{parse_pool_list, validate_config, AppConfig, MatchmakingSettings, ServiceSettings};
