//! Rendezvous - anonymous one-to-one pairing engine
//!
//! This crate pairs waiting participants for text, audio or video sessions,
//! relaxing preference filters the longer they wait. Each pool runs its own
//! manager with a priority queue, a compatibility scorer and a pairing lock
//! that keeps any participant out of two concurrent pairings.

pub mod config;
pub mod error;
pub mod filter_level;
pub mod metrics;
pub mod pairing;
pub mod service;
pub mod transport;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{PairingError, Result};
pub use types::*;

// Re-export key components
pub use filter_level::{FilterLevel, FilterLevelPolicy};
pub use pairing::{PairingManager, PairingManagerConfig};
pub use transport::{ConnectionHandle, Notification, PoolCommand};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
