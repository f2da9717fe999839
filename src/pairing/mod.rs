//! Pairing engine for the rendezvous service
//!
//! This module holds everything one pool needs to pair participants: the
//! waiting queue, the pairing lock, compatibility scoring and the manager
//! that drives them.

pub mod lock;
pub mod manager;
pub mod matching;
pub mod participant;
pub mod queue;

// Re-export commonly used types
pub use lock::PairingLock;
pub use manager::{
    CycleSummary, ManagerSnapshot, PairingManager, PairingManagerConfig, PairingManagerStats,
};
pub use matching::{find_best_match, BestMatch, CompatibilityScorer, MatchResult, PreferenceScorer};
pub use participant::{PairingInfo, Participant, Session};
pub use queue::{QueueEntry, QueueStats, WaitingQueue};
