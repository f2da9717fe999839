//! Dual-party pairing lock
//!
//! Guarantees that at most one in-flight pairing attempt touches any given
//! participant. Both identities are locked together or not at all, and each
//! entry records its counterpart so that releasing one side frees the other.

use crate::types::ParticipantId;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Mutual exclusion over participant identities
#[derive(Debug, Default)]
pub struct PairingLock {
    /// Locked identity -> counterpart it is being paired with
    entries: Mutex<HashMap<ParticipantId, ParticipantId>>,
}

impl PairingLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<ParticipantId, ParticipantId>> {
        // Every mutation below leaves the map consistent, so a poisoned guard
        // is still safe to reuse.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock both identities atomically.
    ///
    /// Fails without side effect if either identity is blank, the two are the
    /// same, or either is already locked.
    pub fn try_acquire(&self, a: &str, b: &str) -> bool {
        if a.trim().is_empty() || b.trim().is_empty() {
            warn!("Rejected pairing lock with blank identity - a: '{}', b: '{}'", a, b);
            return false;
        }
        if a == b {
            warn!("Rejected pairing lock on identical identities: '{}'", a);
            return false;
        }

        let mut entries = self.entries();
        if entries.contains_key(a) || entries.contains_key(b) {
            debug!("Pairing lock busy for '{}' <-> '{}'", a, b);
            return false;
        }

        entries.insert(a.to_string(), b.to_string());
        entries.insert(b.to_string(), a.to_string());
        debug!("Acquired pairing lock for '{}' <-> '{}'", a, b);
        true
    }

    /// Release both identities. Idempotent.
    pub fn release(&self, a: &str, b: &str) {
        let mut entries = self.entries();
        for id in [a, b] {
            if let Some(counterpart) = entries.remove(id) {
                if entries.get(&counterpart).map(String::as_str) == Some(id) {
                    entries.remove(&counterpart);
                }
            }
        }
    }

    /// Release one identity and whichever counterpart it was locked with
    pub fn release_one(&self, id: &str) {
        let mut entries = self.entries();
        if let Some(counterpart) = entries.remove(id) {
            if entries.get(&counterpart).map(String::as_str) == Some(id) {
                entries.remove(&counterpart);
            }
            debug!("Released pairing lock for '{}' and '{}'", id, counterpart);
        }
    }

    pub fn is_locked(&self, id: &str) -> bool {
        self.entries().contains_key(id)
    }

    /// Snapshot of all currently locked identities
    pub fn locked_identities(&self) -> HashSet<ParticipantId> {
        self.entries().keys().cloned().collect()
    }

    pub fn locked_count(&self) -> usize {
        self.entries().len()
    }

    /// Drop every lock entry. Used on shutdown.
    pub fn release_all(&self) -> usize {
        let mut entries = self.entries();
        let released = entries.len();
        entries.clear();
        if released > 0 {
            warn!("Force-released {} pairing lock entries", released);
        }
        released
    }
}
