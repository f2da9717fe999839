//! Test fixtures and recording handles for integration testing

#![allow(dead_code)]

use rendezvous::error::{PairingError, Result};
use rendezvous::pairing::{PairingManager, PairingManagerConfig};
use rendezvous::transport::{ConnectionHandle, Notification};
use rendezvous::types::{PoolKind, ProfileRequest};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Connection handle that records every delivered notification
#[derive(Debug, Default)]
pub struct RecordingHandle {
    received: Mutex<Vec<Notification>>,
    closed: AtomicBool,
}

impl RecordingHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All notifications delivered so far
    pub fn received(&self) -> Vec<Notification> {
        self.received
            .lock()
            .map(|received| received.clone())
            .unwrap_or_default()
    }

    /// Take and clear the recorded notifications
    pub fn take(&self) -> Vec<Notification> {
        self.received
            .lock()
            .map(|mut received| std::mem::take(&mut *received))
            .unwrap_or_default()
    }

    /// Count notifications of one kind, e.g. `"pairingSuccess"`
    pub fn count(&self, kind: &str) -> usize {
        self.received()
            .iter()
            .filter(|notification| notification.kind() == kind)
            .count()
    }

    /// Most recent notification of one kind
    pub fn last(&self, kind: &str) -> Option<Notification> {
        self.received()
            .into_iter()
            .rev()
            .find(|notification| notification.kind() == kind)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl ConnectionHandle for RecordingHandle {
    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn deliver(&self, notification: Notification) -> Result<()> {
        if !self.is_connected() {
            return Err(PairingError::TransportClosed {
                participant_id: "recording".to_string(),
            }
            .into());
        }
        if let Ok(mut received) = self.received.lock() {
            received.push(notification);
        }
        Ok(())
    }
}

/// Builder for participant profiles
#[derive(Debug, Clone, Default)]
pub struct ProfileBuilder {
    request: ProfileRequest,
}

impl ProfileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gender(mut self, gender: &str) -> Self {
        self.request.gender = Some(gender.to_string());
        self
    }

    pub fn affiliation(mut self, affiliation: &str) -> Self {
        self.request.affiliation = Some(affiliation.to_string());
        self
    }

    pub fn wants(mut self, gender: &str, affiliation: &str) -> Self {
        self.request.preferred_gender = Some(gender.to_string());
        self.request.preferred_affiliation = Some(affiliation.to_string());
        self
    }

    pub fn verified(mut self) -> Self {
        self.request.verified = true;
        self
    }

    pub fn build(self) -> ProfileRequest {
        self.request
    }
}

/// Male at affiliation X looking for a female at X
pub fn male_wants_female_x() -> ProfileRequest {
    ProfileBuilder::new()
        .gender("male")
        .affiliation("X")
        .wants("female", "X")
        .build()
}

/// Female at affiliation X looking for a male at X
pub fn female_wants_male_x() -> ProfileRequest {
    ProfileBuilder::new()
        .gender("female")
        .affiliation("X")
        .wants("male", "X")
        .build()
}

/// Anyone at all
pub fn open_profile(gender: &str) -> ProfileRequest {
    ProfileBuilder::new()
        .gender(gender)
        .affiliation("X")
        .wants("any", "any")
        .build()
}

pub fn create_test_manager(pool: PoolKind) -> PairingManager {
    PairingManager::new(PairingManagerConfig::for_pool(pool))
}

/// Join a participant with a fresh recording handle
pub async fn join(
    manager: &PairingManager,
    id: &str,
    profile: ProfileRequest,
) -> Arc<RecordingHandle> {
    let handle = RecordingHandle::new();
    manager
        .join(id.to_string(), handle.clone(), profile)
        .await
        .expect("join should succeed");
    handle
}
