//! Participant and session records

use crate::filter_level::FilterLevel;
use crate::transport::handle::ConnectionHandle;
use crate::types::{ParticipantId, ParticipantState, PoolKind, Profile, PublicProfile, SessionId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

/// Details of the session a participant is currently in
#[derive(Debug, Clone, PartialEq)]
pub struct PairingInfo {
    pub counterpart_id: ParticipantId,
    pub session_id: SessionId,
    pub filter_level: FilterLevel,
    pub score: u32,
    pub preferences_met: bool,
    /// Only set for audio pools
    pub audio_token: Option<String>,
    pub paired_at: DateTime<Utc>,
}

/// A connected participant within one pool
#[derive(Clone)]
pub struct Participant {
    pub id: ParticipantId,
    pub pool: PoolKind,
    pub profile: Profile,
    pub state: ParticipantState,
    pub handle: Arc<dyn ConnectionHandle>,
    /// Wait origin while queued
    pub queue_joined_at: Option<Instant>,
    pub filter_level: FilterLevel,
    pub pairing: Option<PairingInfo>,
    pub connected_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(
        id: ParticipantId,
        pool: PoolKind,
        profile: Profile,
        handle: Arc<dyn ConnectionHandle>,
    ) -> Self {
        Self {
            id,
            pool,
            profile,
            state: ParticipantState::Idle,
            handle,
            queue_joined_at: None,
            filter_level: FilterLevel::Strict,
            pairing: None,
            connected_at: Utc::now(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    pub fn is_waiting(&self) -> bool {
        self.state == ParticipantState::Waiting
    }

    pub fn is_paired(&self) -> bool {
        self.state == ParticipantState::Paired
    }

    pub fn counterpart_id(&self) -> Option<&str> {
        self.pairing.as_ref().map(|p| p.counterpart_id.as_str())
    }

    pub fn public_view(&self) -> PublicProfile {
        self.profile.public_view(&self.id)
    }

    /// Move into the waiting state with a fresh wait origin
    pub fn start_waiting(&mut self, now: Instant) {
        self.state = ParticipantState::Waiting;
        self.queue_joined_at = Some(now);
        self.filter_level = FilterLevel::Strict;
        self.pairing = None;
    }

    /// Leave the queue without being paired
    pub fn stop_waiting(&mut self, state: ParticipantState) {
        self.state = state;
        self.queue_joined_at = None;
        self.filter_level = FilterLevel::Strict;
    }

    /// Time since the wait origin, zero when not queued
    pub fn waited(&self, now: Instant) -> std::time::Duration {
        self.queue_joined_at
            .map(|joined| now.saturating_duration_since(joined))
            .unwrap_or_default()
    }
}

impl fmt::Debug for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Participant")
            .field("id", &self.id)
            .field("pool", &self.pool)
            .field("state", &self.state)
            .field("filter_level", &self.filter_level)
            .field("connected", &self.is_connected())
            .field("pairing", &self.pairing)
            .finish()
    }
}

/// An active one-to-one session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub pool: PoolKind,
    pub participants: [ParticipantId; 2],
    pub filter_level: FilterLevel,
    pub score: u32,
    pub created_at: DateTime<Utc>,
    pub interactions: u64,
}

impl Session {
    pub fn includes(&self, participant_id: &str) -> bool {
        self.participants.iter().any(|p| p == participant_id)
    }

    pub fn counterpart_of(&self, participant_id: &str) -> Option<&str> {
        match &self.participants {
            [a, b] if a == participant_id => Some(b),
            [a, b] if b == participant_id => Some(a),
            _ => None,
        }
    }
}
