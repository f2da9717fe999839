//! Utility functions for the pairing service

use crate::types::SessionId;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::time::Duration;
use uuid::Uuid;

/// Length of a per-participant audio session token
pub const AUDIO_TOKEN_LENGTH: usize = 48;

/// Generate a new unique session ID
pub fn generate_session_id() -> SessionId {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Generate an audio session token unique to one participant in one session
///
/// The token is a hex sha-256 digest of the session, the identity, fresh
/// randomness and the current time, truncated to [`AUDIO_TOKEN_LENGTH`].
pub fn generate_audio_token(session_id: &SessionId, participant_id: &str) -> String {
    let entropy = format!(
        "{}-{}-{}-{}",
        session_id,
        participant_id,
        Uuid::new_v4(),
        current_timestamp().timestamp_nanos_opt().unwrap_or_default()
    );

    let mut hasher = Sha256::new();
    hasher.update(entropy.as_bytes());
    let mut token = hex::encode(hasher.finalize());
    token.truncate(AUDIO_TOKEN_LENGTH);
    token
}

/// Whole seconds in a duration, as reported to participants
pub fn wait_seconds(waited: Duration) -> u64 {
    waited.as_secs()
}
