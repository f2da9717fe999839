//! Error types for the pairing service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific pairing scenarios
#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("Invalid participant identity: {identity:?}")]
    InvalidIdentity { identity: String },

    #[error("Invalid preference value for {field}: {value:?}")]
    InvalidPreference { field: String, value: String },

    #[error("Invalid message: {reason}")]
    InvalidMessage { reason: String },

    #[error("Participant not found: {participant_id}")]
    ParticipantNotFound { participant_id: String },

    #[error("Participant is already paired: {participant_id}")]
    AlreadyPaired { participant_id: String },

    #[error("Participant is not waiting in the queue: {participant_id}")]
    NotWaiting { participant_id: String },

    #[error("Participant is not in a session: {participant_id}")]
    NotPaired { participant_id: String },

    #[error("Transport handle closed for participant: {participant_id}")]
    TransportClosed { participant_id: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl PairingError {
    /// Whether the error is a synchronous validation failure that should be
    /// reported back to the participant rather than logged as a fault
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PairingError::InvalidIdentity { .. }
                | PairingError::InvalidPreference { .. }
                | PairingError::InvalidMessage { .. }
                | PairingError::ParticipantNotFound { .. }
                | PairingError::AlreadyPaired { .. }
                | PairingError::NotWaiting { .. }
                | PairingError::NotPaired { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_classification() {
        assert!(PairingError::InvalidIdentity {
            identity: "".to_string()
        }
        .is_validation());
        assert!(PairingError::NotWaiting {
            participant_id: "p1".to_string()
        }
        .is_validation());
        assert!(!PairingError::InternalError {
            message: "poisoned".to_string()
        }
        .is_validation());
    }

    #[test]
    fn test_error_messages() {
        let err = PairingError::InvalidPreference {
            field: "preferred_gender".to_string(),
            value: "robot".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid preference value for preferred_gender: \"robot\""
        );
    }
}
