//! Inbound commands and outbound notifications

use crate::error::{PairingError, Result};
use crate::filter_level::FilterLevel;
use crate::transport::handle::ConnectionHandle;
use crate::types::{
    MatchQuality, OnlineCounts, ParticipantId, PoolKind, ProfileRequest, PublicProfile, SessionId,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Event delivered to a single participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum Notification {
    #[serde(rename_all = "camelCase")]
    QueueJoined { position: usize, queue_size: usize },

    #[serde(rename_all = "camelCase")]
    QueueStatus {
        position: usize,
        wait_seconds: u64,
        level: FilterLevel,
        estimated_wait_seconds: u64,
        queue_size: usize,
        description: String,
    },

    #[serde(rename_all = "camelCase")]
    FilterLevelChanged {
        old_level: FilterLevel,
        new_level: FilterLevel,
        description: String,
    },

    #[serde(rename_all = "camelCase")]
    NoCounterpartAvailable {
        wait_seconds: u64,
        online_counts: OnlineCounts,
    },

    #[serde(rename_all = "camelCase")]
    QueueTimeout {
        wait_seconds: u64,
        online_counts: OnlineCounts,
    },

    #[serde(rename_all = "camelCase")]
    PairingSuccess {
        session_id: SessionId,
        counterpart: PublicProfile,
        match_quality: MatchQuality,
        wait_seconds: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audio_token: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    PairDisconnected { reason: String },

    #[serde(rename_all = "camelCase")]
    PairingAttempt {
        attempt: u32,
        filter_level: FilterLevel,
    },

    #[serde(rename_all = "camelCase")]
    FiltersUpdated { position: usize, wait_seconds: u64 },

    #[serde(rename_all = "camelCase")]
    RequestRejected { reason: String },
}

impl Notification {
    /// Event name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::QueueJoined { .. } => "queueJoined",
            Notification::QueueStatus { .. } => "queueStatus",
            Notification::FilterLevelChanged { .. } => "filterLevelChanged",
            Notification::NoCounterpartAvailable { .. } => "noCounterpartAvailable",
            Notification::QueueTimeout { .. } => "queueTimeout",
            Notification::PairingSuccess { .. } => "pairingSuccess",
            Notification::PairDisconnected { .. } => "pairDisconnected",
            Notification::PairingAttempt { .. } => "pairingAttempt",
            Notification::FiltersUpdated { .. } => "filtersUpdated",
            Notification::RequestRejected { .. } => "requestRejected",
        }
    }
}

/// Command handled by a pool's manager
pub enum PoolCommand {
    Join {
        identity: ParticipantId,
        handle: Arc<dyn ConnectionHandle>,
        profile: ProfileRequest,
    },
    RequestNewPairing {
        identity: ParticipantId,
        profile: ProfileRequest,
    },
    LeaveQueue {
        identity: ParticipantId,
    },
    UpdatePreferences {
        identity: ParticipantId,
        preferred_gender: Option<String>,
        preferred_affiliation: Option<String>,
    },
    Disconnect {
        identity: ParticipantId,
    },
    RecordInteraction {
        identity: ParticipantId,
    },
}

impl PoolCommand {
    pub fn identity(&self) -> &str {
        match self {
            PoolCommand::Join { identity, .. }
            | PoolCommand::RequestNewPairing { identity, .. }
            | PoolCommand::LeaveQueue { identity }
            | PoolCommand::UpdatePreferences { identity, .. }
            | PoolCommand::Disconnect { identity }
            | PoolCommand::RecordInteraction { identity } => identity,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PoolCommand::Join { .. } => "join",
            PoolCommand::RequestNewPairing { .. } => "requestNewPairing",
            PoolCommand::LeaveQueue { .. } => "leaveQueue",
            PoolCommand::UpdatePreferences { .. } => "updatePreferences",
            PoolCommand::Disconnect { .. } => "disconnect",
            PoolCommand::RecordInteraction { .. } => "recordInteraction",
        }
    }
}

impl fmt::Debug for PoolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolCommand")
            .field("command", &self.name())
            .field("identity", &self.identity())
            .finish()
    }
}

/// Wire form of a [`PoolCommand`]; `join` carries no handle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CommandMessage {
    #[serde(rename_all = "camelCase")]
    Join {
        identity: ParticipantId,
        #[serde(default)]
        profile: ProfileRequest,
    },
    #[serde(rename_all = "camelCase")]
    RequestNewPairing {
        identity: ParticipantId,
        #[serde(default)]
        profile: ProfileRequest,
    },
    #[serde(rename_all = "camelCase")]
    LeaveQueue { identity: ParticipantId },
    #[serde(rename_all = "camelCase")]
    UpdatePreferences {
        identity: ParticipantId,
        #[serde(default)]
        preferred_gender: Option<String>,
        #[serde(default)]
        preferred_affiliation: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Disconnect { identity: ParticipantId },
    #[serde(rename_all = "camelCase")]
    RecordInteraction { identity: ParticipantId },
}

impl CommandMessage {
    pub fn identity(&self) -> &str {
        match self {
            CommandMessage::Join { identity, .. }
            | CommandMessage::RequestNewPairing { identity, .. }
            | CommandMessage::LeaveQueue { identity }
            | CommandMessage::UpdatePreferences { identity, .. }
            | CommandMessage::Disconnect { identity }
            | CommandMessage::RecordInteraction { identity } => identity,
        }
    }

    /// Convert into a pool command, attaching a handle when this is a join
    pub fn into_command<F>(self, make_handle: F) -> PoolCommand
    where
        F: FnOnce(&str) -> Arc<dyn ConnectionHandle>,
    {
        match self {
            CommandMessage::Join { identity, profile } => {
                let handle = make_handle(&identity);
                PoolCommand::Join {
                    identity,
                    handle,
                    profile,
                }
            }
            CommandMessage::RequestNewPairing { identity, profile } => {
                PoolCommand::RequestNewPairing { identity, profile }
            }
            CommandMessage::LeaveQueue { identity } => PoolCommand::LeaveQueue { identity },
            CommandMessage::UpdatePreferences {
                identity,
                preferred_gender,
                preferred_affiliation,
            } => PoolCommand::UpdatePreferences {
                identity,
                preferred_gender,
                preferred_affiliation,
            },
            CommandMessage::Disconnect { identity } => PoolCommand::Disconnect { identity },
            CommandMessage::RecordInteraction { identity } => {
                PoolCommand::RecordInteraction { identity }
            }
        }
    }
}

/// A command addressed to one pool, as read from the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub pool: PoolKind,
    pub command: CommandMessage,
}

impl InboundMessage {
    /// Parse one JSON line
    pub fn from_line(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim()).map_err(|e| {
            PairingError::InvalidMessage {
                reason: format!("Failed to parse inbound message: {}", e),
            }
            .into()
        })
    }
}

/// A notification addressed to one participant, as written to the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub pool: PoolKind,
    pub participant_id: ParticipantId,
    pub notification: Notification,
}

impl OutboundMessage {
    /// Serialize to a single JSON line without trailing newline
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            PairingError::InternalError {
                message: format!("Failed to serialize outbound message: {}", e),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Gender;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_notification_wire_format() {
        let notification = Notification::QueueStatus {
            position: 2,
            wait_seconds: 16,
            level: FilterLevel::GenderOnly,
            estimated_wait_seconds: 14,
            queue_size: 3,
            description: FilterLevel::GenderOnly.description().to_string(),
        };

        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value["type"], "queueStatus");
        assert_eq!(value["data"]["waitSeconds"], 16);
        assert_eq!(value["data"]["level"], 2);
        assert_eq!(value["data"]["estimatedWaitSeconds"], 14);
        assert_eq!(notification.kind(), "queueStatus");
    }

    #[test]
    fn test_pairing_success_omits_missing_token() {
        let notification = Notification::PairingSuccess {
            session_id: Uuid::new_v4(),
            counterpart: PublicProfile {
                participant_id: "p2".to_string(),
                gender: Some(Gender::Female),
                verified: true,
            },
            match_quality: MatchQuality {
                filter_level: FilterLevel::Strict,
                score: 100,
                preferences_met: true,
            },
            wait_seconds: 3,
            audio_token: None,
        };

        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value["type"], "pairingSuccess");
        assert!(value["data"].get("audioToken").is_none());
        assert_eq!(value["data"]["counterpart"]["gender"], "female");
        assert_eq!(value["data"]["matchQuality"]["preferencesMet"], true);
    }

    #[test]
    fn test_inbound_message_parsing() {
        let line = json!({
            "pool": "audio",
            "command": {
                "type": "join",
                "identity": "p1",
                "profile": {
                    "gender": "male",
                    "affiliation": "X",
                    "preferredGender": "female",
                    "preferredAffiliation": "X"
                }
            }
        })
        .to_string();

        let message = InboundMessage::from_line(&line).unwrap();
        assert_eq!(message.pool, PoolKind::Audio);
        assert_eq!(message.command.identity(), "p1");

        match message.command {
            CommandMessage::Join { profile, .. } => {
                assert_eq!(profile.preferred_gender.as_deref(), Some("female"));
                assert!(!profile.verified);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_update_preferences_fields_optional() {
        let line = r#"{"pool":"text","command":{"type":"updatePreferences","identity":"p1","preferredGender":"any"}}"#;
        let message = InboundMessage::from_line(line).unwrap();

        assert_eq!(
            message.command,
            CommandMessage::UpdatePreferences {
                identity: "p1".to_string(),
                preferred_gender: Some("any".to_string()),
                preferred_affiliation: None,
            }
        );
    }

    #[test]
    fn test_malformed_inbound_rejected() {
        assert!(InboundMessage::from_line("not json").is_err());
        assert!(InboundMessage::from_line(r#"{"pool":"radio","command":{"type":"leaveQueue","identity":"p"}}"#).is_err());
    }

    #[test]
    fn test_outbound_line() {
        let message = OutboundMessage {
            pool: PoolKind::Text,
            participant_id: "p1".to_string(),
            notification: Notification::PairDisconnected {
                reason: "Counterpart disconnected".to_string(),
            },
        };

        let line = message.to_line().unwrap();
        assert!(!line.contains('\n'));
        assert!(line.contains("\"participantId\":\"p1\""));
        assert!(line.contains("\"type\":\"pairDisconnected\""));
    }
}
