//! Common types used throughout the pairing service

use crate::error::PairingError;
use crate::filter_level::FilterLevel;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for participants, opaque and stable for a connection
pub type ParticipantId = String;

/// Unique identifier for sessions
pub type SessionId = Uuid;

/// Wildcard value accepted for any preference field
pub const ANY_PREFERENCE: &str = "any";

/// Category of real-time session a pool pairs participants for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    Text,
    Audio,
    Video,
}

impl PoolKind {
    /// All pool kinds, in a stable order
    pub const ALL: [PoolKind; 3] = [PoolKind::Text, PoolKind::Audio, PoolKind::Video];

    /// Label used for logging and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolKind::Text => "text",
            PoolKind::Audio => "audio",
            PoolKind::Video => "video",
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoolKind {
    type Err = PairingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "textchat" => Ok(PoolKind::Text),
            "audio" | "audiocall" => Ok(PoolKind::Audio),
            "video" | "videocall" => Ok(PoolKind::Video),
            other => Err(PairingError::ConfigurationError {
                message: format!("Unknown pool kind: {}", other),
            }),
        }
    }
}

/// Self-reported gender of a participant.
///
/// Any value is accepted and normalised to lowercase; only `male` and
/// `female` can be asked for as a preference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Gender {
    Male,
    Female,
    Other(String),
}

impl Gender {
    pub fn as_str(&self) -> &str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other(value) => value,
        }
    }

    /// A gender that may be named in a preference
    fn preferable(value: &str) -> Option<Self> {
        match Gender::from(value) {
            Gender::Other(_) => None,
            known => Some(known),
        }
    }
}

impl From<&str> for Gender {
    fn from(value: &str) -> Self {
        let normalised = value.trim().to_lowercase();
        match normalised.as_str() {
            "male" => Gender::Male,
            "female" => Gender::Female,
            _ => Gender::Other(normalised),
        }
    }
}

impl From<String> for Gender {
    fn from(value: String) -> Self {
        Gender::from(value.as_str())
    }
}

impl From<Gender> for String {
    fn from(gender: Gender) -> Self {
        match gender {
            Gender::Other(value) => value,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A preference over a counterpart attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preference<T> {
    /// Wildcard, any value is acceptable
    Any,
    /// Only this exact value is acceptable
    Only(T),
}

impl<T: PartialEq> Preference<T> {
    /// Check whether a counterpart's attribute satisfies this preference
    pub fn accepts(&self, value: Option<&T>) -> bool {
        match self {
            Preference::Any => true,
            Preference::Only(wanted) => value == Some(wanted),
        }
    }
}

/// Lifecycle state of a participant within a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantState {
    Idle,
    Waiting,
    Paired,
    Disconnected,
}

/// Raw profile fields as they arrive from the transport
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileRequest {
    pub gender: Option<String>,
    pub affiliation: Option<String>,
    pub preferred_gender: Option<String>,
    pub preferred_affiliation: Option<String>,
    pub verified: bool,
}

/// Validated attributes and preferences of a participant
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub gender: Option<Gender>,
    pub affiliation: Option<String>,
    /// Missing preferences never match anything
    pub preferred_gender: Option<Preference<Gender>>,
    pub preferred_affiliation: Option<Preference<String>>,
    pub verified: bool,
}

impl Profile {
    /// Replace the preference fields that are given, validating them first.
    /// Absent or blank values keep the current preference.
    pub fn with_preferences(
        &self,
        preferred_gender: Option<&str>,
        preferred_affiliation: Option<&str>,
    ) -> Result<Self, PairingError> {
        let preferred_gender = match parse_gender_preference(preferred_gender)? {
            Some(pref) => Some(pref),
            None => self.preferred_gender.clone(),
        };
        let preferred_affiliation = parse_affiliation_preference(preferred_affiliation)
            .or_else(|| self.preferred_affiliation.clone());

        Ok(Self {
            preferred_gender,
            preferred_affiliation,
            ..self.clone()
        })
    }

    /// Apply a fresh profile request on top of this profile. Fields the
    /// request leaves out keep their current values.
    pub fn updated_with(&self, request: &ProfileRequest) -> Result<Self, PairingError> {
        let mut updated = self.with_preferences(
            request.preferred_gender.as_deref(),
            request.preferred_affiliation.as_deref(),
        )?;

        if let Some(gender) = non_empty(request.gender.as_deref()) {
            updated.gender = Some(Gender::from(gender));
        }
        if let Some(affiliation) = non_empty(request.affiliation.as_deref()) {
            updated.affiliation = Some(affiliation.to_string());
        }
        updated.verified = self.verified || request.verified;

        Ok(updated)
    }

    /// Public attributes shared with a counterpart
    pub fn public_view(&self, participant_id: &str) -> PublicProfile {
        PublicProfile {
            participant_id: participant_id.to_string(),
            gender: self.gender.clone(),
            verified: self.verified,
        }
    }
}

impl TryFrom<ProfileRequest> for Profile {
    type Error = PairingError;

    fn try_from(request: ProfileRequest) -> Result<Self, Self::Error> {
        Ok(Self {
            gender: non_empty(request.gender.as_deref()).map(Gender::from),
            affiliation: non_empty(request.affiliation.as_deref()).map(str::to_string),
            preferred_gender: parse_gender_preference(request.preferred_gender.as_deref())?,
            preferred_affiliation: parse_affiliation_preference(
                request.preferred_affiliation.as_deref(),
            ),
            verified: request.verified,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Parse a preferred gender, which must be `male`, `female` or `any`
pub fn parse_gender_preference(
    value: Option<&str>,
) -> Result<Option<Preference<Gender>>, PairingError> {
    match non_empty(value) {
        None => Ok(None),
        Some(v) if v.eq_ignore_ascii_case(ANY_PREFERENCE) => Ok(Some(Preference::Any)),
        Some(v) => Gender::preferable(v)
            .map(|g| Some(Preference::Only(g)))
            .ok_or_else(|| PairingError::InvalidPreference {
                field: "preferred_gender".to_string(),
                value: v.to_string(),
            }),
    }
}

/// Parse a preferred affiliation; any non-empty value is accepted
pub fn parse_affiliation_preference(value: Option<&str>) -> Option<Preference<String>> {
    non_empty(value).map(|v| {
        if v.eq_ignore_ascii_case(ANY_PREFERENCE) {
            Preference::Any
        } else {
            Preference::Only(v.to_string())
        }
    })
}

/// Attributes of a counterpart revealed on a successful pairing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicProfile {
    pub participant_id: ParticipantId,
    pub gender: Option<Gender>,
    pub verified: bool,
}

/// Quality of a successful match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchQuality {
    pub filter_level: FilterLevel,
    pub score: u32,
    /// True only when both sides' full preferences were met
    pub preferences_met: bool,
}

/// Snapshot of how many participants a pool currently holds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineCounts {
    pub total: usize,
    pub in_queue: usize,
    pub chatting: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_from_request() {
        let request = ProfileRequest {
            gender: Some("Male".to_string()),
            affiliation: Some("College X".to_string()),
            preferred_gender: Some("female".to_string()),
            preferred_affiliation: Some("any".to_string()),
            verified: true,
        };

        let profile = Profile::try_from(request).unwrap();
        assert_eq!(profile.gender, Some(Gender::Male));
        assert_eq!(profile.affiliation.as_deref(), Some("College X"));
        assert_eq!(
            profile.preferred_gender,
            Some(Preference::Only(Gender::Female))
        );
        assert_eq!(profile.preferred_affiliation, Some(Preference::Any));
        assert!(profile.verified);
    }

    #[test]
    fn test_missing_preferences_stay_missing() {
        let profile = Profile::try_from(ProfileRequest {
            preferred_gender: Some("  ".to_string()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(profile.gender, None);
        assert_eq!(profile.preferred_gender, None);
        assert_eq!(profile.preferred_affiliation, None);
    }

    #[test]
    fn test_with_preferences_keeps_absent_fields() {
        let profile = Profile::try_from(ProfileRequest {
            gender: Some("female".to_string()),
            preferred_gender: Some("male".to_string()),
            preferred_affiliation: Some("X".to_string()),
            ..Default::default()
        })
        .unwrap();

        let updated = profile.with_preferences(Some("any"), None).unwrap();
        assert_eq!(updated.preferred_gender, Some(Preference::Any));
        assert_eq!(
            updated.preferred_affiliation,
            Some(Preference::Only("X".to_string()))
        );
        assert_eq!(updated.gender, Some(Gender::Female));
    }

    #[test]
    fn test_updated_with_request() {
        let profile = Profile::try_from(ProfileRequest {
            gender: Some("male".to_string()),
            affiliation: Some("X".to_string()),
            verified: true,
            ..Default::default()
        })
        .unwrap();

        let updated = profile
            .updated_with(&ProfileRequest {
                affiliation: Some("Y".to_string()),
                preferred_gender: Some("female".to_string()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(updated.gender, Some(Gender::Male));
        assert_eq!(updated.affiliation.as_deref(), Some("Y"));
        assert_eq!(updated.preferred_gender, Some(Preference::Only(Gender::Female)));
        assert!(updated.verified);

        assert!(profile
            .updated_with(&ProfileRequest {
                preferred_gender: Some("robot".to_string()),
                ..Default::default()
            })
            .is_err());
    }

    #[test]
    fn test_any_self_reported_gender_accepted() {
        let profile = Profile::try_from(ProfileRequest {
            gender: Some(" NonBinary ".to_string()),
            preferred_gender: Some("any".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(profile.gender, Some(Gender::Other("nonbinary".to_string())));

        let updated = profile
            .updated_with(&ProfileRequest {
                gender: Some("agender".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(updated.gender, Some(Gender::Other("agender".to_string())));

        let json = serde_json::to_string(&profile.public_view("p1")).unwrap();
        assert!(json.contains("\"gender\":\"nonbinary\""));
        assert!(parse_gender_preference(Some("nonbinary")).is_err());
    }

    #[test]
    fn test_invalid_preferred_gender_rejected() {
        let result = parse_gender_preference(Some("robot"));
        assert!(matches!(
            result,
            Err(PairingError::InvalidPreference { ref field, .. }) if field == "preferred_gender"
        ));
    }

    #[test]
    fn test_preference_accepts() {
        assert!(Preference::<Gender>::Any.accepts(None));
        assert!(Preference::Only(Gender::Male).accepts(Some(&Gender::Male)));
        assert!(!Preference::Only(Gender::Male).accepts(Some(&Gender::Female)));
        assert!(!Preference::Only(Gender::Male).accepts(None));
        assert!(!Preference::Only(Gender::Female).accepts(Some(&Gender::from("other"))));
    }

    #[test]
    fn test_pool_kind_parsing() {
        assert_eq!("audio".parse::<PoolKind>().unwrap(), PoolKind::Audio);
        assert_eq!("TextChat".parse::<PoolKind>().unwrap(), PoolKind::Text);
        assert!("radio".parse::<PoolKind>().is_err());
    }
}
