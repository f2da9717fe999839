//! Compatibility scoring between two participants
//!
//! This module decides whether two waiting participants satisfy each other's
//! preferences at a given filter level, and picks the best candidate for a
//! participant out of everyone else who is waiting.

use crate::filter_level::FilterLevel;
use crate::pairing::participant::Participant;
use crate::types::{ParticipantId, Profile};
use std::collections::HashSet;
use tracing::debug;

/// Outcome of scoring one pair of participants
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub success: bool,
    /// Zero whenever `success` is false
    pub score: u32,
    pub reason: String,
    pub filter_level: FilterLevel,
}

impl MatchResult {
    fn matched(score: u32, reason: &str, filter_level: FilterLevel) -> Self {
        Self {
            success: true,
            score,
            reason: reason.to_string(),
            filter_level,
        }
    }

    fn rejected(reason: &str, filter_level: FilterLevel) -> Self {
        Self {
            success: false,
            score: 0,
            reason: reason.to_string(),
            filter_level,
        }
    }
}

/// Best candidate found for a participant
#[derive(Debug, Clone, PartialEq)]
pub struct BestMatch {
    pub candidate_id: ParticipantId,
    pub result: MatchResult,
}

/// Trait for pairwise compatibility scoring
pub trait CompatibilityScorer: Send + Sync {
    /// Score `a` against `b` at `level`. Must be deterministic.
    fn score(&self, a: &Participant, b: &Participant, level: FilterLevel) -> MatchResult;
}

/// Scores mutual gender and affiliation preferences
///
/// - Level 1: four checks worth 25 points each, all required
/// - Level 2: the two gender checks worth 50 points each, both required
/// - Level 3 (and 4): always succeeds with 50 points
/// - Level 5: never succeeds
#[derive(Debug, Default, Clone, Copy)]
pub struct PreferenceScorer;

impl PreferenceScorer {
    pub fn new() -> Self {
        Self
    }

    fn wants_gender(seeker: &Profile, other: &Profile) -> bool {
        seeker
            .preferred_gender
            .as_ref()
            .is_some_and(|pref| pref.accepts(other.gender.as_ref()))
    }

    fn wants_affiliation(seeker: &Profile, other: &Profile) -> bool {
        seeker
            .preferred_affiliation
            .as_ref()
            .is_some_and(|pref| pref.accepts(other.affiliation.as_ref()))
    }
}

impl CompatibilityScorer for PreferenceScorer {
    fn score(&self, a: &Participant, b: &Participant, level: FilterLevel) -> MatchResult {
        if a.id == b.id {
            return MatchResult::rejected("same participant", level);
        }
        if a.is_paired() || b.is_paired() {
            return MatchResult::rejected("already paired", level);
        }

        let (pa, pb) = (&a.profile, &b.profile);

        match level.matching_rules() {
            FilterLevel::Strict => {
                let checks = [
                    Self::wants_gender(pa, pb),
                    Self::wants_affiliation(pa, pb),
                    Self::wants_gender(pb, pa),
                    Self::wants_affiliation(pb, pa),
                ];
                debug!(
                    "Level 1 check '{}' <-> '{}': {:?}",
                    a.id, b.id, checks
                );
                if checks.iter().all(|c| *c) {
                    MatchResult::matched(100, "mutual gender and affiliation match", level)
                } else {
                    MatchResult::rejected("preferences not met", level)
                }
            }
            FilterLevel::GenderOnly => {
                let checks = [Self::wants_gender(pa, pb), Self::wants_gender(pb, pa)];
                debug!(
                    "Level 2 check '{}' <-> '{}': {:?}",
                    a.id, b.id, checks
                );
                if checks.iter().all(|c| *c) {
                    MatchResult::matched(100, "mutual gender match", level)
                } else {
                    MatchResult::rejected("gender preferences not met", level)
                }
            }
            FilterLevel::AnyCounterpart => {
                MatchResult::matched(50, "any available counterpart", level)
            }
            FilterLevel::NoneAvailable | FilterLevel::Expired => {
                MatchResult::rejected("maximum wait time exceeded", level)
            }
        }
    }
}

/// Scan candidates in the given order and keep the first one with the
/// strictly highest successful score.
///
/// Skips the participant itself, anyone not waiting, and anyone in `excluded`.
pub fn find_best_match<'a, I>(
    scorer: &dyn CompatibilityScorer,
    participant: &Participant,
    candidates: I,
    level: FilterLevel,
    excluded: &HashSet<ParticipantId>,
) -> Option<BestMatch>
where
    I: IntoIterator<Item = &'a Participant>,
{
    let mut best: Option<BestMatch> = None;

    for candidate in candidates {
        if candidate.id == participant.id
            || !candidate.is_waiting()
            || excluded.contains(&candidate.id)
        {
            continue;
        }

        let result = scorer.score(participant, candidate, level);
        let best_score = best.as_ref().map(|b| b.result.score).unwrap_or(0);
        if result.success && result.score > best_score {
            best = Some(BestMatch {
                candidate_id: candidate.id.clone(),
                result,
            });
        }
    }

    match &best {
        Some(found) => debug!(
            "Best match for '{}' at level {}: '{}' (score {})",
            participant.id, level, found.candidate_id, found.result.score
        ),
        None => debug!(
            "No match for '{}' at level {}",
            participant.id, level
        ),
    }

    best
}
