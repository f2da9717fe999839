//! Filter-level policy
//!
//! Maps how long a participant has been waiting to the strictness level used
//! when searching for a counterpart. Levels escalate on fixed thresholds and
//! the final level evicts the participant instead of matching them.

use crate::error::{PairingError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Strictness tier applied while matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FilterLevel {
    /// Mutual gender and affiliation preferences must hold
    Strict = 1,
    /// Mutual gender preferences must hold, affiliation is ignored
    GenderOnly = 2,
    /// Any waiting counterpart is acceptable
    AnyCounterpart = 3,
    /// Same rules as `AnyCounterpart`, but the participant is told nobody is around
    NoneAvailable = 4,
    /// Maximum queue time exceeded, the participant must be evicted
    Expired = 5,
}

impl FilterLevel {
    /// Numeric level, 1 through 5
    pub fn number(self) -> u8 {
        self as u8
    }

    /// The level whose matching rules apply when pairing at this level
    pub fn matching_rules(self) -> FilterLevel {
        match self {
            FilterLevel::NoneAvailable => FilterLevel::AnyCounterpart,
            other => other,
        }
    }

    /// Whether this level evicts instead of matching
    pub fn is_terminal(self) -> bool {
        self == FilterLevel::Expired
    }

    /// Human readable status shown to a waiting participant
    pub fn description(self) -> &'static str {
        match self {
            FilterLevel::Strict => "Searching in your affiliation for preferred gender",
            FilterLevel::GenderOnly => "Expanding search to all affiliations",
            FilterLevel::AnyCounterpart => "Searching for any available participant",
            FilterLevel::NoneAvailable => "No participants available currently - keep waiting",
            FilterLevel::Expired => "Maximum wait time exceeded",
        }
    }
}

impl fmt::Display for FilterLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

impl From<FilterLevel> for u8 {
    fn from(level: FilterLevel) -> Self {
        level.number()
    }
}

impl TryFrom<u8> for FilterLevel {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(FilterLevel::Strict),
            2 => Ok(FilterLevel::GenderOnly),
            3 => Ok(FilterLevel::AnyCounterpart),
            4 => Ok(FilterLevel::NoneAvailable),
            5 => Ok(FilterLevel::Expired),
            other => Err(format!("filter level out of range: {}", other)),
        }
    }
}

/// Result of evaluating the policy for a given wait time
#[derive(Debug, Clone, PartialEq)]
pub struct FilterLevelInfo {
    pub level: FilterLevel,
    pub description: &'static str,
    /// Time left until the next level, `None` once terminal
    pub remaining: Option<Duration>,
    pub terminal: bool,
}

/// Thresholds at which the strictness level escalates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterLevelPolicy {
    pub level_1_timeout: Duration,
    pub level_2_timeout: Duration,
    pub level_3_timeout: Duration,
    pub max_queue_time: Duration,
}

impl Default for FilterLevelPolicy {
    fn default() -> Self {
        Self {
            level_1_timeout: Duration::from_secs(15),
            level_2_timeout: Duration::from_secs(30),
            level_3_timeout: Duration::from_secs(45),
            max_queue_time: Duration::from_secs(15 * 60),
        }
    }
}

impl FilterLevelPolicy {
    /// Create a policy, rejecting thresholds that are not strictly increasing
    pub fn new(
        level_1_timeout: Duration,
        level_2_timeout: Duration,
        level_3_timeout: Duration,
        max_queue_time: Duration,
    ) -> Result<Self> {
        let policy = Self {
            level_1_timeout,
            level_2_timeout,
            level_3_timeout,
            max_queue_time,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Short thresholds for simulations and demos
    pub fn accelerated() -> Self {
        Self {
            level_1_timeout: Duration::from_secs(3),
            level_2_timeout: Duration::from_secs(6),
            level_3_timeout: Duration::from_secs(9),
            max_queue_time: Duration::from_secs(60),
        }
    }

    /// Validate threshold ordering
    pub fn validate(&self) -> Result<()> {
        if self.level_1_timeout.is_zero() {
            return Err(PairingError::ConfigurationError {
                message: "level 1 timeout must be greater than 0".to_string(),
            }
            .into());
        }

        let ordered = self.level_1_timeout < self.level_2_timeout
            && self.level_2_timeout < self.level_3_timeout
            && self.level_3_timeout < self.max_queue_time;
        if !ordered {
            return Err(PairingError::ConfigurationError {
                message: format!(
                    "filter level thresholds must be strictly increasing: {:?} < {:?} < {:?} < {:?}",
                    self.level_1_timeout,
                    self.level_2_timeout,
                    self.level_3_timeout,
                    self.max_queue_time
                ),
            }
            .into());
        }

        Ok(())
    }

    /// Map elapsed wait time to a strictness level. Boundaries are half-open.
    pub fn calculate_level(&self, waited: Duration) -> FilterLevelInfo {
        let (level, next_threshold) = if waited >= self.max_queue_time {
            (FilterLevel::Expired, None)
        } else if waited < self.level_1_timeout {
            (FilterLevel::Strict, Some(self.level_1_timeout))
        } else if waited < self.level_2_timeout {
            (FilterLevel::GenderOnly, Some(self.level_2_timeout))
        } else if waited < self.level_3_timeout {
            (FilterLevel::AnyCounterpart, Some(self.level_3_timeout))
        } else {
            (FilterLevel::NoneAvailable, Some(self.max_queue_time))
        };

        FilterLevelInfo {
            level,
            description: level.description(),
            remaining: next_threshold.map(|t| t.saturating_sub(waited)),
            terminal: level.is_terminal(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn level_at_ms(ms: u64) -> FilterLevel {
        FilterLevelPolicy::default()
            .calculate_level(Duration::from_millis(ms))
            .level
    }

    #[test]
    fn test_boundaries_are_half_open() {
        assert_eq!(level_at_ms(0), FilterLevel::Strict);
        assert_eq!(level_at_ms(14_999), FilterLevel::Strict);
        assert_eq!(level_at_ms(15_000), FilterLevel::GenderOnly);
        assert_eq!(level_at_ms(29_999), FilterLevel::GenderOnly);
        assert_eq!(level_at_ms(30_000), FilterLevel::AnyCounterpart);
        assert_eq!(level_at_ms(44_999), FilterLevel::AnyCounterpart);
        assert_eq!(level_at_ms(45_000), FilterLevel::NoneAvailable);
        assert_eq!(level_at_ms(899_999), FilterLevel::NoneAvailable);
        assert_eq!(level_at_ms(900_000), FilterLevel::Expired);
    }

    #[test]
    fn test_remaining_time_and_terminal_flag() {
        let policy = FilterLevelPolicy::default();

        let info = policy.calculate_level(Duration::from_secs(10));
        assert_eq!(info.remaining, Some(Duration::from_secs(5)));
        assert!(!info.terminal);

        let info = policy.calculate_level(Duration::from_secs(50));
        assert_eq!(info.level, FilterLevel::NoneAvailable);
        assert_eq!(info.remaining, Some(Duration::from_secs(850)));

        let info = policy.calculate_level(Duration::from_secs(901));
        assert!(info.terminal);
        assert_eq!(info.remaining, None);
        assert_eq!(info.description, "Maximum wait time exceeded");
    }

    #[test]
    fn test_matching_rules() {
        assert_eq!(
            FilterLevel::NoneAvailable.matching_rules(),
            FilterLevel::AnyCounterpart
        );
        assert_eq!(FilterLevel::Strict.matching_rules(), FilterLevel::Strict);
        assert_eq!(FilterLevel::Expired.matching_rules(), FilterLevel::Expired);
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let result = FilterLevelPolicy::new(
            Duration::from_secs(30),
            Duration::from_secs(15),
            Duration::from_secs(45),
            Duration::from_secs(900),
        );
        assert!(result.is_err());

        let result = FilterLevelPolicy::new(
            Duration::ZERO,
            Duration::from_secs(15),
            Duration::from_secs(45),
            Duration::from_secs(900),
        );
        assert!(result.is_err());

        assert!(FilterLevelPolicy::accelerated().validate().is_ok());
    }

    #[test]
    fn test_level_serializes_as_number() {
        let json = serde_json::to_string(&FilterLevel::GenderOnly).unwrap();
        assert_eq!(json, "2");

        let level: FilterLevel = serde_json::from_str("4").unwrap();
        assert_eq!(level, FilterLevel::NoneAvailable);

        assert!(serde_json::from_str::<FilterLevel>("9").is_err());
    }

    proptest! {
        #[test]
        fn prop_level_is_monotonic(a in 0u64..2_000_000, b in 0u64..2_000_000) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(level_at_ms(lo) <= level_at_ms(hi));
        }

        #[test]
        fn prop_custom_policy_monotonic(
            t1 in 1u64..1_000,
            gap2 in 1u64..1_000,
            gap3 in 1u64..1_000,
            gap4 in 1u64..1_000,
            a in 0u64..5_000,
            b in 0u64..5_000,
        ) {
            let policy = FilterLevelPolicy::new(
                Duration::from_millis(t1),
                Duration::from_millis(t1 + gap2),
                Duration::from_millis(t1 + gap2 + gap3),
                Duration::from_millis(t1 + gap2 + gap3 + gap4),
            ).unwrap();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(
                policy.calculate_level(Duration::from_millis(lo)).level
                    <= policy.calculate_level(Duration::from_millis(hi)).level
            );
        }
    }
}
