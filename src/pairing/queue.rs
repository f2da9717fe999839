//! Waiting queue
//!
//! Ordered collection of waiting participants. Priority is the time spent
//! waiting plus a fixed weight per filter level, so participants who have
//! waited longer or been relaxed further are considered first.
//!
//! Since every entry's wait time grows at the same rate, the relative order of
//! two entries only changes when a level changes. The queue therefore stores a
//! time-independent priority (level weight minus join offset from a fixed
//! epoch) as the ordering key, which keeps the ordered map consistent without
//! re-sorting on every tick.

use crate::filter_level::FilterLevel;
use crate::types::ParticipantId;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;

/// Priority weight contributed by each filter level, in milliseconds
pub const LEVEL_WEIGHT_MS: i64 = 1000;

/// Ordering key: highest priority first, then earliest join, then insertion order
type OrderKey = (Reverse<i64>, Instant, u64);

/// A single waiting participant
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub participant_id: ParticipantId,
    pub joined_at: Instant,
    pub filter_level: FilterLevel,
    pub attempts: u32,
    sequence: u64,
    ordering_priority: i64,
}

impl QueueEntry {
    /// Time spent waiting so far
    pub fn wait_time(&self) -> Duration {
        Instant::now().saturating_duration_since(self.joined_at)
    }

    /// Priority in milliseconds: wait time plus level weight
    pub fn priority(&self) -> i64 {
        saturating_millis(self.wait_time()).saturating_add(level_weight(self.filter_level))
    }

    fn key(&self) -> OrderKey {
        (Reverse(self.ordering_priority), self.joined_at, self.sequence)
    }
}

/// Aggregate statistics over the queue
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub size: usize,
    pub avg_wait_seconds: f64,
    pub max_wait_seconds: f64,
    pub avg_attempts: f64,
}

fn level_weight(level: FilterLevel) -> i64 {
    i64::from(level.number()) * LEVEL_WEIGHT_MS
}

/// Whole milliseconds, saturating at `i64::MAX`
fn saturating_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Priority-ordered queue of waiting participants
#[derive(Debug)]
pub struct WaitingQueue {
    /// Reference point for converting join times into stable priorities
    epoch: Instant,
    order: BTreeMap<OrderKey, ParticipantId>,
    entries: HashMap<ParticipantId, QueueEntry>,
    next_sequence: u64,
}

impl Default for WaitingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitingQueue {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            order: BTreeMap::new(),
            entries: HashMap::new(),
            next_sequence: 0,
        }
    }

    fn ordering_priority(&self, joined_at: Instant, level: FilterLevel) -> i64 {
        let offset_ms = match joined_at.checked_duration_since(self.epoch) {
            Some(after) => saturating_millis(after),
            None => -saturating_millis(self.epoch.duration_since(joined_at)),
        };
        level_weight(level).saturating_sub(offset_ms)
    }

    fn insert(&mut self, entry: QueueEntry) {
        self.order.insert(entry.key(), entry.participant_id.clone());
        self.entries.insert(entry.participant_id.clone(), entry);
    }

    /// Add a participant. An existing entry for the same identity is replaced.
    pub fn enqueue(&mut self, participant_id: &str, joined_at: Instant, level: FilterLevel) {
        self.remove(participant_id);

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let entry = QueueEntry {
            participant_id: participant_id.to_string(),
            joined_at,
            filter_level: level,
            attempts: 0,
            sequence,
            ordering_priority: self.ordering_priority(joined_at, level),
        };
        self.insert(entry);
    }

    /// Remove and return the highest-priority entry
    pub fn dequeue_highest_priority(&mut self) -> Option<QueueEntry> {
        let (_, participant_id) = self.order.pop_first()?;
        self.entries.remove(&participant_id)
    }

    pub fn remove(&mut self, participant_id: &str) -> Option<QueueEntry> {
        let entry = self.entries.remove(participant_id)?;
        self.order.remove(&entry.key());
        Some(entry)
    }

    pub fn contains(&self, participant_id: &str) -> bool {
        self.entries.contains_key(participant_id)
    }

    pub fn entry(&self, participant_id: &str) -> Option<&QueueEntry> {
        self.entries.get(participant_id)
    }

    /// 1-based position in priority order
    pub fn position(&self, participant_id: &str) -> Option<usize> {
        let key = self.entries.get(participant_id)?.key();
        Some(self.order.range(..key).count() + 1)
    }

    /// Change an entry's level and re-sort it. Returns false if absent.
    pub fn update_level(&mut self, participant_id: &str, level: FilterLevel) -> bool {
        let Some(mut entry) = self.remove(participant_id) else {
            return false;
        };
        entry.filter_level = level;
        entry.ordering_priority = self.ordering_priority(entry.joined_at, level);
        self.insert(entry);
        true
    }

    /// Bump the attempt counter, returning the new count
    pub fn increment_attempts(&mut self, participant_id: &str) -> Option<u32> {
        let entry = self.entries.get_mut(participant_id)?;
        entry.attempts += 1;
        Some(entry.attempts)
    }

    /// Restart an entry's wait at level 1 with no attempts
    pub fn reset_entry(&mut self, participant_id: &str, joined_at: Instant) -> bool {
        let Some(mut entry) = self.remove(participant_id) else {
            return false;
        };
        entry.joined_at = joined_at;
        entry.filter_level = FilterLevel::Strict;
        entry.attempts = 0;
        entry.ordering_priority = self.ordering_priority(joined_at, FilterLevel::Strict);
        self.insert(entry);
        true
    }

    pub fn wait_time(&self, participant_id: &str) -> Option<Duration> {
        self.entries.get(participant_id).map(QueueEntry::wait_time)
    }

    /// Identities from highest to lowest priority
    pub fn ids_in_priority_order(&self) -> Vec<ParticipantId> {
        self.order.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }

    pub fn stats(&self) -> QueueStats {
        if self.entries.is_empty() {
            return QueueStats::default();
        }

        let size = self.entries.len();
        let waits: Vec<f64> = self
            .entries
            .values()
            .map(|e| e.wait_time().as_secs_f64())
            .collect();
        let total_attempts: u64 = self.entries.values().map(|e| e.attempts as u64).sum();

        QueueStats {
            size,
            avg_wait_seconds: waits.iter().sum::<f64>() / size as f64,
            max_wait_seconds: waits.iter().cloned().fold(0.0, f64::max),
            avg_attempts: total_attempts as f64 / size as f64,
        }
    }
}
