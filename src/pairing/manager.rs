//! Pairing manager for a single pool
//!
//! This module provides the PairingManager that owns one pool's participants,
//! waiting queue, sessions and pairing lock. Inbound commands go through
//! [`PairingManager::dispatch`]; a periodic task drives
//! [`PairingManager::process_cycle`], which escalates filter levels, evicts
//! timed-out participants and pairs compatible ones.
//!
//! Shared state lives behind `std::sync::RwLock`s that are always acquired in
//! the order participants, queue, sessions and are never held across an
//! `.await`. Notifications produced while the locks are held are collected in
//! an outbox and delivered once every guard has been dropped. A cycle flushes
//! its outbox after each queue entry, and a `pairingSuccess` is only sent
//! while its session still exists.

use crate::config::MatchmakingSettings;
use crate::error::{PairingError, Result};
use crate::filter_level::{FilterLevel, FilterLevelPolicy};
use crate::metrics::{AttemptOutcome, MetricsCollector};
use crate::pairing::lock::PairingLock;
use crate::pairing::matching::{find_best_match, BestMatch, CompatibilityScorer, PreferenceScorer};
use crate::pairing::participant::{PairingInfo, Participant, Session};
use crate::pairing::queue::{QueueStats, WaitingQueue};
use crate::transport::handle::ConnectionHandle;
use crate::transport::messages::{Notification, PoolCommand};
use crate::types::{
    MatchQuality, OnlineCounts, ParticipantId, ParticipantState, PoolKind, Profile,
    ProfileRequest, SessionId,
};
use crate::utils::{current_timestamp, generate_audio_token, generate_session_id, wait_seconds};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

type ParticipantMap = HashMap<ParticipantId, Participant>;
type SessionMap = HashMap<SessionId, Session>;

/// Configuration for one pool's manager
#[derive(Debug, Clone)]
pub struct PairingManagerConfig {
    pub pool: PoolKind,
    pub policy: FilterLevelPolicy,
    pub cycle_interval: Duration,
    pub notification_retry_delay: Duration,
}

impl Default for PairingManagerConfig {
    fn default() -> Self {
        Self {
            pool: PoolKind::Text,
            policy: FilterLevelPolicy::default(),
            cycle_interval: Duration::from_secs(1),
            notification_retry_delay: Duration::from_millis(100),
        }
    }
}

impl PairingManagerConfig {
    pub fn for_pool(pool: PoolKind) -> Self {
        Self {
            pool,
            ..Self::default()
        }
    }

    pub fn from_settings(pool: PoolKind, settings: &MatchmakingSettings) -> Self {
        Self {
            pool,
            policy: settings.filter_policy(),
            cycle_interval: settings.cycle_interval(),
            notification_retry_delay: settings.notification_retry_delay(),
        }
    }
}

/// Statistics about pairing manager operations
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingManagerStats {
    /// Total join and re-pair requests accepted
    pub participants_queued: u64,
    /// Total pairing attempts made
    pub total_attempts: u64,
    /// Total sessions created
    pub successful_pairings: u64,
    /// Attempts that found no compatible counterpart
    pub failed_attempts: u64,
    /// Attempts whose counterpart was locked by a concurrent attempt
    pub lost_races: u64,
    /// Attempts abandoned because a handle went stale before commit
    pub aborted_pairings: u64,
    /// Participants evicted after the maximum queue time
    pub timeouts: u64,
    /// Participants purged because their connection was gone
    pub stale_connections: u64,
    /// Completed matchmaking cycles
    pub cycles_completed: u64,
    /// Successful pairings keyed by filter level
    pub pairings_by_level: BTreeMap<u8, u64>,
}

/// Point-in-time view of a manager, used for health and status logging
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerSnapshot {
    pub pool: PoolKind,
    pub running: bool,
    pub stats: PairingManagerStats,
    pub queue: QueueStats,
    pub online: OnlineCounts,
    pub active_sessions: usize,
    pub locked_identities: usize,
}

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// The cycle did not run because another one was in progress
    pub skipped: bool,
    pub evaluated: usize,
    pub paired: usize,
    pub timed_out: usize,
    pub stale_removed: usize,
}

/// Result of evaluating one queue entry before matching
enum EntryOutcome {
    Skip,
    Ready(FilterLevel),
}

struct Outgoing {
    participant_id: ParticipantId,
    handle: Arc<dyn ConnectionHandle>,
    notification: Notification,
    /// Set for pairing results, which are retried and dropped once the
    /// session is gone
    session_id: Option<SessionId>,
}

/// Notifications waiting to be delivered once locks are released
#[derive(Default)]
struct Outbox {
    items: Vec<Outgoing>,
}

impl Outbox {
    fn push(&mut self, participant: &Participant, notification: Notification) {
        self.items.push(Outgoing {
            participant_id: participant.id.clone(),
            handle: participant.handle.clone(),
            notification,
            session_id: None,
        });
    }

    fn push_pairing(
        &mut self,
        participant: &Participant,
        session_id: SessionId,
        notification: Notification,
    ) {
        self.items.push(Outgoing {
            participant_id: participant.id.clone(),
            handle: participant.handle.clone(),
            notification,
            session_id: Some(session_id),
        });
    }
}

/// Clears the in-progress flag when a cycle ends, however it ends
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Releases an acquired lock pair on drop
struct HeldPair<'a> {
    lock: &'a PairingLock,
    a: &'a str,
    b: &'a str,
}

impl Drop for HeldPair<'_> {
    fn drop(&mut self) {
        self.lock.release(self.a, self.b);
    }
}

fn lock_error(what: &str) -> PairingError {
    PairingError::InternalError {
        message: format!("Failed to acquire {} lock", what),
    }
}

/// Send a pairing result only if its session is still live. The sessions
/// guard is held across the send, so a teardown's `pairDisconnected` is
/// always queued after it.
fn deliver_for_session(
    sessions: &RwLock<SessionMap>,
    session_id: &SessionId,
    handle: &dyn ConnectionHandle,
    notification: Notification,
) -> Result<bool> {
    let sessions = sessions.read().map_err(|_| lock_error("sessions"))?;
    if !sessions.contains_key(session_id) {
        return Ok(false);
    }
    handle.deliver(notification)?;
    Ok(true)
}

fn not_found(participant_id: &str) -> PairingError {
    PairingError::ParticipantNotFound {
        participant_id: participant_id.to_string(),
    }
}

/// The pairing manager for one pool
#[derive(Clone)]
pub struct PairingManager {
    config: PairingManagerConfig,
    /// Every connected participant in this pool
    participants: Arc<RwLock<ParticipantMap>>,
    /// Waiting participants in priority order
    queue: Arc<RwLock<WaitingQueue>>,
    /// Active sessions by ID
    sessions: Arc<RwLock<SessionMap>>,
    /// Serialises pairing decisions per participant
    lock: Arc<PairingLock>,
    scorer: Arc<dyn CompatibilityScorer>,
    stats: Arc<RwLock<PairingManagerStats>>,
    metrics_collector: Arc<MetricsCollector>,
    cycle_in_progress: Arc<AtomicBool>,
    timer: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl PairingManager {
    /// Create a new pairing manager
    pub fn new(config: PairingManagerConfig) -> Self {
        // Create a default metrics collector if none provided
        let metrics_collector = Arc::new(MetricsCollector::new().unwrap_or_else(|_| {
            warn!("Failed to create metrics collector, using default");
            MetricsCollector::default()
        }));

        Self::with_metrics(config, metrics_collector)
    }

    /// Create a new pairing manager with metrics collector
    pub fn with_metrics(
        config: PairingManagerConfig,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        Self::with_scorer(config, Arc::new(PreferenceScorer::new()), metrics_collector)
    }

    /// Create with a custom scorer and metrics
    pub fn with_scorer(
        config: PairingManagerConfig,
        scorer: Arc<dyn CompatibilityScorer>,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            config,
            participants: Arc::new(RwLock::new(HashMap::new())),
            queue: Arc::new(RwLock::new(WaitingQueue::new())),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            lock: Arc::new(PairingLock::new()),
            scorer,
            stats: Arc::new(RwLock::new(PairingManagerStats::default())),
            metrics_collector,
            cycle_in_progress: Arc::new(AtomicBool::new(false)),
            timer: Arc::new(Mutex::new(None)),
        }
    }

    pub fn pool(&self) -> PoolKind {
        self.config.pool
    }

    pub fn config(&self) -> &PairingManagerConfig {
        &self.config
    }

    /// Get the metrics collector
    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics_collector.clone()
    }

    fn participants_read(&self) -> Result<RwLockReadGuard<'_, ParticipantMap>> {
        Ok(self
            .participants
            .read()
            .map_err(|_| lock_error("participants"))?)
    }

    fn participants_write(&self) -> Result<RwLockWriteGuard<'_, ParticipantMap>> {
        Ok(self
            .participants
            .write()
            .map_err(|_| lock_error("participants"))?)
    }

    fn queue_read(&self) -> Result<RwLockReadGuard<'_, WaitingQueue>> {
        Ok(self.queue.read().map_err(|_| lock_error("queue"))?)
    }

    fn queue_write(&self) -> Result<RwLockWriteGuard<'_, WaitingQueue>> {
        Ok(self.queue.write().map_err(|_| lock_error("queue"))?)
    }

    fn sessions_read(&self) -> Result<RwLockReadGuard<'_, SessionMap>> {
        Ok(self.sessions.read().map_err(|_| lock_error("sessions"))?)
    }

    fn sessions_write(&self) -> Result<RwLockWriteGuard<'_, SessionMap>> {
        Ok(self.sessions.write().map_err(|_| lock_error("sessions"))?)
    }

    fn update_stats<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(&mut PairingManagerStats),
    {
        let mut stats = self.stats.write().map_err(|_| lock_error("stats"))?;
        update(&mut stats);
        Ok(())
    }

    /// Handle one inbound command.
    ///
    /// Validation failures are reported to the participant as
    /// `requestRejected` when a handle is known, and returned to the caller.
    pub async fn dispatch(&self, command: PoolCommand) -> Result<()> {
        let identity = command.identity().to_string();
        let name = command.name();
        let supplied_handle = match &command {
            PoolCommand::Join { handle, .. } => Some(handle.clone()),
            _ => None,
        };

        debug!(
            "Dispatching {} for '{}' in {} pool",
            name, identity, self.config.pool
        );

        let result = match command {
            PoolCommand::Join {
                identity,
                handle,
                profile,
            } => self.join(identity, handle, profile).await.map(|_| ()),
            PoolCommand::RequestNewPairing { identity, profile } => self
                .request_new_pairing(&identity, profile)
                .await
                .map(|_| ()),
            PoolCommand::LeaveQueue { identity } => self.leave_queue(&identity).await,
            PoolCommand::UpdatePreferences {
                identity,
                preferred_gender,
                preferred_affiliation,
            } => self
                .update_preferences(
                    &identity,
                    preferred_gender.as_deref(),
                    preferred_affiliation.as_deref(),
                )
                .await
                .map(|_| ()),
            PoolCommand::Disconnect { identity } => self.disconnect(&identity).await,
            PoolCommand::RecordInteraction { identity } => {
                self.record_interaction(&identity).await.map(|_| ())
            }
        };

        if let Err(err) = &result {
            match err.downcast_ref::<PairingError>() {
                Some(pairing_err) if pairing_err.is_validation() => {
                    info!(
                        "Rejected {} from '{}' in {} pool: {}",
                        name, identity, self.config.pool, pairing_err
                    );
                    let handle = match supplied_handle {
                        Some(handle) => Some(handle),
                        None => self.participant_handle(&identity),
                    };
                    if let Some(handle) = handle {
                        let rejection = Notification::RequestRejected {
                            reason: pairing_err.to_string(),
                        };
                        if let Err(e) = handle.deliver(rejection) {
                            debug!("Could not deliver rejection to '{}': {}", identity, e);
                        }
                    }
                }
                _ => error!(
                    "Failed to handle {} from '{}' in {} pool: {}",
                    name, identity, self.config.pool, err
                ),
            }
        }

        result
    }

    fn participant_handle(&self, participant_id: &str) -> Option<Arc<dyn ConnectionHandle>> {
        self.participants
            .read()
            .ok()
            .and_then(|participants| participants.get(participant_id).map(|p| p.handle.clone()))
    }

    /// Add a participant to the waiting queue, returning their position.
    ///
    /// Re-joining while already waiting updates the profile and handle in
    /// place. Joining while paired is rejected.
    pub async fn join(
        &self,
        identity: ParticipantId,
        handle: Arc<dyn ConnectionHandle>,
        request: ProfileRequest,
    ) -> Result<usize> {
        if identity.trim().is_empty() {
            return Err(PairingError::InvalidIdentity { identity }.into());
        }
        let profile = Profile::try_from(request)?;

        let now = Instant::now();
        let mut outbox = Outbox::default();

        let position = {
            let mut participants = self.participants_write()?;
            let mut queue = self.queue_write()?;

            let existing_state = participants.get(&identity).map(|p| p.state);
            match existing_state {
                Some(ParticipantState::Paired) => {
                    return Err(PairingError::AlreadyPaired {
                        participant_id: identity,
                    }
                    .into());
                }
                Some(ParticipantState::Waiting) if queue.contains(&identity) => {
                    if let Some(existing) = participants.get_mut(&identity) {
                        existing.profile = profile;
                        existing.handle = handle;
                    }
                    info!(
                        "Participant '{}' re-joined {} pool, updated in place",
                        identity, self.config.pool
                    );
                }
                _ => {
                    let mut participant =
                        Participant::new(identity.clone(), self.config.pool, profile, handle);
                    participant.start_waiting(now);
                    participants.insert(identity.clone(), participant);
                    queue.enqueue(&identity, now, FilterLevel::Strict);
                    self.lock.release_one(&identity);
                    info!(
                        "Participant '{}' joined {} pool - queue size: {}",
                        identity,
                        self.config.pool,
                        queue.len()
                    );
                }
            }

            let position = queue.position(&identity).unwrap_or(queue.len());
            let participant = participants
                .get(&identity)
                .ok_or_else(|| not_found(&identity))?;
            outbox.push(
                participant,
                Notification::QueueJoined {
                    position,
                    queue_size: queue.len(),
                },
            );
            outbox.push(participant, self.queue_status(participant, &queue, now));
            position
        };

        self.update_stats(|s| s.participants_queued += 1)?;
        self.refresh_occupancy()?;
        self.deliver(outbox);
        Ok(position)
    }

    /// End the current session, if any, and re-enter the queue with fresh
    /// preferences, level 1 and no attempts.
    pub async fn request_new_pairing(
        &self,
        identity: &str,
        request: ProfileRequest,
    ) -> Result<usize> {
        let now = Instant::now();
        let mut outbox = Outbox::default();

        let position = {
            let mut participants = self.participants_write()?;
            let mut queue = self.queue_write()?;
            let mut sessions = self.sessions_write()?;

            let current = participants
                .get(identity)
                .ok_or_else(|| not_found(identity))?;
            let profile = current.profile.updated_with(&request)?;

            if current.is_paired() {
                self.end_session(
                    &mut participants,
                    &mut sessions,
                    identity,
                    "Counterpart requested a new pairing",
                    &mut outbox,
                );
            }

            queue.remove(identity);
            self.lock.release_one(identity);

            let participant = participants
                .get_mut(identity)
                .ok_or_else(|| not_found(identity))?;
            participant.profile = profile;
            participant.start_waiting(now);
            queue.enqueue(identity, now, FilterLevel::Strict);

            let position = queue.position(identity).unwrap_or(queue.len());
            outbox.push(
                participant,
                Notification::QueueJoined {
                    position,
                    queue_size: queue.len(),
                },
            );
            outbox.push(participant, self.queue_status(participant, &queue, now));

            info!(
                "Participant '{}' requested a new pairing in {} pool - position {}",
                identity, self.config.pool, position
            );
            position
        };

        self.update_stats(|s| s.participants_queued += 1)?;
        self.refresh_occupancy()?;
        self.deliver(outbox);
        Ok(position)
    }

    /// Leave the queue without disconnecting
    pub async fn leave_queue(&self, identity: &str) -> Result<()> {
        {
            let mut participants = self.participants_write()?;
            let mut queue = self.queue_write()?;

            let participant = participants
                .get_mut(identity)
                .ok_or_else(|| not_found(identity))?;
            if participant.is_paired() {
                return Err(PairingError::NotWaiting {
                    participant_id: identity.to_string(),
                }
                .into());
            }

            let removed = queue.remove(identity).is_some();
            self.lock.release_one(identity);
            participant.stop_waiting(ParticipantState::Idle);

            info!(
                "Participant '{}' left {} queue (was queued: {}) - remaining: {}",
                identity,
                self.config.pool,
                removed,
                queue.len()
            );
        }

        self.refresh_occupancy()
    }

    /// Replace a waiting participant's preferences and restart their wait
    /// at level 1. Returns the new queue position.
    pub async fn update_preferences(
        &self,
        identity: &str,
        preferred_gender: Option<&str>,
        preferred_affiliation: Option<&str>,
    ) -> Result<usize> {
        let gender = preferred_gender
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .ok_or_else(|| PairingError::InvalidPreference {
                field: "preferred_gender".to_string(),
                value: String::new(),
            })?;

        let now = Instant::now();
        let mut outbox = Outbox::default();

        let position = {
            let mut participants = self.participants_write()?;
            let mut queue = self.queue_write()?;

            let participant = participants
                .get_mut(identity)
                .ok_or_else(|| not_found(identity))?;
            if !participant.is_waiting() || !queue.contains(identity) {
                return Err(PairingError::NotWaiting {
                    participant_id: identity.to_string(),
                }
                .into());
            }

            participant.profile = participant
                .profile
                .with_preferences(Some(gender), preferred_affiliation)?;
            participant.start_waiting(now);
            queue.reset_entry(identity, now);

            let position = queue.position(identity).unwrap_or(queue.len());
            outbox.push(
                participant,
                Notification::FiltersUpdated {
                    position,
                    wait_seconds: 0,
                },
            );

            info!(
                "Participant '{}' updated preferences in {} pool - new position {}",
                identity, self.config.pool, position
            );
            position
        };

        self.deliver(outbox);
        Ok(position)
    }

    /// Remove a participant entirely, ending any session they were in
    pub async fn disconnect(&self, identity: &str) -> Result<()> {
        let mut outbox = Outbox::default();

        {
            let mut participants = self.participants_write()?;
            let mut queue = self.queue_write()?;
            let mut sessions = self.sessions_write()?;

            let paired = participants
                .get(identity)
                .ok_or_else(|| not_found(identity))?
                .is_paired();
            if paired {
                self.end_session(
                    &mut participants,
                    &mut sessions,
                    identity,
                    "Counterpart disconnected",
                    &mut outbox,
                );
            }

            queue.remove(identity);
            self.lock.release_one(identity);
            participants.remove(identity);

            info!(
                "Participant '{}' disconnected from {} pool - remaining participants: {}",
                identity,
                self.config.pool,
                participants.len()
            );
        }

        self.refresh_occupancy()?;
        self.deliver(outbox);
        Ok(())
    }

    /// Count one relayed message in the participant's session
    pub async fn record_interaction(&self, identity: &str) -> Result<u64> {
        let participants = self.participants_read()?;
        let session_id = participants
            .get(identity)
            .ok_or_else(|| not_found(identity))?
            .pairing
            .as_ref()
            .map(|p| p.session_id)
            .ok_or_else(|| PairingError::NotPaired {
                participant_id: identity.to_string(),
            })?;

        let mut sessions = self.sessions_write()?;
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| PairingError::NotPaired {
                participant_id: identity.to_string(),
            })?;
        session.interactions += 1;
        Ok(session.interactions)
    }

    /// Tear down the session `identity` is in. The counterpart is told and
    /// moved to `DISCONNECTED`; it is not re-queued.
    fn end_session(
        &self,
        participants: &mut ParticipantMap,
        sessions: &mut SessionMap,
        identity: &str,
        reason: &str,
        outbox: &mut Outbox,
    ) -> Option<Session> {
        let info = participants.get_mut(identity)?.pairing.take()?;
        let session = sessions.remove(&info.session_id);

        if let Some(counterpart) = participants.get_mut(&info.counterpart_id) {
            let same_session = counterpart
                .pairing
                .as_ref()
                .is_some_and(|p| p.session_id == info.session_id);
            if same_session {
                counterpart.pairing = None;
                counterpart.state = ParticipantState::Disconnected;
                outbox.push(
                    counterpart,
                    Notification::PairDisconnected {
                        reason: reason.to_string(),
                    },
                );
            }
        }

        info!(
            "Session {} ended by '{}' in {} pool ({} interactions)",
            info.session_id,
            identity,
            self.config.pool,
            session.as_ref().map(|s| s.interactions).unwrap_or(0)
        );
        session
    }

    fn queue_status(
        &self,
        participant: &Participant,
        queue: &WaitingQueue,
        now: Instant,
    ) -> Notification {
        let waited = participant.waited(now);
        let info = self.config.policy.calculate_level(waited);
        Notification::QueueStatus {
            position: queue.position(&participant.id).unwrap_or(0),
            wait_seconds: wait_seconds(waited),
            level: participant.filter_level,
            estimated_wait_seconds: info.remaining.map(|r| r.as_secs()).unwrap_or(0),
            queue_size: queue.len(),
            description: participant.filter_level.description().to_string(),
        }
    }

    fn online_counts_locked(
        &self,
        participants: &ParticipantMap,
        queue: &WaitingQueue,
    ) -> Result<OnlineCounts> {
        let sessions = self.sessions_read()?;
        Ok(OnlineCounts {
            total: participants.len(),
            in_queue: queue.len(),
            chatting: sessions.len() * 2,
        })
    }

    /// Run one matchmaking cycle.
    ///
    /// Returns immediately with `skipped` set if a cycle is already running.
    pub async fn process_cycle(&self) -> Result<CycleSummary> {
        if self.cycle_in_progress.swap(true, Ordering::AcqRel) {
            debug!("Cycle already in progress for {} pool, skipping", self.config.pool);
            return Ok(CycleSummary {
                skipped: true,
                ..CycleSummary::default()
            });
        }
        let _guard = CycleGuard(&self.cycle_in_progress);

        let timer = self.metrics_collector.start_timer();
        let now = Instant::now();
        let mut outbox = Outbox::default();
        let mut summary = CycleSummary::default();

        let result = self.run_cycle(now, &mut outbox, &mut summary);

        self.deliver(outbox);
        self.refresh_occupancy()?;
        self.metrics_collector
            .record_cycle(self.config.pool, timer.stop());
        self.update_stats(|s| s.cycles_completed += 1)?;
        result?;

        if summary.paired > 0 || summary.timed_out > 0 || summary.stale_removed > 0 {
            info!(
                "Cycle for {} pool - evaluated: {}, paired: {}, timed out: {}, stale: {}",
                self.config.pool,
                summary.evaluated,
                summary.paired,
                summary.timed_out,
                summary.stale_removed
            );
        }

        Ok(summary)
    }

    fn run_cycle(&self, now: Instant, outbox: &mut Outbox, summary: &mut CycleSummary) -> Result<()> {
        let (order, matching_enabled) = {
            let queue = self.queue_read()?;
            (queue.ids_in_priority_order(), queue.len() >= 2)
        };

        if !matching_enabled {
            debug!(
                "Fewer than two waiting in {} pool, skipping matching",
                self.config.pool
            );
        }

        for participant_id in &order {
            summary.evaluated += 1;
            match self.evaluate_entry(participant_id, now, outbox, summary)? {
                EntryOutcome::Ready(level) if matching_enabled => {
                    if self.attempt_pairing(participant_id, level.matching_rules(), now, outbox)? {
                        summary.paired += 1;
                    }
                }
                _ => {}
            }
            // Commands from other tasks may interleave between entries
            self.deliver(std::mem::take(outbox));
        }

        Ok(())
    }

    /// Refresh one entry's level and status, dropping it if it no longer
    /// belongs in the queue
    fn evaluate_entry(
        &self,
        participant_id: &str,
        now: Instant,
        outbox: &mut Outbox,
        summary: &mut CycleSummary,
    ) -> Result<EntryOutcome> {
        let mut participants = self.participants_write()?;
        let mut queue = self.queue_write()?;

        let Some(participant) = participants.get(participant_id) else {
            queue.remove(participant_id);
            self.lock.release_one(participant_id);
            return Ok(EntryOutcome::Skip);
        };

        if !participant.is_waiting() {
            queue.remove(participant_id);
            return Ok(EntryOutcome::Skip);
        }

        if !participant.is_connected() {
            warn!(
                "Participant '{}' connection lost while waiting in {} pool, removing",
                participant_id, self.config.pool
            );
            queue.remove(participant_id);
            self.lock.release_one(participant_id);
            participants.remove(participant_id);
            summary.stale_removed += 1;
            self.metrics_collector
                .record_stale_connection(self.config.pool);
            self.update_stats(|s| s.stale_connections += 1)?;
            return Ok(EntryOutcome::Skip);
        }

        let Some(joined_at) = queue.entry(participant_id).map(|e| e.joined_at) else {
            return Ok(EntryOutcome::Skip);
        };
        let waited = now.saturating_duration_since(joined_at);
        let info = self.config.policy.calculate_level(waited);

        if info.terminal {
            let online = self.online_counts_locked(&participants, &queue)?;
            outbox.push(
                participant,
                Notification::QueueTimeout {
                    wait_seconds: wait_seconds(waited),
                    online_counts: online,
                },
            );
            queue.remove(participant_id);
            self.lock.release_one(participant_id);
            participants.remove(participant_id);

            info!(
                "Participant '{}' exceeded maximum wait in {} pool after {}s, removed",
                participant_id,
                self.config.pool,
                waited.as_secs()
            );
            summary.timed_out += 1;
            self.metrics_collector.record_queue_timeout(self.config.pool);
            self.update_stats(|s| s.timeouts += 1)?;
            return Ok(EntryOutcome::Skip);
        }

        let online = if info.level == FilterLevel::NoneAvailable {
            Some(self.online_counts_locked(&participants, &queue)?)
        } else {
            None
        };

        let Some(participant) = participants.get_mut(participant_id) else {
            return Ok(EntryOutcome::Skip);
        };

        if info.level != participant.filter_level {
            let old_level = participant.filter_level;
            participant.filter_level = info.level;
            queue.update_level(participant_id, info.level);
            outbox.push(
                participant,
                Notification::FilterLevelChanged {
                    old_level,
                    new_level: info.level,
                    description: info.description.to_string(),
                },
            );
            info!(
                "Participant '{}' filter level {} -> {} after {}s in {} pool",
                participant_id,
                old_level,
                info.level,
                waited.as_secs(),
                self.config.pool
            );
        }

        outbox.push(participant, self.queue_status(participant, &queue, now));

        if let Some(online_counts) = online {
            outbox.push(
                participant,
                Notification::NoCounterpartAvailable {
                    wait_seconds: wait_seconds(waited),
                    online_counts,
                },
            );
        }

        Ok(EntryOutcome::Ready(info.level))
    }

    /// Try to pair one waiting participant at `level`. Returns whether a
    /// session was created.
    fn attempt_pairing(
        &self,
        participant_id: &str,
        level: FilterLevel,
        now: Instant,
        outbox: &mut Outbox,
    ) -> Result<bool> {
        let best = {
            let participants = self.participants_read()?;
            let mut queue = self.queue_write()?;

            let Some(participant) = participants.get(participant_id) else {
                return Ok(false);
            };
            let Some(attempt) = queue.increment_attempts(participant_id) else {
                return Ok(false);
            };
            outbox.push(
                participant,
                Notification::PairingAttempt {
                    attempt,
                    filter_level: level,
                },
            );

            let excluded = self.lock.locked_identities();
            let order = queue.ids_in_priority_order();
            let candidates = order.iter().filter_map(|id| participants.get(id));
            find_best_match(
                self.scorer.as_ref(),
                participant,
                candidates,
                level,
                &excluded,
            )
        };
        self.update_stats(|s| s.total_attempts += 1)?;

        let Some(best) = best else {
            self.metrics_collector
                .record_attempt(self.config.pool, AttemptOutcome::NoMatch);
            self.update_stats(|s| s.failed_attempts += 1)?;
            return Ok(false);
        };

        if !self.lock.try_acquire(participant_id, &best.candidate_id) {
            debug!(
                "Lost pairing race for '{}' <-> '{}' in {} pool",
                participant_id, best.candidate_id, self.config.pool
            );
            self.metrics_collector
                .record_attempt(self.config.pool, AttemptOutcome::LostRace);
            self.update_stats(|s| s.lost_races += 1)?;
            return Ok(false);
        }

        let _held = HeldPair {
            lock: &self.lock,
            a: participant_id,
            b: &best.candidate_id,
        };

        let committed = self.commit_pairing(participant_id, &best, now, outbox)?;
        if committed {
            self.metrics_collector
                .record_attempt(self.config.pool, AttemptOutcome::Matched);
        } else {
            self.metrics_collector
                .record_attempt(self.config.pool, AttemptOutcome::Aborted);
            self.update_stats(|s| s.aborted_pairings += 1)?;
        }
        Ok(committed)
    }

    /// Create the session for a locked pair. Aborts without any state change
    /// if either side is no longer waiting and connected.
    fn commit_pairing(
        &self,
        participant_id: &str,
        best: &BestMatch,
        now: Instant,
        outbox: &mut Outbox,
    ) -> Result<bool> {
        let mut participants = self.participants_write()?;
        let mut queue = self.queue_write()?;
        let mut sessions = self.sessions_write()?;

        let ids = [participant_id, best.candidate_id.as_str()];
        let ready = |id: &str| {
            participants
                .get(id)
                .is_some_and(|p| p.is_waiting() && p.is_connected())
        };
        if !ids.iter().all(|id| ready(*id)) {
            warn!(
                "Aborting pairing '{}' <-> '{}' in {} pool: participant no longer available",
                ids[0], ids[1], self.config.pool
            );
            return Ok(false);
        }

        let session_id = generate_session_id();
        let level = best.result.filter_level;
        let score = best.result.score;
        let preferences_met = level == FilterLevel::Strict;
        let paired_at = current_timestamp();

        let mut waits = [Duration::ZERO; 2];
        let mut views = Vec::with_capacity(2);
        for (i, id) in ids.iter().enumerate() {
            let participant = participants.get(*id).ok_or_else(|| not_found(id))?;
            waits[i] = participant.waited(now);
            views.push(participant.public_view());
        }

        for (i, id) in ids.iter().enumerate() {
            let counterpart_id = ids[1 - i];
            let audio_token = (self.config.pool == PoolKind::Audio)
                .then(|| generate_audio_token(&session_id, id));

            let participant = participants.get_mut(*id).ok_or_else(|| not_found(id))?;
            participant.state = ParticipantState::Paired;
            participant.queue_joined_at = None;
            participant.pairing = Some(PairingInfo {
                counterpart_id: counterpart_id.to_string(),
                session_id,
                filter_level: level,
                score,
                preferences_met,
                audio_token: audio_token.clone(),
                paired_at,
            });
            queue.remove(id);

            outbox.push_pairing(
                participant,
                session_id,
                Notification::PairingSuccess {
                    session_id,
                    counterpart: views[1 - i].clone(),
                    match_quality: MatchQuality {
                        filter_level: level,
                        score,
                        preferences_met,
                    },
                    wait_seconds: wait_seconds(waits[i]),
                    audio_token,
                },
            );
        }

        sessions.insert(
            session_id,
            Session {
                id: session_id,
                pool: self.config.pool,
                participants: [ids[0].to_string(), ids[1].to_string()],
                filter_level: level,
                score,
                created_at: paired_at,
                interactions: 0,
            },
        );

        info!(
            "Paired '{}' <-> '{}' in {} pool - level: {}, score: {}, waits: {}s/{}s, session: {}",
            ids[0],
            ids[1],
            self.config.pool,
            level,
            score,
            waits[0].as_secs(),
            waits[1].as_secs(),
            session_id
        );

        self.metrics_collector
            .record_pairing(self.config.pool, level, waits);
        self.update_stats(|s| {
            s.successful_pairings += 1;
            *s.pairings_by_level.entry(level.number()).or_insert(0) += 1;
        })?;

        Ok(true)
    }

    /// Deliver collected notifications. Pairing results that cannot be
    /// delivered are retried once after the configured delay.
    fn deliver(&self, outbox: Outbox) {
        for item in outbox.items {
            let Outgoing {
                participant_id,
                handle,
                notification,
                session_id,
            } = item;
            let kind = notification.kind();

            let Some(session_id) = session_id else {
                if let Err(err) = handle.deliver(notification) {
                    debug!("Dropped {} for '{}': {}", kind, participant_id, err);
                    self.metrics_collector
                        .record_notification_failure(self.config.pool);
                } else {
                    debug!("Delivered {} to '{}'", kind, participant_id);
                }
                continue;
            };

            let retry_copy = notification.clone();
            match deliver_for_session(&self.sessions, &session_id, handle.as_ref(), notification) {
                Ok(true) => debug!("Delivered {} to '{}'", kind, participant_id),
                Ok(false) => debug!(
                    "Session {} already ended, dropped {} for '{}'",
                    session_id, kind, participant_id
                ),
                Err(err) => {
                    warn!(
                        "Connection for '{}' not ready for {}, retrying: {}",
                        participant_id, kind, err
                    );
                    self.schedule_retry(participant_id, session_id, handle, retry_copy);
                }
            }
        }
    }

    fn schedule_retry(
        &self,
        participant_id: ParticipantId,
        session_id: SessionId,
        handle: Arc<dyn ConnectionHandle>,
        notification: Notification,
    ) {
        let delay = self.config.notification_retry_delay;
        let pool = self.config.pool;
        let metrics = self.metrics_collector.clone();
        let sessions = self.sessions.clone();

        tokio::spawn(async move {
            sleep(delay).await;
            let kind = notification.kind();
            match deliver_for_session(&sessions, &session_id, handle.as_ref(), notification) {
                Ok(true) => info!("Retry delivered {} to '{}'", kind, participant_id),
                Ok(false) => debug!(
                    "Session {} ended before retry, dropped {} for '{}'",
                    session_id, kind, participant_id
                ),
                Err(err) => {
                    error!(
                        "Connection for '{}' still not ready after retry, {} lost: {}",
                        participant_id, kind, err
                    );
                    metrics.record_notification_failure(pool);
                }
            }
        });
    }

    fn refresh_occupancy(&self) -> Result<()> {
        let waiting = self.queue_read()?.len();
        let sessions = self.sessions_read()?.len();
        self.metrics_collector
            .update_occupancy(self.config.pool, waiting, sessions);
        Ok(())
    }

    /// Start the periodic matchmaking cycle
    pub fn start(&self) -> Result<()> {
        let mut timer = self.timer.lock().map_err(|_| lock_error("timer"))?;
        if timer.is_some() {
            warn!("Pairing manager for {} pool already running", self.config.pool);
            return Ok(());
        }

        let manager = self.clone();
        let period = self.config.cycle_interval;
        *timer = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = manager.process_cycle().await {
                    error!("Cycle failed for {} pool: {}", manager.config.pool, e);
                }
            }
        }));

        info!(
            "Started pairing manager for {} pool - cycle every {:?}",
            self.config.pool, period
        );
        Ok(())
    }

    /// Stop the periodic cycle. Returns whether it was running.
    pub fn stop(&self) -> Result<bool> {
        let handle = self.timer.lock().map_err(|_| lock_error("timer"))?.take();
        match handle {
            Some(handle) => {
                handle.abort();
                info!("Stopped pairing manager for {} pool", self.config.pool);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer
            .lock()
            .map(|timer| timer.is_some())
            .unwrap_or(false)
    }

    /// Stop the cycle, empty the queue and force-release every lock.
    /// Waiting participants go back to `IDLE`; sessions are left intact.
    pub fn shutdown(&self) -> Result<()> {
        self.stop()?;

        let cleared = {
            let mut participants = self.participants_write()?;
            let mut queue = self.queue_write()?;
            let cleared = queue.len();
            queue.clear();
            for participant in participants.values_mut().filter(|p| p.is_waiting()) {
                participant.stop_waiting(ParticipantState::Idle);
            }
            cleared
        };
        let released = self.lock.release_all();

        info!(
            "Shut down {} pool - cleared {} waiting, released {} locks",
            self.config.pool, cleared, released
        );
        self.refresh_occupancy()
    }

    /// Copy of a participant's current record
    pub fn participant(&self, identity: &str) -> Result<Option<Participant>> {
        Ok(self.participants_read()?.get(identity).cloned())
    }

    pub fn session(&self, session_id: &SessionId) -> Result<Option<Session>> {
        Ok(self.sessions_read()?.get(session_id).cloned())
    }

    /// Session the participant is currently in
    pub fn session_of(&self, identity: &str) -> Result<Option<Session>> {
        let session_id = self
            .participants_read()?
            .get(identity)
            .and_then(|p| p.pairing.as_ref().map(|info| info.session_id));
        match session_id {
            Some(id) => self.session(&id),
            None => Ok(None),
        }
    }

    pub fn queue_position(&self, identity: &str) -> Result<Option<usize>> {
        Ok(self.queue_read()?.position(identity))
    }

    pub fn waiting_count(&self) -> Result<usize> {
        Ok(self.queue_read()?.len())
    }

    pub fn online_counts(&self) -> Result<OnlineCounts> {
        let participants = self.participants_read()?;
        let queue = self.queue_read()?;
        self.online_counts_locked(&participants, &queue)
    }

    pub fn stats(&self) -> Result<PairingManagerStats> {
        Ok(self.stats.read().map_err(|_| lock_error("stats"))?.clone())
    }

    pub fn locked_count(&self) -> usize {
        self.lock.locked_count()
    }

    pub fn snapshot(&self) -> Result<ManagerSnapshot> {
        let stats = self.stats()?;
        let (online, queue) = {
            let participants = self.participants_read()?;
            let queue = self.queue_read()?;
            (
                self.online_counts_locked(&participants, &queue)?,
                queue.stats(),
            )
        };
        let active_sessions = self.sessions_read()?.len();

        Ok(ManagerSnapshot {
            pool: self.config.pool,
            running: self.is_running(),
            stats,
            queue,
            online,
            active_sessions,
            locked_identities: self.lock.locked_count(),
        })
    }
}
