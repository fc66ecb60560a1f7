//! Readiness handshake gating when a play transition actually takes effect.
//!
//! Clients buffer media at different speeds, so a play request only turns into
//! a real transport change once every connected player reported it is ready.
//! The transition then carries a `start_at` instant slightly in the future so
//! all clients begin in unison.
//!
//! Callers follow a plan/commit discipline: take a copy with
//! [`PlaybackCoordinator::current`], decide on it, persist whatever durable
//! change the returned [`Transport`] asks for, and only then
//! [`commit`](PlaybackCoordinator::commit). A rejected mutation therefore never
//! leaves partial buffering state behind.

use std::{
    collections::HashSet,
    time::{Duration, SystemTime},
};

use dashmap::DashMap;
use uuid::Uuid;

use crate::dao::models::PlaybackEntity;

/// Durable transport change requested by a sync decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Nothing to persist.
    Unchanged,
    /// Persist `paused = false`; clients begin playback at `start_at`.
    Start {
        /// Wall-clock instant shared by every client.
        start_at: SystemTime,
    },
    /// Persist `paused = true` (buffering interrupted playback or a scheduled start).
    Pause,
}

/// Transient synchronisation state of one room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomSync {
    buffering: HashSet<Uuid>,
    ready: HashSet<Uuid>,
    pending_play: bool,
    auto_paused: bool,
    start_at: Option<SystemTime>,
    buzzed_by: Option<Uuid>,
}

impl RoomSync {
    /// Whether the player last reported it is buffering.
    pub fn is_buffering(&self, player_id: &Uuid) -> bool {
        self.buffering.contains(player_id)
    }

    /// Whether the player last reported it is ready to play.
    pub fn is_ready(&self, player_id: &Uuid) -> bool {
        self.ready.contains(player_id)
    }

    /// Players currently buffering, sorted for stable snapshots.
    pub fn buffering(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.buffering.iter().copied().collect();
        ids.sort();
        ids
    }

    /// Whether a play request waits for the room to become ready.
    pub fn pending_play(&self) -> bool {
        self.pending_play || self.auto_paused
    }

    /// Whether the transport was paused by buffering rather than by the owner.
    pub fn auto_paused(&self) -> bool {
        self.auto_paused
    }

    /// Instant at which clients should start the current transition.
    pub fn start_at(&self) -> Option<SystemTime> {
        self.start_at
    }

    /// Player whose buzz awaits the owner's verdict.
    pub fn buzzed_by(&self) -> Option<Uuid> {
        self.buzzed_by
    }

    fn all_ready(&self, connected: &[Uuid]) -> bool {
        connected.iter().all(|id| self.ready.contains(id))
    }

    fn try_start(&mut self, connected: &[Uuid], now: SystemTime, lead: Duration) -> Transport {
        if !self.pending_play() || !self.all_ready(connected) {
            return Transport::Unchanged;
        }
        self.pending_play = false;
        self.auto_paused = false;
        let start_at = now + lead;
        self.start_at = Some(start_at);
        Transport::Start { start_at }
    }

    /// Owner asked to play. Starts right away when every connected player is
    /// ready, otherwise records the request as pending.
    pub fn request_play(
        &mut self,
        connected: &[Uuid],
        transport_paused: bool,
        now: SystemTime,
        lead: Duration,
    ) -> Transport {
        if !transport_paused {
            return Transport::Unchanged;
        }
        self.pending_play = true;
        self.auto_paused = false;
        self.start_at = None;
        self.try_start(connected, now, lead)
    }

    /// Owner asked to pause: any pending or automatic resume is dropped.
    pub fn request_pause(&mut self) -> Transport {
        self.pending_play = false;
        self.auto_paused = false;
        self.start_at = None;
        Transport::Pause
    }

    /// Record a buffering report from `player_id`.
    pub fn set_buffering(
        &mut self,
        player_id: Uuid,
        buffering: bool,
        connected: &[Uuid],
        transport_paused: bool,
        now: SystemTime,
        lead: Duration,
    ) -> Transport {
        if !buffering {
            self.buffering.remove(&player_id);
            self.ready.insert(player_id);
            return self.try_start(connected, now, lead);
        }

        self.ready.remove(&player_id);
        self.buffering.insert(player_id);

        match self.start_at {
            Some(start_at) if now < start_at => {
                self.start_at = None;
                self.pending_play = true;
                Transport::Pause
            }
            _ if !transport_paused => {
                self.start_at = None;
                self.auto_paused = true;
                Transport::Pause
            }
            _ => Transport::Unchanged,
        }
    }

    /// Forget a player that disconnected or left. Its absence may unblock a
    /// pending start for the remaining `connected` players.
    pub fn player_gone(
        &mut self,
        player_id: Uuid,
        connected: &[Uuid],
        now: SystemTime,
        lead: Duration,
    ) -> Transport {
        self.buffering.remove(&player_id);
        self.ready.remove(&player_id);
        if self.buzzed_by == Some(player_id) {
            self.buzzed_by = None;
        }
        self.try_start(connected, now, lead)
    }

    /// Start a fresh synchronisation round (playlist load, seek, track change).
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// A buzz freezes the transport until the owner resolves it.
    pub fn begin_buzz(&mut self, player_id: Uuid) {
        self.buzzed_by = Some(player_id);
        self.pending_play = false;
        self.auto_paused = false;
        self.start_at = None;
    }

    /// Take the pending buzzer, if any.
    pub fn take_buzz(&mut self) -> Option<Uuid> {
        self.buzzed_by.take()
    }
}

/// Estimate where the transport is right now.
///
/// While playing, the stored position advances from the effective start: the
/// scheduled `start_at` once it follows the last update, else `updated_at`.
pub fn estimate_position(
    playback: &PlaybackEntity,
    start_at: Option<SystemTime>,
    now: SystemTime,
) -> u64 {
    if playback.paused {
        return playback.position_ms;
    }
    let base = start_at
        .filter(|start| *start > playback.updated_at)
        .unwrap_or(playback.updated_at);
    let elapsed = now.duration_since(base).unwrap_or_default();
    playback
        .position_ms
        .saturating_add(elapsed.as_millis() as u64)
}

/// Per-room registry of [`RoomSync`] values.
#[derive(Default)]
pub struct PlaybackCoordinator {
    rooms: DashMap<Uuid, RoomSync>,
}

impl PlaybackCoordinator {
    /// Create an empty coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the room's current sync state (default when none was recorded).
    pub fn current(&self, room_id: Uuid) -> RoomSync {
        self.rooms
            .get(&room_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Replace the room's sync state after the durable side was persisted.
    pub fn commit(&self, room_id: Uuid, sync: RoomSync) {
        self.rooms.insert(room_id, sync);
    }

    /// Drop everything known about a room.
    pub fn clear_room(&self, room_id: Uuid) {
        self.rooms.remove(&room_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEAD: Duration = Duration::from_millis(1500);

    fn players() -> (Uuid, Uuid) {
        (Uuid::new_v4(), Uuid::new_v4())
    }

    #[test]
    fn play_waits_for_buffering_player() {
        let (a, b) = players();
        let connected = [a, b];
        let now = SystemTime::now();
        let mut sync = RoomSync::default();

        sync.set_buffering(a, false, &connected, true, now, LEAD);
        sync.set_buffering(b, true, &connected, true, now, LEAD);

        assert_eq!(
            sync.request_play(&connected, true, now, LEAD),
            Transport::Unchanged
        );
        assert!(sync.pending_play());
        assert_eq!(sync.start_at(), None);

        let later = now + Duration::from_millis(200);
        let outcome = sync.set_buffering(b, false, &connected, true, later, LEAD);
        assert_eq!(
            outcome,
            Transport::Start {
                start_at: later + LEAD
            }
        );
        assert!(sync.start_at().unwrap() > later);
        assert!(!sync.pending_play());
    }

    #[test]
    fn play_starts_immediately_when_everyone_is_ready() {
        let (a, b) = players();
        let connected = [a, b];
        let now = SystemTime::now();
        let mut sync = RoomSync::default();
        sync.set_buffering(a, false, &connected, true, now, LEAD);
        sync.set_buffering(b, false, &connected, true, now, LEAD);

        assert_eq!(
            sync.request_play(&connected, true, now, LEAD),
            Transport::Start {
                start_at: now + LEAD
            }
        );
    }

    #[test]
    fn players_that_never_reported_are_not_ready() {
        let (a, b) = players();
        let now = SystemTime::now();
        let mut sync = RoomSync::default();
        sync.set_buffering(a, false, &[a, b], true, now, LEAD);

        assert_eq!(
            sync.request_play(&[a, b], true, now, LEAD),
            Transport::Unchanged
        );
    }

    #[test]
    fn buffering_before_scheduled_start_reverts_to_pending() {
        let (a, b) = players();
        let connected = [a, b];
        let now = SystemTime::now();
        let mut sync = RoomSync::default();
        sync.set_buffering(a, false, &connected, true, now, LEAD);
        sync.set_buffering(b, false, &connected, true, now, LEAD);
        sync.request_play(&connected, true, now, LEAD);

        let outcome = sync.set_buffering(
            a,
            true,
            &connected,
            false,
            now + Duration::from_millis(500),
            LEAD,
        );
        assert_eq!(outcome, Transport::Pause);
        assert_eq!(sync.start_at(), None);
        assert!(sync.pending_play());
        assert!(!sync.auto_paused());
    }

    #[test]
    fn buffering_while_playing_auto_pauses_and_resumes() {
        let (a, b) = players();
        let connected = [a, b];
        let now = SystemTime::now();
        let mut sync = RoomSync::default();
        sync.set_buffering(a, false, &connected, true, now, LEAD);
        sync.set_buffering(b, false, &connected, true, now, LEAD);
        sync.request_play(&connected, true, now, LEAD);

        let playing = now + Duration::from_secs(10);
        assert_eq!(
            sync.set_buffering(b, true, &connected, false, playing, LEAD),
            Transport::Pause
        );
        assert!(sync.auto_paused());

        let recovered = playing + Duration::from_secs(2);
        assert_eq!(
            sync.set_buffering(b, false, &connected, true, recovered, LEAD),
            Transport::Start {
                start_at: recovered + LEAD
            }
        );
        assert!(!sync.auto_paused());
    }

    #[test]
    fn owner_pause_cancels_automatic_resume() {
        let (a, _) = players();
        let now = SystemTime::now();
        let mut sync = RoomSync::default();
        sync.set_buffering(a, false, &[a], true, now, LEAD);
        sync.request_play(&[a], true, now, LEAD);
        sync.set_buffering(a, true, &[a], false, now + Duration::from_secs(5), LEAD);

        assert_eq!(sync.request_pause(), Transport::Pause);
        assert_eq!(
            sync.set_buffering(a, false, &[a], true, now + Duration::from_secs(6), LEAD),
            Transport::Unchanged
        );
    }

    #[test]
    fn departure_of_the_last_buffering_player_unblocks_start() {
        let (a, b) = players();
        let now = SystemTime::now();
        let mut sync = RoomSync::default();
        sync.set_buffering(a, false, &[a, b], true, now, LEAD);
        sync.set_buffering(b, true, &[a, b], true, now, LEAD);
        sync.request_play(&[a, b], true, now, LEAD);

        assert_eq!(
            sync.player_gone(b, &[a], now, LEAD),
            Transport::Start {
                start_at: now + LEAD
            }
        );
        assert!(!sync.is_buffering(&b));
    }

    #[test]
    fn reset_clears_readiness() {
        let (a, _) = players();
        let now = SystemTime::now();
        let mut sync = RoomSync::default();
        sync.set_buffering(a, false, &[a], true, now, LEAD);
        sync.begin_buzz(a);

        sync.reset();
        assert!(!sync.is_ready(&a));
        assert_eq!(sync.buzzed_by(), None);
        assert!(!sync.pending_play());
    }

    #[test]
    fn position_advances_only_while_playing() {
        let now = SystemTime::now();
        let mut playback = PlaybackEntity {
            track_index: 0,
            paused: true,
            position_ms: 1_000,
            updated_at: now,
        };
        let later = now + Duration::from_secs(3);
        assert_eq!(estimate_position(&playback, None, later), 1_000);

        playback.paused = false;
        assert_eq!(estimate_position(&playback, None, later), 4_000);
        // Scheduled start one second after the update: only two seconds played.
        let start_at = Some(now + Duration::from_secs(1));
        assert_eq!(estimate_position(&playback, start_at, later), 3_000);
        // Before the scheduled start nothing has played yet.
        assert_eq!(estimate_position(&playback, start_at, now), 1_000);
    }

    #[test]
    fn coordinator_commit_is_visible() {
        let coordinator = PlaybackCoordinator::new();
        let room = Uuid::new_v4();
        let mut sync = coordinator.current(room);
        sync.begin_buzz(Uuid::new_v4());
        coordinator.commit(room, sync.clone());
        assert_eq!(coordinator.current(room), sync);

        coordinator.clear_room(room);
        assert_eq!(coordinator.current(room), RoomSync::default());
    }
}
