//! Plan/commit helpers for the readiness handshake.

use std::time::SystemTime;

use uuid::Uuid;

use crate::{
    dao::models::{PlaybackUpdate, RoomEntity},
    error::ServiceError,
    services::room_events::require_room,
    state::{RoomSync, SharedState, Transport, playback::estimate_position},
};

/// A sync decision in the making: the room as stored, a private copy of its
/// sync state, and the instant the decision is taken at.
pub struct SyncPlan {
    pub room: RoomEntity,
    pub sync: RoomSync,
    pub now: SystemTime,
    position_ms: u64,
}

impl SyncPlan {
    /// Read the room and its current sync state.
    pub async fn load(state: &SharedState, room_id: Uuid) -> Result<Self, ServiceError> {
        let room = require_room(state, room_id).await?;
        Ok(Self::for_room(state, room))
    }

    /// Plan against an already loaded room.
    pub fn for_room(state: &SharedState, room: RoomEntity) -> Self {
        let now = SystemTime::now();
        let sync = state.playback().current(room.id);
        let position_ms = estimate_position(&room.playback, sync.start_at(), now);
        Self {
            room,
            sync,
            now,
            position_ms,
        }
    }

    /// Players whose connection is live.
    pub fn connected(&self) -> Vec<Uuid> {
        self.room.connected_player_ids()
    }

    /// Whether the transport runs or a start is scheduled.
    pub fn is_playing(&self) -> bool {
        !self.room.playback.paused || self.sync.start_at().is_some()
    }

    /// Persist the durable side of `transport`, then publish the planned sync state.
    pub async fn commit(
        self,
        state: &SharedState,
        transport: Transport,
    ) -> Result<(), ServiceError> {
        let update = match transport {
            Transport::Unchanged => None,
            Transport::Start { .. } => Some(PlaybackUpdate {
                paused: Some(false),
                ..PlaybackUpdate::default()
            }),
            Transport::Pause => Some(PlaybackUpdate {
                paused: Some(true),
                position_ms: Some(self.position_ms),
                ..PlaybackUpdate::default()
            }),
        };
        if let Some(update) = update {
            state
                .store()
                .update_playback(self.room.id, self.room.owner_id.clone(), update)
                .await?;
        }
        state.playback().commit(self.room.id, self.sync);
        Ok(())
    }
}

/// Drop a departed player from the handshake. Its absence may release a
/// pending start for the players that remain.
pub async fn forget_player(
    state: &SharedState,
    room_id: Uuid,
    player_id: Uuid,
) -> Result<(), ServiceError> {
    let mut plan = SyncPlan::load(state, room_id).await?;
    let connected = plan.connected();
    let lead = state.config().play_lead_time;
    let transport = plan.sync.player_gone(player_id, &connected, plan.now, lead);
    plan.commit(state, transport).await
}
