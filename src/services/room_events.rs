use std::time::SystemTime;

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dao::models::RoomEntity,
    dto::{
        epoch_millis,
        events::{
            BuzzerCooldownEvent, BuzzerEvent, BuzzerResolvedEvent, CloseReason,
            CommandErrorEvent, EVENT_BUZZER, EVENT_BUZZER_COOLDOWN, EVENT_BUZZER_RESOLVED,
            EVENT_COMMAND_ERROR, EVENT_ROOM_CLOSED, EVENT_ROOM_SNAPSHOT, RoomClosedEvent,
            RoomEvent,
        },
        room::{PlayerSummary, RoomSnapshot},
    },
    error::ServiceError,
    state::SharedState,
};

/// Fetch a room, mapping absence to [`ServiceError::NotFound`].
pub async fn require_room(state: &SharedState, room_id: Uuid) -> Result<RoomEntity, ServiceError> {
    state
        .store()
        .find_room(room_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("room `{room_id}` not found")))
}

/// Reload the room from the repository and merge it with the transient tables.
pub async fn load_snapshot(
    state: &SharedState,
    room_id: Uuid,
) -> Result<RoomSnapshot, ServiceError> {
    let store = state.store();
    let room = require_room(state, room_id).await?;
    let playlist = match room.playlist_id {
        Some(playlist_id) => store.find_playlist(playlist_id).await?,
        None => None,
    };
    let sync = state.playback().current(room_id);
    let cooldowns = state.cooldowns().for_room(room_id, SystemTime::now());
    Ok(RoomSnapshot::build(&room, playlist.as_ref(), &sync, &cooldowns))
}

/// Broadcast a fresh snapshot. A failed reload skips the broadcast; the next
/// mutation heals the clients.
pub async fn broadcast_snapshot(state: &SharedState, room_id: Uuid) {
    match load_snapshot(state, room_id).await {
        Ok(snapshot) => send_room_event(state, room_id, EVENT_ROOM_SNAPSHOT, &snapshot),
        Err(err) => {
            warn!(room_id = %room_id, error = %err, "snapshot reload failed; skipping broadcast");
        }
    }
}

/// Tell every subscriber the room is going away.
pub fn broadcast_closed(state: &SharedState, room_id: Uuid, reason: CloseReason) {
    send_room_event(state, room_id, EVENT_ROOM_CLOSED, &RoomClosedEvent { reason });
}

/// Announce an accepted buzz.
pub fn broadcast_buzzer(state: &SharedState, room_id: Uuid, player: PlayerSummary) {
    send_room_event(state, room_id, EVENT_BUZZER, &BuzzerEvent { player });
}

/// Announce the owner's verdict on a buzz.
pub fn broadcast_buzzer_resolved(
    state: &SharedState,
    room_id: Uuid,
    player_id: Uuid,
    correct: bool,
) {
    let payload = BuzzerResolvedEvent { player_id, correct };
    send_room_event(state, room_id, EVENT_BUZZER_RESOLVED, &payload);
}

/// Announce the lockout of a player who answered wrong.
pub fn broadcast_buzzer_cooldown(
    state: &SharedState,
    room_id: Uuid,
    player_id: Uuid,
    until: SystemTime,
) {
    let payload = BuzzerCooldownEvent {
        player_id,
        until: epoch_millis(until),
    };
    send_room_event(state, room_id, EVENT_BUZZER_COOLDOWN, &payload);
}

/// Build the error event sent back to the connection whose command failed.
pub fn command_error(
    room_id: Uuid,
    action: String,
    err: &ServiceError,
) -> serde_json::Result<RoomEvent> {
    let payload = CommandErrorEvent {
        action,
        message: err.to_string(),
        status: err.status(),
    };
    let mut event = RoomEvent::json(EVENT_COMMAND_ERROR, room_id, &payload)?;
    event.timestamp = Some(SystemTime::now());
    Ok(event)
}

fn send_room_event<T>(state: &SharedState, room_id: Uuid, kind: &'static str, payload: &T)
where
    T: Serialize,
{
    match RoomEvent::json(kind, room_id, payload) {
        Ok(event) => {
            state.hubs().broadcast(room_id, event);
        }
        Err(err) => warn!(room_id = %room_id, kind, error = %err, "failed to serialize room event"),
    }
}
