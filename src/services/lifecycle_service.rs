//! Presence tracking and closure of abandoned rooms.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::events::CloseReason,
    error::ServiceError,
    services::{
        playback_service,
        room_events::{self, require_room},
    },
    state::{LifecyclePhase, PresenceKey, SharedState},
};

/// Current lifecycle phase of a room.
pub async fn room_phase(
    state: &SharedState,
    room_id: Uuid,
) -> Result<LifecyclePhase, ServiceError> {
    if state.store().find_room(room_id).await?.is_none() {
        return Ok(LifecyclePhase::Closed);
    }
    if state.owner_timers().is_armed(room_id) {
        Ok(LifecyclePhase::OwnerAbsentGrace)
    } else {
        Ok(LifecyclePhase::Active)
    }
}

/// Tear a room down. Running it on a room that is already gone is harmless.
pub async fn close_room(
    state: &SharedState,
    room_id: Uuid,
    reason: CloseReason,
) -> Result<(), ServiceError> {
    state.owner_timers().cancel(room_id);
    room_events::broadcast_closed(state, room_id, reason);

    let deleted = state.store().delete_room(room_id).await;
    if let Ok(true) = deleted {
        state.cleanup().room_deleted(room_id).await;
    }

    state.tokens().revoke_room(room_id);
    state.playback().clear_room(room_id);
    state.cooldowns().clear_room(room_id);
    state.presence().clear_room(room_id);
    state.hubs().remove(room_id);

    match deleted {
        Ok(existed) => {
            info!(room_id = %room_id, reason = ?reason, existed, "room closed");
            Ok(())
        }
        Err(err) => {
            warn!(room_id = %room_id, error = %err, "failed to delete closed room");
            Err(err.into())
        }
    }
}

/// Bind one owner connection to the room, cancelling any pending closure.
pub async fn owner_connected(
    state: &SharedState,
    room_id: Uuid,
    owner_id: &str,
) -> Result<(), ServiceError> {
    state.presence().acquire(room_id, PresenceKey::Owner);
    state
        .store()
        .set_owner_connected(room_id, owner_id.to_string(), true)
        .await?;
    if state.owner_timers().cancel(room_id) {
        info!(room_id = %room_id, "owner returned; closure cancelled");
    }
    room_events::broadcast_snapshot(state, room_id).await;
    Ok(())
}

/// One owner connection ended. The owner only counts as gone once their
/// last connection is released.
pub async fn owner_disconnected(
    state: &SharedState,
    room_id: Uuid,
    owner_id: &str,
) -> Result<(), ServiceError> {
    if !state.presence().release(room_id, PresenceKey::Owner) {
        debug!(room_id = %room_id, "owner still connected elsewhere");
        return Ok(());
    }
    owner_absent(state, room_id, owner_id).await
}

/// Explicit owner departure: every owner connection stops counting.
pub async fn owner_left(
    state: &SharedState,
    room_id: Uuid,
    owner_id: &str,
) -> Result<(), ServiceError> {
    state.presence().forget(room_id, PresenceKey::Owner);
    owner_absent(state, room_id, owner_id).await
}

/// Close right away when nobody else is connected, otherwise give the owner
/// the grace period to come back.
async fn owner_absent(
    state: &SharedState,
    room_id: Uuid,
    owner_id: &str,
) -> Result<(), ServiceError> {
    state
        .store()
        .set_owner_connected(room_id, owner_id.to_string(), false)
        .await?;
    let room = require_room(state, room_id).await?;

    if room.connected_player_ids().is_empty() {
        return close_room(state, room_id, CloseReason::OwnerLeftEmpty).await;
    }

    schedule_owner_timeout(state, room_id);
    room_events::broadcast_snapshot(state, room_id).await;
    Ok(())
}

/// Bind one of a player's connections.
pub async fn player_connected(
    state: &SharedState,
    room_id: Uuid,
    player_id: Uuid,
) -> Result<(), ServiceError> {
    state.presence().acquire(room_id, PresenceKey::Player(player_id));
    state
        .store()
        .set_player_connected(room_id, player_id, true)
        .await?;
    room_events::broadcast_snapshot(state, room_id).await;
    Ok(())
}

/// One of a player's connections ended; the last one marks them offline.
pub async fn player_disconnected(
    state: &SharedState,
    room_id: Uuid,
    player_id: Uuid,
) -> Result<(), ServiceError> {
    if !state.presence().release(room_id, PresenceKey::Player(player_id)) {
        debug!(room_id = %room_id, player_id = %player_id, "player still connected elsewhere");
        return Ok(());
    }
    state
        .store()
        .set_player_connected(room_id, player_id, false)
        .await?;
    playback_service::forget_player(state, room_id, player_id).await?;
    room_events::broadcast_snapshot(state, room_id).await;
    player_departed(state, room_id).await
}

/// Close the room once the owner is absent and the last player is gone.
pub async fn player_departed(state: &SharedState, room_id: Uuid) -> Result<(), ServiceError> {
    let Some(room) = state.store().find_room(room_id).await? else {
        return Ok(());
    };
    if !room.owner_connected && room.connected_player_ids().is_empty() {
        close_room(state, room_id, CloseReason::OwnerLeftEmpty).await?;
    }
    Ok(())
}

fn schedule_owner_timeout(state: &SharedState, room_id: Uuid) {
    let grace = state.config().owner_grace;
    let task_state = Arc::clone(state);
    state.owner_timers().schedule(room_id, grace, move |generation| async move {
        if !task_state.owner_timers().finish(room_id, generation) {
            return;
        }
        owner_grace_elapsed(&task_state, room_id).await;
    });
    info!(room_id = %room_id, grace_ms = grace.as_millis() as u64, "owner absent; closure scheduled");
}

async fn owner_grace_elapsed(state: &SharedState, room_id: Uuid) {
    match state.store().find_room(room_id).await {
        Ok(Some(room)) if !room.owner_connected => {
            if let Err(err) = close_room(state, room_id, CloseReason::OwnerTimeout).await {
                warn!(room_id = %room_id, error = %err, "owner timeout closure failed");
            }
        }
        Ok(Some(_)) => debug!(room_id = %room_id, "owner back before timeout"),
        Ok(None) => debug!(room_id = %room_id, "room already gone at owner timeout"),
        Err(err) => {
            warn!(room_id = %room_id, error = %err, "failed to re-read room at owner timeout")
        }
    }
}
