//! Authorization and execution of room commands received over WebSocket.
//!
//! Every command runs the same pipeline: authorize against the room, apply the
//! durable mutation through the repository, commit the sync or cooldown
//! change, then broadcast a fresh snapshot. Any failure before the commit
//! leaves the transient tables as they were.

use std::time::SystemTime;

use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dao::models::{PlaybackUpdate, RoomEntity},
    dto::{
        room::PlayerSummary,
        ws::{CommandPayload, CommandScope, RoomAction},
    },
    error::ServiceError,
    services::{
        playback_service::SyncPlan,
        room_events::{self, require_room},
        room_service::{self, unauthorized},
    },
    state::{SharedState, Transport},
};

/// Identity proven by the tokens of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// Holder of the owner token.
    Owner,
    /// Holder of the token of this player.
    Player(Uuid),
}

/// Authorize and execute a command payload against `room_id`.
pub async fn dispatch(
    state: &SharedState,
    room_id: Uuid,
    payload: Value,
) -> Result<(), ServiceError> {
    let command = CommandPayload::parse(payload)?;
    let room = require_room(state, room_id).await?;
    let caller = authorize(state, &room, &command)?;
    debug!(
        room_id = %room_id,
        action = command.action.name(),
        caller = ?caller,
        "dispatching command"
    );

    match (command.action.clone(), caller) {
        (RoomAction::Kick, Caller::Owner) => {
            let player_id = command.require_player_id()?;
            require_player(&room, player_id)?;
            room_service::remove_player(state, room_id, player_id).await?;
            info!(room_id = %room_id, player_id = %player_id, "player kicked");
            return Ok(());
        }
        (RoomAction::ScoreAdd { delta }, Caller::Owner) => {
            let player_id = command.require_player_id()?;
            state
                .store()
                .add_score(room_id, room.owner_id.clone(), player_id, delta)
                .await?;
        }
        (RoomAction::ScoreSet { score }, Caller::Owner) => {
            let player_id = command.require_player_id()?;
            state
                .store()
                .set_score(room_id, room.owner_id.clone(), player_id, score)
                .await?;
        }
        (RoomAction::PlaylistLoad { playlist_id }, Caller::Owner) => {
            state
                .store()
                .load_playlist(room_id, room.owner_id.clone(), playlist_id)
                .await?;
            let mut sync = state.playback().current(room_id);
            sync.reset();
            state.playback().commit(room_id, sync);
        }
        (
            RoomAction::PlaybackSet {
                track_index,
                paused,
                position_ms,
            },
            Caller::Owner,
        ) => {
            let track_index = non_negative("trackIndex", track_index)? as usize;
            let position_ms = non_negative("positionMs", position_ms.unwrap_or(0))?;
            set_track(state, room, track_index, position_ms, paused.unwrap_or(true)).await?;
        }
        (RoomAction::PlaybackPause { paused }, Caller::Owner) => {
            pause(state, room, paused).await?;
        }
        (RoomAction::PlaybackSeek { position_ms }, Caller::Owner) => {
            let position_ms = non_negative("positionMs", position_ms)?;
            seek(state, room, position_ms).await?;
        }
        (RoomAction::BuzzResolve { correct }, Caller::Owner) => {
            resolve_buzz(state, room, correct).await?;
        }
        (RoomAction::PlaybackBuffer { buffering }, Caller::Player(player_id)) => {
            let mut plan = SyncPlan::for_room(state, room);
            let connected = plan.connected();
            if !connected.contains(&player_id) {
                return Err(ServiceError::InvalidInput(
                    "buffering reports need a live player connection".into(),
                ));
            }
            let paused = plan.room.playback.paused;
            let transport = plan.sync.set_buffering(
                player_id,
                buffering,
                &connected,
                paused,
                plan.now,
                state.config().play_lead_time,
            );
            plan.commit(state, transport).await?;
        }
        (RoomAction::Buzz, Caller::Player(player_id)) => {
            buzz(state, room, player_id).await?;
        }
        (action, caller) => {
            return Err(ServiceError::Internal(format!(
                "`{}` cannot be issued as {caller:?}",
                action.name()
            )));
        }
    }

    room_events::broadcast_snapshot(state, room_id).await;
    Ok(())
}

/// Check the tokens of `command` against the scope of its action.
///
/// A missing or mismatched token is `Unauthorized`; a valid player token
/// presented for an owner action is `Forbidden`.
pub fn authorize(
    state: &SharedState,
    room: &RoomEntity,
    command: &CommandPayload,
) -> Result<Caller, ServiceError> {
    let tokens = state.tokens();
    match command.action.scope() {
        CommandScope::Owner => {
            if let Some(token) = command.owner_token.as_deref() {
                tokens.validate_owner(room.id, token).map_err(unauthorized)?;
                return Ok(Caller::Owner);
            }
            let holds_player_token = command
                .player_token
                .as_deref()
                .is_some_and(|token| tokens.player_for_token(room.id, token).is_some());
            if holds_player_token {
                Err(ServiceError::Forbidden(format!(
                    "`{}` is reserved to the room owner",
                    command.action.name()
                )))
            } else {
                Err(ServiceError::Unauthorized("missing owner token".into()))
            }
        }
        CommandScope::Player => {
            let token = command
                .player_token
                .as_deref()
                .ok_or_else(|| ServiceError::Unauthorized("missing player token".into()))?;
            let player_id = match command.player_id {
                Some(player_id) => {
                    tokens
                        .validate_player(room.id, player_id, token)
                        .map_err(unauthorized)?;
                    player_id
                }
                None => tokens
                    .player_for_token(room.id, token)
                    .ok_or_else(|| ServiceError::Unauthorized("unknown player token".into()))?,
            };
            require_player(room, player_id)?;
            Ok(Caller::Player(player_id))
        }
    }
}

fn require_player(room: &RoomEntity, player_id: Uuid) -> Result<(), ServiceError> {
    if room.players.contains_key(&player_id) {
        Ok(())
    } else {
        Err(ServiceError::NotFound(format!(
            "player `{player_id}` not found in room `{}`",
            room.id
        )))
    }
}

fn non_negative(field: &str, value: i64) -> Result<u64, ServiceError> {
    u64::try_from(value).map_err(|_| ServiceError::InvalidInput(format!("{field} must be >= 0")))
}

/// Persist `update` on behalf of the room owner.
async fn update_playback(
    state: &SharedState,
    room: &RoomEntity,
    update: PlaybackUpdate,
) -> Result<(), ServiceError> {
    state
        .store()
        .update_playback(room.id, room.owner_id.clone(), update)
        .await?;
    Ok(())
}

async fn set_track(
    state: &SharedState,
    room: RoomEntity,
    track_index: usize,
    position_ms: u64,
    paused: bool,
) -> Result<(), ServiceError> {
    update_playback(
        state,
        &room,
        PlaybackUpdate {
            track_index: Some(track_index),
            paused: Some(true),
            position_ms: Some(position_ms),
        },
    )
    .await?;

    let mut plan = SyncPlan::for_room(state, room);
    plan.room.playback.paused = true;
    plan.sync.reset();
    let transport = if paused {
        Transport::Unchanged
    } else {
        let connected = plan.connected();
        plan.sync
            .request_play(&connected, true, plan.now, state.config().play_lead_time)
    };
    plan.commit(state, transport).await
}

async fn pause(state: &SharedState, room: RoomEntity, paused: bool) -> Result<(), ServiceError> {
    let mut plan = SyncPlan::for_room(state, room);
    let transport = if paused {
        plan.sync.request_pause()
    } else {
        plan.sync.take_buzz();
        let connected = plan.connected();
        let transport_paused = plan.room.playback.paused;
        plan.sync.request_play(
            &connected,
            transport_paused,
            plan.now,
            state.config().play_lead_time,
        )
    };
    plan.commit(state, transport).await
}

async fn seek(state: &SharedState, room: RoomEntity, position_ms: u64) -> Result<(), ServiceError> {
    let was_playing = {
        let sync = state.playback().current(room.id);
        !room.playback.paused || sync.pending_play()
    };
    update_playback(
        state,
        &room,
        PlaybackUpdate {
            paused: Some(true),
            position_ms: Some(position_ms),
            ..PlaybackUpdate::default()
        },
    )
    .await?;

    let mut plan = SyncPlan::for_room(state, room);
    plan.room.playback.paused = true;
    plan.sync.reset();
    let transport = if was_playing {
        let connected = plan.connected();
        plan.sync
            .request_play(&connected, true, plan.now, state.config().play_lead_time)
    } else {
        Transport::Unchanged
    };
    plan.commit(state, transport).await
}

async fn buzz(state: &SharedState, room: RoomEntity, player_id: Uuid) -> Result<(), ServiceError> {
    let room_id = room.id;
    let now = SystemTime::now();
    if let Some(until) = state.cooldowns().active_until(room_id, player_id, now) {
        let remaining = until.duration_since(now).unwrap_or_default();
        return Err(ServiceError::InvalidInput(format!(
            "buzz cooldown active for another {} ms",
            remaining.as_millis()
        )));
    }

    let mut plan = SyncPlan::for_room(state, room);
    if plan.sync.buzzed_by().is_some() {
        return Err(ServiceError::InvalidInput(
            "another buzz is awaiting resolution".into(),
        ));
    }
    if !plan.is_playing() {
        return Err(ServiceError::InvalidInput("nothing is playing".into()));
    }

    plan.sync.begin_buzz(player_id);
    let summary = plan
        .room
        .players
        .get(&player_id)
        .map(|player| PlayerSummary::build(player, &plan.sync, None));
    plan.commit(state, Transport::Pause).await?;

    if let Some(summary) = summary {
        room_events::broadcast_buzzer(state, room_id, summary);
    }
    info!(room_id = %room_id, player_id = %player_id, "buzz accepted");
    Ok(())
}

async fn resolve_buzz(
    state: &SharedState,
    room: RoomEntity,
    correct: bool,
) -> Result<(), ServiceError> {
    let room_id = room.id;
    let mut plan = SyncPlan::for_room(state, room);
    let player_id = plan
        .sync
        .take_buzz()
        .ok_or_else(|| ServiceError::InvalidInput("no buzz awaiting resolution".into()))?;

    if correct {
        let store = state.store();
        let owner_id = plan.room.owner_id.clone();
        let next = plan.room.playback.track_index + 1;
        let has_next = match plan.room.playlist_id {
            Some(playlist_id) => store
                .find_playlist(playlist_id)
                .await?
                .is_some_and(|playlist| next < playlist.items.len()),
            None => false,
        };
        if has_next {
            update_playback(
                state,
                &plan.room,
                PlaybackUpdate {
                    track_index: Some(next),
                    paused: Some(true),
                    position_ms: Some(0),
                },
            )
            .await?;
            plan.sync.reset();
            plan.commit(state, Transport::Unchanged).await?;
        } else {
            plan.sync.request_pause();
            plan.commit(state, Transport::Pause).await?;
        }

        // The buzz is already consumed here: a repeated verdict is rejected, never scored twice.
        state.cooldowns().clear(room_id, player_id);
        store
            .add_score(
                room_id,
                owner_id,
                player_id,
                state.config().correct_answer_points,
            )
            .await?;
        room_events::broadcast_buzzer_resolved(state, room_id, player_id, true);
        info!(
            room_id = %room_id,
            player_id = %player_id,
            advanced = has_next,
            "buzz resolved as correct"
        );
    } else {
        let connected = plan.connected();
        let transport_paused = plan.room.playback.paused;
        let transport = plan.sync.request_play(
            &connected,
            transport_paused,
            plan.now,
            state.config().play_lead_time,
        );
        let now = plan.now;
        plan.commit(state, transport).await?;

        let until = state
            .cooldowns()
            .start(room_id, player_id, now, state.config().buzz_cooldown);
        room_events::broadcast_buzzer_resolved(state, room_id, player_id, false);
        room_events::broadcast_buzzer_cooldown(state, room_id, player_id, until);
        info!(room_id = %room_id, player_id = %player_id, "buzz resolved as wrong");
    }
    Ok(())
}
