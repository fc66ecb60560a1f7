use tracing::info;
use uuid::Uuid;

use crate::{
    dao::models::{PlaylistEntity, TrackEntity},
    dto::{
        requests::{
            CreatePlaylistRequest, CreateRoomRequest, CreateRoomResponse, JoinRoomRequest,
            JoinRoomResponse, OwnerTokenResponse,
        },
        room::{PlayerSummary, PlaylistSummary, RoomSnapshot},
    },
    error::ServiceError,
    services::{
        lifecycle_service, playback_service,
        room_events::{self, require_room},
    },
    state::{PresenceKey, SharedState, TokenError},
};

/// Open a room and hand its owner a command token.
pub async fn create_room(
    state: &SharedState,
    request: CreateRoomRequest,
) -> Result<CreateRoomResponse, ServiceError> {
    let room = state
        .store()
        .create_room(request.name, request.owner_id)
        .await?;
    let owner_token = state.tokens().owner_token(room.id);
    state.hubs().room(room.id);
    info!(room_id = %room.id, owner_id = %room.owner_id, "room created");

    let room = room_events::load_snapshot(state, room.id).await?;
    Ok(CreateRoomResponse { room, owner_token })
}

/// Current snapshot of a room.
pub async fn get_room(state: &SharedState, room_id: Uuid) -> Result<RoomSnapshot, ServiceError> {
    room_events::load_snapshot(state, room_id).await
}

/// Return the owner token to the room owner, e.g. after a page reload.
pub async fn owner_join(
    state: &SharedState,
    room_id: Uuid,
    owner_id: &str,
) -> Result<OwnerTokenResponse, ServiceError> {
    let room = require_room(state, room_id).await?;
    if room.owner_id != owner_id {
        return Err(ServiceError::Forbidden("caller is not the room owner".into()));
    }
    Ok(OwnerTokenResponse {
        owner_token: state.tokens().owner_token(room_id),
    })
}

/// Explicit owner departure, regardless of how many owner sockets are open.
pub async fn owner_leave(
    state: &SharedState,
    room_id: Uuid,
    owner_token: &str,
) -> Result<(), ServiceError> {
    let room = require_room(state, room_id).await?;
    state
        .tokens()
        .validate_owner(room_id, owner_token)
        .map_err(unauthorized)?;
    lifecycle_service::owner_left(state, room_id, &room.owner_id).await
}

/// Add a participant to the roster and hand them a player token.
pub async fn join_room(
    state: &SharedState,
    room_id: Uuid,
    request: JoinRoomRequest,
) -> Result<JoinRoomResponse, ServiceError> {
    let player = state
        .store()
        .add_player(room_id, request.name, request.user_id)
        .await?;
    let player_token = state.tokens().player_token(room_id, player.id);
    info!(room_id = %room_id, player_id = %player.id, "player joined");

    let sync = state.playback().current(room_id);
    let summary = PlayerSummary::build(&player, &sync, None);
    room_events::broadcast_snapshot(state, room_id).await;
    Ok(JoinRoomResponse {
        player: summary,
        player_token,
    })
}

/// Voluntary departure of a player.
pub async fn leave_room(
    state: &SharedState,
    room_id: Uuid,
    player_id: Uuid,
    player_token: &str,
) -> Result<(), ServiceError> {
    require_room(state, room_id).await?;
    state
        .tokens()
        .validate_player(room_id, player_id, player_token)
        .map_err(unauthorized)?;
    remove_player(state, room_id, player_id).await
}

/// Drop a player from the roster and from every transient table, then check
/// whether the room became abandoned. Shared by leave and kick.
pub async fn remove_player(
    state: &SharedState,
    room_id: Uuid,
    player_id: Uuid,
) -> Result<(), ServiceError> {
    state.store().remove_player(room_id, player_id).await?;
    state.tokens().revoke_player(room_id, player_id);
    state.presence().forget(room_id, PresenceKey::Player(player_id));
    state.cooldowns().clear(room_id, player_id);
    playback_service::forget_player(state, room_id, player_id).await?;
    info!(room_id = %room_id, player_id = %player_id, "player removed");

    room_events::broadcast_snapshot(state, room_id).await;
    lifecycle_service::player_departed(state, room_id).await
}

/// Register a playlist rooms can load.
pub async fn create_playlist(
    state: &SharedState,
    request: CreatePlaylistRequest,
) -> Result<PlaylistSummary, ServiceError> {
    let playlist = PlaylistEntity {
        id: Uuid::new_v4(),
        name: request.name,
        items: request
            .items
            .into_iter()
            .map(|item| TrackEntity {
                title: item.title,
                url: item.url,
                starts_at_ms: item.starts_at_ms,
            })
            .collect(),
    };
    state.store().save_playlist(playlist.clone()).await?;
    info!(playlist_id = %playlist.id, items = playlist.items.len(), "playlist saved");
    Ok(PlaylistSummary::from(&playlist))
}

/// Map a token failure onto the authorization error.
pub fn unauthorized(err: TokenError) -> ServiceError {
    ServiceError::Unauthorized(err.to_string())
}
