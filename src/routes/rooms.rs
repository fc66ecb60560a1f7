use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::{
        requests::{
            CreatePlaylistRequest, CreateRoomRequest, CreateRoomResponse, JoinRoomRequest,
            JoinRoomResponse, OwnerJoinRequest, OwnerLeaveRequest, OwnerTokenResponse,
            PlayerLeaveRequest, RoomPhaseResponse,
        },
        room::{PlaylistSummary, RoomSnapshot},
    },
    error::AppError,
    services::{lifecycle_service, room_service},
    state::SharedState,
};

/// Routes handling room bootstrap, roster hand-off and playlists.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rooms", post(create_room))
        .route("/rooms/{id}", get(get_room))
        .route("/rooms/{id}/phase", get(get_room_phase))
        .route("/rooms/{id}/owner", post(owner_join))
        .route("/rooms/{id}/owner/leave", post(owner_leave))
        .route("/rooms/{id}/players", post(join_room))
        .route("/rooms/{id}/players/{player_id}/leave", post(leave_room))
        .route("/playlists", post(create_playlist))
}

/// Open a new room owned by the caller.
#[utoipa::path(
    post,
    path = "/rooms",
    tag = "rooms",
    request_body = CreateRoomRequest,
    responses(
        (status = 200, description = "Room created", body = CreateRoomResponse),
        (status = 400, description = "Invalid payload")
    )
)]
pub async fn create_room(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateRoomRequest>>,
) -> Result<Json<CreateRoomResponse>, AppError> {
    let response = room_service::create_room(&state, payload).await?;
    Ok(Json(response))
}

/// Return the current snapshot of a room.
#[utoipa::path(
    get,
    path = "/rooms/{id}",
    tag = "rooms",
    params(("id" = Uuid, Path, description = "Room identifier")),
    responses(
        (status = 200, description = "Room snapshot", body = RoomSnapshot),
        (status = 404, description = "Unknown room")
    )
)]
pub async fn get_room(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RoomSnapshot>, AppError> {
    let snapshot = room_service::get_room(&state, id).await?;
    Ok(Json(snapshot))
}

/// Report whether the room is active, waiting for its owner, or closed.
#[utoipa::path(
    get,
    path = "/rooms/{id}/phase",
    tag = "rooms",
    params(("id" = Uuid, Path, description = "Room identifier")),
    responses((status = 200, description = "Lifecycle phase", body = RoomPhaseResponse))
)]
pub async fn get_room_phase(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RoomPhaseResponse>, AppError> {
    let phase = lifecycle_service::room_phase(&state, id).await?;
    Ok(Json(RoomPhaseResponse { phase }))
}

/// Hand the owner token back to the room owner.
#[utoipa::path(
    post,
    path = "/rooms/{id}/owner",
    tag = "rooms",
    params(("id" = Uuid, Path, description = "Room identifier")),
    request_body = OwnerJoinRequest,
    responses(
        (status = 200, description = "Owner token", body = OwnerTokenResponse),
        (status = 403, description = "Caller is not the owner"),
        (status = 404, description = "Unknown room")
    )
)]
pub async fn owner_join(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<OwnerJoinRequest>>,
) -> Result<Json<OwnerTokenResponse>, AppError> {
    let response = room_service::owner_join(&state, id, &payload.owner_id).await?;
    Ok(Json(response))
}

/// Owner leaves the room; it closes now or after the grace period.
#[utoipa::path(
    post,
    path = "/rooms/{id}/owner/leave",
    tag = "rooms",
    params(("id" = Uuid, Path, description = "Room identifier")),
    request_body = OwnerLeaveRequest,
    responses(
        (status = 204, description = "Owner marked absent"),
        (status = 401, description = "Invalid owner token")
    )
)]
pub async fn owner_leave(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<OwnerLeaveRequest>>,
) -> Result<StatusCode, AppError> {
    room_service::owner_leave(&state, id, &payload.owner_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Add a player to the room roster.
#[utoipa::path(
    post,
    path = "/rooms/{id}/players",
    tag = "rooms",
    params(("id" = Uuid, Path, description = "Room identifier")),
    request_body = JoinRoomRequest,
    responses(
        (status = 200, description = "Player joined", body = JoinRoomResponse),
        (status = 404, description = "Unknown room")
    )
)]
pub async fn join_room(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<JoinRoomRequest>>,
) -> Result<Json<JoinRoomResponse>, AppError> {
    let response = room_service::join_room(&state, id, payload).await?;
    Ok(Json(response))
}

/// Remove the calling player from the room.
#[utoipa::path(
    post,
    path = "/rooms/{id}/players/{player_id}/leave",
    tag = "rooms",
    params(
        ("id" = Uuid, Path, description = "Room identifier"),
        ("player_id" = Uuid, Path, description = "Player identifier")
    ),
    request_body = PlayerLeaveRequest,
    responses(
        (status = 204, description = "Player removed"),
        (status = 401, description = "Invalid player token")
    )
)]
pub async fn leave_room(
    State(state): State<SharedState>,
    Path((id, player_id)): Path<(Uuid, Uuid)>,
    Valid(Json(payload)): Valid<Json<PlayerLeaveRequest>>,
) -> Result<StatusCode, AppError> {
    room_service::leave_room(&state, id, player_id, &payload.player_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Register a playlist that rooms can load.
#[utoipa::path(
    post,
    path = "/playlists",
    tag = "rooms",
    request_body = CreatePlaylistRequest,
    responses(
        (status = 200, description = "Playlist stored", body = PlaylistSummary),
        (status = 400, description = "Invalid payload")
    )
)]
pub async fn create_playlist(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreatePlaylistRequest>>,
) -> Result<Json<PlaylistSummary>, AppError> {
    let summary = room_service::create_playlist(&state, payload).await?;
    Ok(Json(summary))
}
