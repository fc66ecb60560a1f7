use axum::{
    Router,
    extract::{Path, Query, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
    routing::get,
};
use uuid::Uuid;

use crate::{
    dto::ws::ConnectParams,
    error::AppError,
    services::websocket_service,
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/ws/rooms/{room_id}",
    tag = "realtime",
    params(("room_id" = Uuid, Path, description = "Room to join"), ConnectParams),
    responses(
        (status = 101, description = "Switching protocols to WebSocket"),
        (status = 401, description = "Invalid connection credentials"),
        (status = 404, description = "Unknown room")
    )
)]
/// Upgrade the HTTP connection into a room WebSocket session.
pub async fn ws_handler(
    State(state): State<SharedState>,
    Path(room_id): Path<Uuid>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let presence = websocket_service::resolve_presence(&state, room_id, &params).await?;
    let shared_state = state.clone();
    Ok(ws
        .on_upgrade(move |socket| {
            websocket_service::handle_socket(shared_state, socket, room_id, presence)
        })
        .into_response())
}

/// Configure the WebSocket endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/ws/rooms/{room_id}", get(ws_handler))
}
