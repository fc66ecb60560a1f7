use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the quiz room backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::rooms::create_room,
        crate::routes::rooms::get_room,
        crate::routes::rooms::get_room_phase,
        crate::routes::rooms::owner_join,
        crate::routes::rooms::owner_leave,
        crate::routes::rooms::join_room,
        crate::routes::rooms::leave_room,
        crate::routes::rooms::create_playlist,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::ws::CommandEnvelope,
            crate::dto::room::RoomSnapshot,
            crate::dto::events::RoomClosedEvent,
            crate::dto::events::CloseReason,
            crate::dto::events::BuzzerEvent,
            crate::dto::events::BuzzerResolvedEvent,
            crate::dto::events::BuzzerCooldownEvent,
            crate::dto::events::CommandErrorEvent,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "rooms", description = "Room creation, roster and playlists"),
        (name = "realtime", description = "WebSocket room sessions"),
    )
)]
pub struct ApiDoc;
