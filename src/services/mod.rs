/// Authorization and execution of WebSocket room commands.
pub mod command_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Presence tracking and room closure.
pub mod lifecycle_service;
/// Plan/commit helpers around the readiness handshake.
pub mod playback_service;
/// Room event generation and fan-out.
pub mod room_events;
/// REST-facing room, roster and playlist operations.
pub mod room_service;
/// WebSocket connection and message handling service.
pub mod websocket_service;
