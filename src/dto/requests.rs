//! REST request and response bodies.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dto::room::{PlayerSummary, RoomSnapshot},
    state::LifecyclePhase,
};

/// Payload used to open a new room.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    /// Identity of the owner as issued by the session layer.
    #[validate(length(min = 1, max = 128))]
    pub owner_id: String,
}

/// Room created along with the owner's command token.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomResponse {
    pub room: RoomSnapshot,
    pub owner_token: String,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OwnerJoinRequest {
    #[validate(length(min = 1, max = 128))]
    pub owner_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OwnerTokenResponse {
    pub owner_token: String,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OwnerLeaveRequest {
    #[validate(length(min = 1))]
    pub owner_token: String,
}

/// Payload used by a participant to enter a room.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    #[validate(length(min = 1, max = 32))]
    pub name: String,
    /// Authenticated user behind the player, if any.
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomResponse {
    pub player: PlayerSummary,
    pub player_token: String,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PlayerLeaveRequest {
    #[validate(length(min = 1))]
    pub player_token: String,
}

/// Lifecycle phase of a room; closed rooms still answer.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomPhaseResponse {
    pub phase: LifecyclePhase,
}

/// Playlist registered ahead of a `playlist.load` command.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlaylistRequest {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    #[validate(length(min = 1), nested)]
    pub items: Vec<TrackInput>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TrackInput {
    #[validate(length(min = 1))]
    pub title: String,
    #[validate(url)]
    pub url: String,
    /// Offset (milliseconds) where the preview should start.
    #[serde(default)]
    pub starts_at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playlist_requires_items_with_urls() {
        let empty: CreatePlaylistRequest =
            serde_json::from_str(r#"{ "name": "Eighties", "items": [] }"#).unwrap();
        assert!(empty.validate().is_err());

        let bad_url: CreatePlaylistRequest = serde_json::from_str(
            r#"{ "name": "Eighties", "items": [{ "title": "Take On Me", "url": "not a url" }] }"#,
        )
        .unwrap();
        assert!(bad_url.validate().is_err());

        let valid: CreatePlaylistRequest = serde_json::from_str(
            r#"{ "name": "Eighties", "items": [{ "title": "Take On Me", "url": "https://cdn.example/a.mp3", "startsAtMs": 3000 }] }"#,
        )
        .unwrap();
        assert!(valid.validate().is_ok());
        assert_eq!(valid.items[0].starts_at_ms, 3000);
    }

    #[test]
    fn join_rejects_blank_names() {
        let request: JoinRoomRequest = serde_json::from_str(r#"{ "name": "" }"#).unwrap();
        assert!(request.validate().is_err());
    }
}
