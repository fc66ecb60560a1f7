use serde::Deserialize;
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::ServiceError;

/// Envelope type accepted on room sockets.
pub const COMMAND_TYPE: &str = "room.command";

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
/// Optional credentials binding a socket to the owner or to a player.
pub struct ConnectParams {
    /// Owner token returned when creating or re-joining the room.
    pub owner_token: Option<String>,
    /// Player the token belongs to; resolved from the token when omitted.
    pub player_id: Option<Uuid>,
    /// Player token returned by the join call.
    pub player_token: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Message accepted from room WebSocket clients.
pub struct CommandEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub room_id: Uuid,
    #[schema(value_type = Object)]
    pub payload: Value,
}

impl CommandEnvelope {
    /// Parse a raw text frame.
    pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Name of the requested action, for error reporting even when the payload is malformed.
    pub fn action_name(&self) -> String {
        self.payload
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string()
    }
}

/// Credentials and action carried by a command envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPayload {
    #[serde(default)]
    pub owner_token: Option<String>,
    #[serde(default)]
    pub player_token: Option<String>,
    /// Target of owner actions (`kick`, `score.*`), issuer of player actions.
    #[serde(default)]
    pub player_id: Option<Uuid>,
    #[serde(flatten)]
    pub action: RoomAction,
}

impl CommandPayload {
    /// Decode the payload, mapping any shape error to invalid input.
    pub fn parse(payload: Value) -> Result<Self, ServiceError> {
        serde_json::from_value(payload)
            .map_err(|err| ServiceError::InvalidInput(format!("malformed command: {err}")))
    }

    /// `player_id` or an invalid-input error naming the action.
    pub fn require_player_id(&self) -> Result<Uuid, ServiceError> {
        self.player_id.ok_or_else(|| {
            ServiceError::InvalidInput(format!("`{}` requires playerId", self.action.name()))
        })
    }
}

/// Who may issue an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandScope {
    /// Requires the room owner token.
    Owner,
    /// Requires the token of the player named by `playerId`.
    Player,
}

/// Actions understood by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action")]
pub enum RoomAction {
    #[serde(rename = "kick")]
    Kick,
    #[serde(rename = "score.add")]
    ScoreAdd { delta: i64 },
    #[serde(rename = "score.set")]
    ScoreSet { score: i64 },
    #[serde(rename = "playlist.load", rename_all = "camelCase")]
    PlaylistLoad { playlist_id: Uuid },
    #[serde(rename = "playback.set", rename_all = "camelCase")]
    PlaybackSet {
        track_index: i64,
        #[serde(default)]
        paused: Option<bool>,
        #[serde(default)]
        position_ms: Option<i64>,
    },
    #[serde(rename = "playback.pause")]
    PlaybackPause { paused: bool },
    #[serde(rename = "playback.seek", rename_all = "camelCase")]
    PlaybackSeek { position_ms: i64 },
    #[serde(rename = "playback.buffer")]
    PlaybackBuffer { buffering: bool },
    #[serde(rename = "buzz")]
    Buzz,
    #[serde(rename = "buzz.resolve")]
    BuzzResolve { correct: bool },
}

impl RoomAction {
    /// Wire name of the action.
    pub fn name(&self) -> &'static str {
        match self {
            RoomAction::Kick => "kick",
            RoomAction::ScoreAdd { .. } => "score.add",
            RoomAction::ScoreSet { .. } => "score.set",
            RoomAction::PlaylistLoad { .. } => "playlist.load",
            RoomAction::PlaybackSet { .. } => "playback.set",
            RoomAction::PlaybackPause { .. } => "playback.pause",
            RoomAction::PlaybackSeek { .. } => "playback.seek",
            RoomAction::PlaybackBuffer { .. } => "playback.buffer",
            RoomAction::Buzz => "buzz",
            RoomAction::BuzzResolve { .. } => "buzz.resolve",
        }
    }

    /// Token required to issue the action.
    pub fn scope(&self) -> CommandScope {
        match self {
            RoomAction::PlaybackBuffer { .. } | RoomAction::Buzz => CommandScope::Player,
            _ => CommandScope::Owner,
        }
    }
}
