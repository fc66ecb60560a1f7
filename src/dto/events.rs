use std::time::SystemTime;

use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dto::{format_system_time, room::PlayerSummary};

pub const EVENT_ROOM_SNAPSHOT: &str = "room.snapshot";
pub const EVENT_ROOM_CLOSED: &str = "room.closed";
pub const EVENT_BUZZER: &str = "buzzer";
pub const EVENT_BUZZER_RESOLVED: &str = "buzzer.resolved";
pub const EVENT_BUZZER_COOLDOWN: &str = "buzzer.cooldown";
pub const EVENT_COMMAND_ERROR: &str = "room.command.error";

/// Immutable message fanned out by a room hub.
#[derive(Clone, Debug)]
pub struct RoomEvent {
    pub kind: &'static str,
    pub room_id: Uuid,
    /// Filled in by the hub when the publisher leaves it empty.
    pub timestamp: Option<SystemTime>,
    pub payload: Value,
}

impl RoomEvent {
    /// Serialise `payload` into a new event of the given kind.
    pub fn json<T>(kind: &'static str, room_id: Uuid, payload: &T) -> serde_json::Result<Self>
    where
        T: Serialize,
    {
        Ok(Self {
            kind,
            room_id,
            timestamp: None,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Render the wire frame sent to clients.
    pub fn to_frame(&self) -> serde_json::Result<String> {
        let timestamp = self.timestamp.unwrap_or_else(SystemTime::now);
        serde_json::to_string(&EventFrame {
            kind: self.kind,
            room_id: self.room_id,
            timestamp: format_system_time(timestamp),
            payload: &self.payload,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventFrame<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    room_id: Uuid,
    timestamp: String,
    payload: &'a Value,
}

/// Machine-readable reason attached to `room.closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The owner left and nobody else was connected.
    OwnerLeftEmpty,
    /// The owner did not come back before the grace period elapsed.
    OwnerTimeout,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a room is torn down.
pub struct RoomClosedEvent {
    pub reason: CloseReason,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a player buzzes in.
pub struct BuzzerEvent {
    pub player: PlayerSummary,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Broadcast once the owner judged the pending buzz.
pub struct BuzzerResolvedEvent {
    pub player_id: Uuid,
    pub correct: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Broadcast when a player is locked out after a wrong answer.
pub struct BuzzerCooldownEvent {
    pub player_id: Uuid,
    /// Unix epoch milliseconds until which buzzes are rejected.
    pub until: u64,
}

#[derive(Debug, Serialize, ToSchema)]
/// Sent only to the connection whose command failed.
pub struct CommandErrorEvent {
    pub action: String,
    pub message: String,
    pub status: u16,
}
