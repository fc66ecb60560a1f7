//! Read-model views of a room sent to clients.

use std::{collections::HashMap, time::SystemTime};

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::{PlaybackEntity, PlayerEntity, PlaylistEntity, RoomEntity, TrackEntity},
    dto::epoch_millis,
    state::RoomSync,
};

/// Full view of a room, broadcast as `room.snapshot`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room_id: Uuid,
    pub name: String,
    pub owner_id: String,
    pub owner_connected: bool,
    pub players: Vec<PlayerSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playlist: Option<PlaylistSummary>,
    pub playback: PlaybackSnapshot,
    /// Player whose buzz awaits the owner's verdict.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buzzed_by: Option<Uuid>,
}

/// Roster entry merged with the transient readiness flags.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSummary {
    pub id: Uuid,
    pub name: String,
    pub connected: bool,
    pub score: i64,
    pub buffering: bool,
    pub ready: bool,
    /// Unix epoch milliseconds until which this player cannot buzz.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<u64>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistSummary {
    pub id: Uuid,
    pub name: String,
    pub items: Vec<TrackSummary>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrackSummary {
    pub title: String,
    pub url: String,
    pub starts_at_ms: u64,
}

/// Transport state with the derived sync fields. Instants are epoch milliseconds.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub track_index: usize,
    pub paused: bool,
    pub position_ms: u64,
    pub updated_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_at: Option<u64>,
    pub pending_play: bool,
    pub buffering: Vec<Uuid>,
}

impl PlayerSummary {
    /// Merge a stored player with its readiness flags and cooldown.
    pub fn build(player: &PlayerEntity, sync: &RoomSync, cooldown: Option<SystemTime>) -> Self {
        Self {
            id: player.id,
            name: player.name.clone(),
            connected: player.connected,
            score: player.score,
            buffering: sync.is_buffering(&player.id),
            ready: sync.is_ready(&player.id),
            cooldown_until: cooldown.map(epoch_millis),
        }
    }
}

impl From<&TrackEntity> for TrackSummary {
    fn from(track: &TrackEntity) -> Self {
        Self {
            title: track.title.clone(),
            url: track.url.clone(),
            starts_at_ms: track.starts_at_ms,
        }
    }
}

impl From<&PlaylistEntity> for PlaylistSummary {
    fn from(playlist: &PlaylistEntity) -> Self {
        Self {
            id: playlist.id,
            name: playlist.name.clone(),
            items: playlist.items.iter().map(Into::into).collect(),
        }
    }
}

impl PlaybackSnapshot {
    fn build(playback: &PlaybackEntity, sync: &RoomSync) -> Self {
        Self {
            track_index: playback.track_index,
            paused: playback.paused,
            position_ms: playback.position_ms,
            updated_at: epoch_millis(playback.updated_at),
            start_at: sync.start_at().map(epoch_millis),
            pending_play: sync.pending_play(),
            buffering: sync.buffering(),
        }
    }
}

impl RoomSnapshot {
    /// Assemble the read model from the durable room and the transient tables.
    pub fn build(
        room: &RoomEntity,
        playlist: Option<&PlaylistEntity>,
        sync: &RoomSync,
        cooldowns: &HashMap<Uuid, SystemTime>,
    ) -> Self {
        Self {
            room_id: room.id,
            name: room.name.clone(),
            owner_id: room.owner_id.clone(),
            owner_connected: room.owner_connected,
            players: room
                .players
                .values()
                .map(|player| {
                    PlayerSummary::build(player, sync, cooldowns.get(&player.id).copied())
                })
                .collect(),
            playlist: playlist.map(Into::into),
            playback: PlaybackSnapshot::build(&room.playback, sync),
            buzzed_by: sync.buzzed_by(),
        }
    }
}
