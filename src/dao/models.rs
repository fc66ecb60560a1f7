use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// Playlist definition containing an ordered list of tracks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaylistEntity {
    /// Stable identifier for the playlist.
    pub id: Uuid,
    /// Human readable playlist name.
    pub name: String,
    /// Tracks in play order.
    pub items: Vec<TrackEntity>,
}

/// Track entry inside a playlist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackEntity {
    /// Title displayed once the track is revealed.
    pub title: String,
    /// URL pointing to the media resource.
    pub url: String,
    /// Offset (milliseconds) where the preview should start.
    pub starts_at_ms: u64,
}

/// Participant of a room as stored by the repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    /// Stable identifier for the player inside its room.
    pub id: Uuid,
    /// Authenticated user behind the player, when the session provided one.
    pub user_id: Option<String>,
    /// Display name chosen by the player.
    pub name: String,
    /// Whether a live connection is currently bound to the player.
    pub connected: bool,
    /// Current score.
    pub score: i64,
}

/// Durable part of a room's transport state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaybackEntity {
    /// Index of the loaded track in the room playlist.
    pub track_index: usize,
    /// Whether the transport is paused.
    pub paused: bool,
    /// Playback position at `updated_at`.
    pub position_ms: u64,
    /// Last time the transport changed.
    pub updated_at: SystemTime,
}

impl PlaybackEntity {
    /// Transport state right after a playlist load: first track, paused, at zero.
    pub fn reset(now: SystemTime) -> Self {
        Self {
            track_index: 0,
            paused: true,
            position_ms: 0,
            updated_at: now,
        }
    }
}

/// Room document owned by the repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomEntity {
    /// Primary key of the room.
    pub id: Uuid,
    /// Display name of the room.
    pub name: String,
    /// Identity of the room owner.
    pub owner_id: String,
    /// Whether the owner currently holds a live connection.
    pub owner_connected: bool,
    /// Roster in join order.
    pub players: IndexMap<Uuid, PlayerEntity>,
    /// Playlist loaded in the room, if any.
    pub playlist_id: Option<Uuid>,
    /// Transport state.
    pub playback: PlaybackEntity,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Last time the room document was updated.
    pub updated_at: SystemTime,
}

impl RoomEntity {
    /// Identifiers of the players whose connection is live.
    pub fn connected_player_ids(&self) -> Vec<Uuid> {
        self.players
            .values()
            .filter(|player| player.connected)
            .map(|player| player.id)
            .collect()
    }
}

/// Partial transport update applied by [`crate::dao::room_store::RoomStore::update_playback`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackUpdate {
    /// New track index; must lie inside the loaded playlist.
    pub track_index: Option<usize>,
    /// New paused flag.
    pub paused: Option<bool>,
    /// New position.
    pub position_ms: Option<u64>,
}
