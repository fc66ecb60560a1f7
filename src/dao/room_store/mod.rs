pub mod memory;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::models::{PlaybackEntity, PlaybackUpdate, PlayerEntity, PlaylistEntity, RoomEntity};
use crate::dao::storage::StorageResult;

pub use self::memory::MemoryRoomStore;

/// Abstraction over the persistence layer for rooms, their rosters and playlists.
///
/// Owner-keyed mutations take the owner identity and fail with
/// [`StorageError::NotOwner`](crate::dao::storage::StorageError::NotOwner) when it does not match.
pub trait RoomStore: Send + Sync {
    fn create_room(
        &self,
        name: String,
        owner_id: String,
    ) -> BoxFuture<'static, StorageResult<RoomEntity>>;
    fn find_room(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>>;
    /// Delete a room, returning whether it existed. Deleting a missing room is not an error.
    fn delete_room(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<bool>>;
    fn add_player(
        &self,
        room_id: Uuid,
        name: String,
        user_id: Option<String>,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>>;
    fn remove_player(
        &self,
        room_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>>;
    fn set_player_connected(
        &self,
        room_id: Uuid,
        player_id: Uuid,
        connected: bool,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn set_owner_connected(
        &self,
        room_id: Uuid,
        owner_id: String,
        connected: bool,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn add_score(
        &self,
        room_id: Uuid,
        owner_id: String,
        player_id: Uuid,
        delta: i64,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>>;
    fn set_score(
        &self,
        room_id: Uuid,
        owner_id: String,
        player_id: Uuid,
        score: i64,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>>;
    fn save_playlist(&self, playlist: PlaylistEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_playlist(
        &self,
        playlist_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<PlaylistEntity>>>;
    /// Attach a playlist to the room and reset its transport to the first track, paused.
    fn load_playlist(
        &self,
        room_id: Uuid,
        owner_id: String,
        playlist_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<PlaybackEntity>>;
    /// Atomically apply a transport update, rejecting out-of-range track indexes.
    fn update_playback(
        &self,
        room_id: Uuid,
        owner_id: String,
        update: PlaybackUpdate,
    ) -> BoxFuture<'static, StorageResult<PlaybackEntity>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}
