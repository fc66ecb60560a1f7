use std::{sync::Arc, time::SystemTime};

use dashmap::DashMap;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use uuid::Uuid;

use crate::dao::{
    models::{PlaybackEntity, PlaybackUpdate, PlayerEntity, PlaylistEntity, RoomEntity},
    room_store::RoomStore,
    storage::{StorageError, StorageResult},
};

/// Process-local repository keeping rooms and playlists in concurrent maps.
///
/// Each room row is mutated under its `DashMap` entry lock, which serialises
/// writes to one room without blocking the others.
#[derive(Clone, Default)]
pub struct MemoryRoomStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    rooms: DashMap<Uuid, RoomEntity>,
    playlists: DashMap<Uuid, PlaylistEntity>,
}

impl MemoryRoomStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_room<T>(
        &self,
        room_id: Uuid,
        f: impl FnOnce(&mut RoomEntity) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut room = self
            .inner
            .rooms
            .get_mut(&room_id)
            .ok_or_else(|| StorageError::room_not_found(room_id))?;
        let value = f(&mut room)?;
        room.updated_at = SystemTime::now();
        Ok(value)
    }

    fn with_owned_room<T>(
        &self,
        room_id: Uuid,
        owner_id: &str,
        f: impl FnOnce(&mut RoomEntity) -> StorageResult<T>,
    ) -> StorageResult<T> {
        self.with_room(room_id, |room| {
            if room.owner_id != owner_id {
                return Err(StorageError::NotOwner);
            }
            f(room)
        })
    }

    fn playlist_len(&self, playlist_id: Uuid) -> StorageResult<usize> {
        self.inner
            .playlists
            .get(&playlist_id)
            .map(|playlist| playlist.items.len())
            .ok_or_else(|| StorageError::NotFound(format!("playlist `{playlist_id}` not found")))
    }

    fn create_room_sync(&self, name: String, owner_id: String) -> RoomEntity {
        let now = SystemTime::now();
        let room = RoomEntity {
            id: Uuid::new_v4(),
            name,
            owner_id,
            owner_connected: false,
            players: IndexMap::new(),
            playlist_id: None,
            playback: PlaybackEntity::reset(now),
            created_at: now,
            updated_at: now,
        };
        self.inner.rooms.insert(room.id, room.clone());
        room
    }

    fn add_player_sync(
        &self,
        room_id: Uuid,
        name: String,
        user_id: Option<String>,
    ) -> StorageResult<PlayerEntity> {
        self.with_room(room_id, |room| {
            let player = PlayerEntity {
                id: Uuid::new_v4(),
                user_id,
                name,
                connected: false,
                score: 0,
            };
            room.players.insert(player.id, player.clone());
            Ok(player)
        })
    }

    fn with_player<T>(
        room: &mut RoomEntity,
        player_id: Uuid,
        f: impl FnOnce(&mut PlayerEntity) -> T,
    ) -> StorageResult<T> {
        let player = room
            .players
            .get_mut(&player_id)
            .ok_or_else(|| StorageError::NotFound(format!("player `{player_id}` not found")))?;
        Ok(f(player))
    }

    fn load_playlist_sync(
        &self,
        room_id: Uuid,
        owner_id: &str,
        playlist_id: Uuid,
    ) -> StorageResult<PlaybackEntity> {
        // Resolve the playlist before taking the room lock.
        self.playlist_len(playlist_id)?;
        self.with_owned_room(room_id, owner_id, |room| {
            room.playlist_id = Some(playlist_id);
            room.playback = PlaybackEntity::reset(SystemTime::now());
            Ok(room.playback.clone())
        })
    }

    fn update_playback_sync(
        &self,
        room_id: Uuid,
        owner_id: &str,
        update: PlaybackUpdate,
    ) -> StorageResult<PlaybackEntity> {
        let playlist_id = self
            .inner
            .rooms
            .get(&room_id)
            .ok_or_else(|| StorageError::room_not_found(room_id))?
            .playlist_id;
        let len = match playlist_id {
            Some(id) => Some(self.playlist_len(id)?),
            None => None,
        };

        self.with_owned_room(room_id, owner_id, |room| {
            if room.playlist_id != playlist_id {
                return Err(StorageError::InvalidInput(
                    "playlist changed during update".into(),
                ));
            }
            if let Some(index) = update.track_index {
                match len {
                    None => {
                        return Err(StorageError::InvalidInput("no playlist loaded".into()));
                    }
                    Some(len) if index >= len => {
                        return Err(StorageError::InvalidInput(format!(
                            "track index {index} out of range (playlist has {len} items)"
                        )));
                    }
                    Some(_) => room.playback.track_index = index,
                }
            }
            if let Some(paused) = update.paused {
                room.playback.paused = paused;
            }
            if let Some(position_ms) = update.position_ms {
                room.playback.position_ms = position_ms;
            }
            room.playback.updated_at = SystemTime::now();
            Ok(room.playback.clone())
        })
    }
}

impl RoomStore for MemoryRoomStore {
    fn create_room(
        &self,
        name: String,
        owner_id: String,
    ) -> BoxFuture<'static, StorageResult<RoomEntity>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.create_room_sync(name, owner_id)) })
    }

    fn find_room(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.rooms.get(&room_id).map(|room| room.clone())) })
    }

    fn delete_room(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.rooms.remove(&room_id).is_some()) })
    }

    fn add_player(
        &self,
        room_id: Uuid,
        name: String,
        user_id: Option<String>,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
        let store = self.clone();
        Box::pin(async move { store.add_player_sync(room_id, name, user_id) })
    }

    fn remove_player(
        &self,
        room_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
        let store = self.clone();
        Box::pin(async move {
            store.with_room(room_id, |room| {
                room.players.shift_remove(&player_id).ok_or_else(|| {
                    StorageError::NotFound(format!("player `{player_id}` not found"))
                })
            })
        })
    }

    fn set_player_connected(
        &self,
        room_id: Uuid,
        player_id: Uuid,
        connected: bool,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.with_room(room_id, |room| {
                Self::with_player(room, player_id, |player| player.connected = connected)
            })
        })
    }

    fn set_owner_connected(
        &self,
        room_id: Uuid,
        owner_id: String,
        connected: bool,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.with_owned_room(room_id, &owner_id, |room| {
                room.owner_connected = connected;
                Ok(())
            })
        })
    }

    fn add_score(
        &self,
        room_id: Uuid,
        owner_id: String,
        player_id: Uuid,
        delta: i64,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
        let store = self.clone();
        Box::pin(async move {
            store.with_owned_room(room_id, &owner_id, |room| {
                Self::with_player(room, player_id, |player| {
                    player.score = player.score.saturating_add(delta);
                    player.clone()
                })
            })
        })
    }

    fn set_score(
        &self,
        room_id: Uuid,
        owner_id: String,
        player_id: Uuid,
        score: i64,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
        let store = self.clone();
        Box::pin(async move {
            store.with_owned_room(room_id, &owner_id, |room| {
                Self::with_player(room, player_id, |player| {
                    player.score = score;
                    player.clone()
                })
            })
        })
    }

    fn save_playlist(&self, playlist: PlaylistEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.inner.playlists.insert(playlist.id, playlist);
            Ok(())
        })
    }

    fn find_playlist(
        &self,
        playlist_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<PlaylistEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .inner
                .playlists
                .get(&playlist_id)
                .map(|playlist| playlist.clone()))
        })
    }

    fn load_playlist(
        &self,
        room_id: Uuid,
        owner_id: String,
        playlist_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<PlaybackEntity>> {
        let store = self.clone();
        Box::pin(async move { store.load_playlist_sync(room_id, &owner_id, playlist_id) })
    }

    fn update_playback(
        &self,
        room_id: Uuid,
        owner_id: String,
        update: PlaybackUpdate,
    ) -> BoxFuture<'static, StorageResult<PlaybackEntity>> {
        let store = self.clone();
        Box::pin(async move { store.update_playback_sync(room_id, &owner_id, update) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
