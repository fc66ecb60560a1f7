use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures::future::BoxFuture;
use quiz_rooms_back::{
    config::AppConfig,
    dao::{
        cleanup::LogCleanup,
        models::{PlaybackEntity, PlaybackUpdate, PlayerEntity, PlaylistEntity, RoomEntity},
        room_store::{MemoryRoomStore, RoomStore},
        storage::{StorageError, StorageResult},
    },
    dto::{
        events::{EVENT_BUZZER, EVENT_BUZZER_COOLDOWN, EVENT_ROOM_CLOSED, EVENT_ROOM_SNAPSHOT},
        requests::{CreatePlaylistRequest, CreateRoomRequest, JoinRoomRequest, TrackInput},
    },
    error::ServiceError,
    services::{command_service, lifecycle_service, room_service},
    state::{AppState, EventReceiver, LifecyclePhase, SharedState, SubscriptionGuard},
};
use serde_json::{Value, json};
use uuid::Uuid;

struct Room {
    state: SharedState,
    id: Uuid,
    owner_token: String,
    players: Vec<(Uuid, String)>,
}

impl Room {
    async fn owner(&self, mut payload: Value) -> Result<(), ServiceError> {
        payload["ownerToken"] = json!(self.owner_token);
        command_service::dispatch(&self.state, self.id, payload).await
    }

    async fn player(&self, index: usize, mut payload: Value) -> Result<(), ServiceError> {
        let (player_id, token) = &self.players[index];
        payload["playerId"] = json!(player_id);
        payload["playerToken"] = json!(token);
        command_service::dispatch(&self.state, self.id, payload).await
    }

    fn subscribe(&self) -> (EventReceiver, SubscriptionGuard) {
        self.state.hubs().room(self.id).subscribe(256)
    }
}

/// In-memory repository whose reads and score writes can be made to fail.
#[derive(Clone, Default)]
struct FlakyStore {
    inner: MemoryRoomStore,
    fail_reads: Arc<AtomicBool>,
    fail_reads_after_score: Arc<AtomicBool>,
    fail_scores: Arc<AtomicBool>,
}

fn offline<T>() -> StorageResult<T> {
    Err(StorageError::unavailable(
        "repository offline".into(),
        io::Error::other("offline"),
    ))
}

impl RoomStore for FlakyStore {
    fn create_room(
        &self,
        name: String,
        owner_id: String,
    ) -> BoxFuture<'static, StorageResult<RoomEntity>> {
        self.inner.create_room(name, owner_id)
    }

    fn find_room(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Box::pin(async { offline() });
        }
        self.inner.find_room(room_id)
    }

    fn delete_room(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        self.inner.delete_room(room_id)
    }

    fn add_player(
        &self,
        room_id: Uuid,
        name: String,
        user_id: Option<String>,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
        self.inner.add_player(room_id, name, user_id)
    }

    fn remove_player(
        &self,
        room_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
        self.inner.remove_player(room_id, player_id)
    }

    fn set_player_connected(
        &self,
        room_id: Uuid,
        player_id: Uuid,
        connected: bool,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.set_player_connected(room_id, player_id, connected)
    }

    fn set_owner_connected(
        &self,
        room_id: Uuid,
        owner_id: String,
        connected: bool,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.set_owner_connected(room_id, owner_id, connected)
    }

    fn add_score(
        &self,
        room_id: Uuid,
        owner_id: String,
        player_id: Uuid,
        delta: i64,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
        if self.fail_scores.load(Ordering::SeqCst) {
            return Box::pin(async { offline() });
        }
        let scored = self.inner.add_score(room_id, owner_id, player_id, delta);
        let fail_reads = Arc::clone(&self.fail_reads);
        let arm = self.fail_reads_after_score.swap(false, Ordering::SeqCst);
        Box::pin(async move {
            let result = scored.await;
            if arm {
                fail_reads.store(true, Ordering::SeqCst);
            }
            result
        })
    }

    fn set_score(
        &self,
        room_id: Uuid,
        owner_id: String,
        player_id: Uuid,
        score: i64,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
        self.inner.set_score(room_id, owner_id, player_id, score)
    }

    fn save_playlist(&self, playlist: PlaylistEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.save_playlist(playlist)
    }

    fn find_playlist(
        &self,
        playlist_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<PlaylistEntity>>> {
        self.inner.find_playlist(playlist_id)
    }

    fn load_playlist(
        &self,
        room_id: Uuid,
        owner_id: String,
        playlist_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<PlaybackEntity>> {
        self.inner.load_playlist(room_id, owner_id, playlist_id)
    }

    fn update_playback(
        &self,
        room_id: Uuid,
        owner_id: String,
        update: PlaybackUpdate,
    ) -> BoxFuture<'static, StorageResult<PlaybackEntity>> {
        self.inner.update_playback(room_id, owner_id, update)
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.health_check()
    }
}

/// A room with a three-track playlist loaded, `players` connected players and the owner connected.
async fn room_with_players(config: AppConfig, players: usize) -> Room {
    room_in_state(AppState::in_memory(config), players).await
}

async fn flaky_room(config: AppConfig, players: usize) -> (Room, FlakyStore) {
    let store = FlakyStore::default();
    let state = AppState::new(config, Arc::new(store.clone()), Arc::new(LogCleanup));
    (room_in_state(state, players).await, store)
}

async fn room_in_state(state: SharedState, players: usize) -> Room {
    let created = room_service::create_room(
        &state,
        CreateRoomRequest {
            name: "Friday blind test".into(),
            owner_id: "owner-1".into(),
        },
    )
    .await
    .unwrap();
    let id = created.room.room_id;

    let mut joined = Vec::new();
    for i in 0..players {
        let response = room_service::join_room(
            &state,
            id,
            JoinRoomRequest {
                name: format!("player {i}"),
                user_id: None,
            },
        )
        .await
        .unwrap();
        lifecycle_service::player_connected(&state, id, response.player.id)
            .await
            .unwrap();
        joined.push((response.player.id, response.player_token));
    }
    lifecycle_service::owner_connected(&state, id, "owner-1")
        .await
        .unwrap();

    let playlist = room_service::create_playlist(
        &state,
        CreatePlaylistRequest {
            name: "Eighties".into(),
            items: (0..3)
                .map(|i| TrackInput {
                    title: format!("track {i}"),
                    url: format!("https://cdn.example/{i}.mp3"),
                    starts_at_ms: 0,
                })
                .collect(),
        },
    )
    .await
    .unwrap();

    let room = Room {
        state,
        id,
        owner_token: created.owner_token,
        players: joined,
    };
    room.owner(json!({ "action": "playlist.load", "playlistId": playlist.id }))
        .await
        .unwrap();
    room
}

fn drain(rx: &mut EventReceiver) -> Vec<(String, Value)> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push((event.kind.to_string(), event.payload.clone()));
    }
    events
}

fn last_snapshot(rx: &mut EventReceiver) -> Value {
    drain(rx)
        .into_iter()
        .filter(|(kind, _)| kind == EVENT_ROOM_SNAPSHOT)
        .map(|(_, payload)| payload)
        .last()
        .expect("a snapshot was broadcast")
}

#[tokio::test]
async fn all_players_receive_the_same_start_instant() {
    let room = room_with_players(AppConfig::default(), 2).await;
    let (mut first, _first) = room.subscribe();
    let (mut second, _second) = room.subscribe();

    room.player(0, json!({ "action": "playback.buffer", "buffering": false }))
        .await
        .unwrap();
    room.owner(json!({ "action": "playback.pause", "paused": false }))
        .await
        .unwrap();

    let pending = last_snapshot(&mut first);
    assert_eq!(pending["playback"]["paused"], true);
    assert_eq!(pending["playback"]["pendingPlay"], true);
    assert!(pending["playback"].get("startAt").is_none());
    drain(&mut second);

    room.player(1, json!({ "action": "playback.buffer", "buffering": false }))
        .await
        .unwrap();

    let a = last_snapshot(&mut first);
    let b = last_snapshot(&mut second);
    assert_eq!(a["playback"]["paused"], false);
    assert_eq!(a["playback"]["pendingPlay"], false);
    assert!(a["playback"]["startAt"].is_u64());
    assert_eq!(a["playback"]["startAt"], b["playback"]["startAt"]);
}

#[tokio::test]
async fn play_with_a_buffering_player_stays_pending() {
    let room = room_with_players(AppConfig::default(), 2).await;
    let (mut rx, _guard) = room.subscribe();

    room.player(0, json!({ "action": "playback.buffer", "buffering": false }))
        .await
        .unwrap();
    room.player(1, json!({ "action": "playback.buffer", "buffering": true }))
        .await
        .unwrap();
    room.owner(json!({ "action": "playback.set", "trackIndex": 1, "paused": false }))
        .await
        .unwrap();

    let snapshot = last_snapshot(&mut rx);
    assert_eq!(snapshot["playback"]["trackIndex"], 1);
    assert_eq!(snapshot["playback"]["paused"], true);
    assert_eq!(snapshot["playback"]["pendingPlay"], true);
    // Track change starts a fresh handshake.
    assert_eq!(snapshot["players"][0]["ready"], false);
}

#[tokio::test]
async fn out_of_range_track_is_rejected_without_touching_playback() {
    let room = room_with_players(AppConfig::default(), 1).await;
    room.owner(json!({ "action": "playback.seek", "positionMs": 4200 }))
        .await
        .unwrap();
    let before = room_service::get_room(&room.state, room.id).await.unwrap();
    let sync_before = room.state.playback().current(room.id);

    let err = room
        .owner(json!({ "action": "playback.set", "trackIndex": 3, "paused": false }))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));
    assert_eq!(err.status(), 400);

    let err = room
        .owner(json!({ "action": "playback.set", "trackIndex": -1 }))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));

    let after = room_service::get_room(&room.state, room.id).await.unwrap();
    assert_eq!(after.playback.track_index, before.playback.track_index);
    assert_eq!(after.playback.position_ms, 4200);
    assert_eq!(after.playback.updated_at, before.playback.updated_at);
    assert_eq!(room.state.playback().current(room.id), sync_before);
}

#[tokio::test]
async fn tokens_gate_owner_and_player_actions() {
    let room = room_with_players(AppConfig::default(), 1).await;
    let (player_id, token) = room.players[0].clone();

    let err = command_service::dispatch(
        &room.state,
        room.id,
        json!({ "action": "score.add", "playerId": player_id, "delta": 3 }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized(_)));

    let err = command_service::dispatch(
        &room.state,
        room.id,
        json!({ "action": "score.add", "playerId": player_id, "delta": 3, "playerToken": token }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    let err = command_service::dispatch(
        &room.state,
        Uuid::new_v4(),
        json!({ "action": "score.add", "playerId": player_id, "delta": 3, "ownerToken": room.owner_token }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));

    room.owner(json!({ "action": "score.add", "playerId": player_id, "delta": 3 }))
        .await
        .unwrap();
    let snapshot = room_service::get_room(&room.state, room.id).await.unwrap();
    assert_eq!(snapshot.players[0].score, 3);
}

#[tokio::test]
async fn wrong_answer_locks_the_buzzer_until_the_cooldown_expires() {
    let config = AppConfig {
        buzz_cooldown: Duration::from_millis(100),
        play_lead_time: Duration::ZERO,
        ..AppConfig::default()
    };
    let room = room_with_players(config, 1).await;
    let (mut rx, _guard) = room.subscribe();

    room.player(0, json!({ "action": "playback.buffer", "buffering": false }))
        .await
        .unwrap();
    room.owner(json!({ "action": "playback.pause", "paused": false }))
        .await
        .unwrap();

    room.player(0, json!({ "action": "buzz" })).await.unwrap();
    let second = room.player(0, json!({ "action": "buzz" })).await.unwrap_err();
    assert!(matches!(second, ServiceError::InvalidInput(_)));

    room.owner(json!({ "action": "buzz.resolve", "correct": false }))
        .await
        .unwrap();
    let events = drain(&mut rx);
    assert!(events.iter().any(|(kind, _)| kind == EVENT_BUZZER));
    let cooldown = events
        .iter()
        .find(|(kind, _)| kind == EVENT_BUZZER_COOLDOWN)
        .map(|(_, payload)| payload.clone())
        .expect("cooldown announced");
    assert_eq!(cooldown["playerId"], json!(room.players[0].0));

    // Only player was ready, so playback resumed right away.
    let snapshot = room_service::get_room(&room.state, room.id).await.unwrap();
    assert!(!snapshot.playback.paused);
    assert!(snapshot.players[0].cooldown_until.is_some());

    let locked = room.player(0, json!({ "action": "buzz" })).await.unwrap_err();
    assert!(matches!(locked, ServiceError::InvalidInput(_)));

    tokio::time::sleep(Duration::from_millis(150)).await;
    room.player(0, json!({ "action": "buzz" })).await.unwrap();
    let snapshot = room_service::get_room(&room.state, room.id).await.unwrap();
    assert_eq!(snapshot.buzzed_by, Some(room.players[0].0));
    assert!(snapshot.playback.paused);
}

#[tokio::test]
async fn correct_answer_scores_and_advances_the_track() {
    let config = AppConfig {
        play_lead_time: Duration::ZERO,
        correct_answer_points: 2,
        ..AppConfig::default()
    };
    let room = room_with_players(config, 1).await;
    room.player(0, json!({ "action": "playback.buffer", "buffering": false }))
        .await
        .unwrap();
    room.owner(json!({ "action": "playback.pause", "paused": false }))
        .await
        .unwrap();
    room.player(0, json!({ "action": "buzz" })).await.unwrap();
    room.owner(json!({ "action": "buzz.resolve", "correct": true }))
        .await
        .unwrap();

    let snapshot = room_service::get_room(&room.state, room.id).await.unwrap();
    assert_eq!(snapshot.players[0].score, 2);
    assert_eq!(snapshot.playback.track_index, 1);
    assert_eq!(snapshot.playback.position_ms, 0);
    assert!(snapshot.playback.paused);
    assert!(snapshot.buzzed_by.is_none());
}

#[tokio::test]
async fn owner_timeout_closes_the_room() {
    let config = AppConfig {
        owner_grace: Duration::from_millis(50),
        ..AppConfig::default()
    };
    let room = room_with_players(config, 1).await;
    let (mut rx, _guard) = room.subscribe();

    lifecycle_service::owner_disconnected(&room.state, room.id, "owner-1")
        .await
        .unwrap();
    assert_eq!(
        lifecycle_service::room_phase(&room.state, room.id).await.unwrap(),
        LifecyclePhase::OwnerAbsentGrace
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        lifecycle_service::room_phase(&room.state, room.id).await.unwrap(),
        LifecyclePhase::Closed
    );

    let mut closed = None;
    while let Some(event) = rx.recv().await {
        if event.kind == EVENT_ROOM_CLOSED {
            closed = Some(event.payload.clone());
        }
    }
    assert_eq!(closed.expect("room.closed broadcast")["reason"], "owner_timeout");
    assert!(room.state.hubs().get(room.id).is_none());
}

#[tokio::test]
async fn owner_returning_cancels_the_closure() {
    let config = AppConfig {
        owner_grace: Duration::from_millis(50),
        ..AppConfig::default()
    };
    let room = room_with_players(config, 1).await;

    lifecycle_service::owner_disconnected(&room.state, room.id, "owner-1")
        .await
        .unwrap();
    lifecycle_service::owner_connected(&room.state, room.id, "owner-1")
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        lifecycle_service::room_phase(&room.state, room.id).await.unwrap(),
        LifecyclePhase::Active
    );
}

#[tokio::test]
async fn last_player_leaving_an_ownerless_room_closes_it() {
    let room = room_with_players(AppConfig::default(), 1).await;
    let (mut rx, _guard) = room.subscribe();
    lifecycle_service::owner_disconnected(&room.state, room.id, "owner-1")
        .await
        .unwrap();

    let (player_id, token) = room.players[0].clone();
    room_service::leave_room(&room.state, room.id, player_id, &token)
        .await
        .unwrap();

    assert_eq!(
        lifecycle_service::room_phase(&room.state, room.id).await.unwrap(),
        LifecyclePhase::Closed
    );
    assert!(!room.state.owner_timers().is_armed(room.id));
    let closed = drain(&mut rx)
        .into_iter()
        .find(|(kind, _)| kind == EVENT_ROOM_CLOSED)
        .expect("room.closed broadcast");
    assert_eq!(closed.1["reason"], "owner_left_empty");

    // Closing twice is harmless.
    lifecycle_service::close_room(
        &room.state,
        room.id,
        quiz_rooms_back::dto::events::CloseReason::OwnerLeftEmpty,
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn overlapping_owner_connections_keep_the_room_open() {
    let config = AppConfig {
        owner_grace: Duration::from_millis(50),
        ..AppConfig::default()
    };
    let room = room_with_players(config, 1).await;

    // A second tab (or a reconnect racing the old socket) binds first.
    lifecycle_service::owner_connected(&room.state, room.id, "owner-1")
        .await
        .unwrap();
    lifecycle_service::owner_disconnected(&room.state, room.id, "owner-1")
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        lifecycle_service::room_phase(&room.state, room.id).await.unwrap(),
        LifecyclePhase::Active
    );
    let snapshot = room_service::get_room(&room.state, room.id).await.unwrap();
    assert!(snapshot.owner_connected);

    // Releasing the last owner connection starts the grace period.
    lifecycle_service::owner_disconnected(&room.state, room.id, "owner-1")
        .await
        .unwrap();
    assert_eq!(
        lifecycle_service::room_phase(&room.state, room.id).await.unwrap(),
        LifecyclePhase::OwnerAbsentGrace
    );
}

#[tokio::test]
async fn overlapping_player_connections_keep_an_ownerless_room_open() {
    let room = room_with_players(AppConfig::default(), 1).await;
    let player_id = room.players[0].0;
    lifecycle_service::owner_disconnected(&room.state, room.id, "owner-1")
        .await
        .unwrap();

    lifecycle_service::player_connected(&room.state, room.id, player_id)
        .await
        .unwrap();
    lifecycle_service::player_disconnected(&room.state, room.id, player_id)
        .await
        .unwrap();

    assert_eq!(
        lifecycle_service::room_phase(&room.state, room.id).await.unwrap(),
        LifecyclePhase::OwnerAbsentGrace
    );
    let snapshot = room_service::get_room(&room.state, room.id).await.unwrap();
    assert!(snapshot.players[0].connected);

    lifecycle_service::player_disconnected(&room.state, room.id, player_id)
        .await
        .unwrap();
    assert_eq!(
        lifecycle_service::room_phase(&room.state, room.id).await.unwrap(),
        LifecyclePhase::Closed
    );
}

#[tokio::test]
async fn explicit_owner_leave_ignores_open_owner_sockets() {
    let room = room_with_players(AppConfig::default(), 0).await;
    lifecycle_service::owner_connected(&room.state, room.id, "owner-1")
        .await
        .unwrap();

    room_service::owner_leave(&room.state, room.id, &room.owner_token)
        .await
        .unwrap();
    assert_eq!(
        lifecycle_service::room_phase(&room.state, room.id).await.unwrap(),
        LifecyclePhase::Closed
    );

    // Sockets unwinding after the close are no-ops.
    lifecycle_service::owner_disconnected(&room.state, room.id, "owner-1")
        .await
        .unwrap();
}

#[tokio::test]
async fn failed_snapshot_reload_suppresses_the_broadcast() {
    let (room, store) = flaky_room(AppConfig::default(), 1).await;
    let player_id = room.players[0].0;
    let (mut rx, _guard) = room.subscribe();

    store.fail_reads_after_score.store(true, Ordering::SeqCst);
    room.owner(json!({ "action": "score.add", "playerId": player_id, "delta": 3 }))
        .await
        .unwrap();
    assert!(drain(&mut rx).is_empty());

    store.fail_reads.store(false, Ordering::SeqCst);
    let snapshot = room_service::get_room(&room.state, room.id).await.unwrap();
    assert_eq!(snapshot.players[0].score, 3);
}

#[tokio::test]
async fn a_failed_score_write_is_never_awarded_twice() {
    let config = AppConfig {
        play_lead_time: Duration::ZERO,
        correct_answer_points: 2,
        ..AppConfig::default()
    };
    let (room, store) = flaky_room(config, 1).await;
    room.player(0, json!({ "action": "playback.buffer", "buffering": false }))
        .await
        .unwrap();
    room.owner(json!({ "action": "playback.pause", "paused": false }))
        .await
        .unwrap();
    room.player(0, json!({ "action": "buzz" })).await.unwrap();

    store.fail_scores.store(true, Ordering::SeqCst);
    let err = room
        .owner(json!({ "action": "buzz.resolve", "correct": true }))
        .await
        .unwrap_err();
    assert_eq!(err.status(), 503);
    store.fail_scores.store(false, Ordering::SeqCst);

    let retry = room
        .owner(json!({ "action": "buzz.resolve", "correct": true }))
        .await
        .unwrap_err();
    assert!(matches!(retry, ServiceError::InvalidInput(_)));
    let snapshot = room_service::get_room(&room.state, room.id).await.unwrap();
    assert_eq!(snapshot.players[0].score, 0);
    assert!(snapshot.buzzed_by.is_none());
}

#[tokio::test]
async fn buffering_reports_need_a_live_connection() {
    let config = AppConfig {
        play_lead_time: Duration::ZERO,
        ..AppConfig::default()
    };
    let room = room_with_players(config, 2).await;
    for index in 0..2 {
        room.player(index, json!({ "action": "playback.buffer", "buffering": false }))
            .await
            .unwrap();
    }
    room.owner(json!({ "action": "playback.pause", "paused": false }))
        .await
        .unwrap();
    let gone = room.players[1].0;
    lifecycle_service::player_disconnected(&room.state, room.id, gone)
        .await
        .unwrap();

    let err = room
        .player(1, json!({ "action": "playback.buffer", "buffering": true }))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));

    let snapshot = room_service::get_room(&room.state, room.id).await.unwrap();
    assert!(!snapshot.playback.paused);
    assert!(!room.state.playback().current(room.id).is_buffering(&gone));
}
