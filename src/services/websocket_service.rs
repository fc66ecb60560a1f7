use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        events::{EVENT_ROOM_SNAPSHOT, RoomEvent},
        ws::{COMMAND_TYPE, CommandEnvelope, ConnectParams},
    },
    error::ServiceError,
    services::{
        command_service, lifecycle_service,
        room_events::{self, require_room},
        room_service::unauthorized,
    },
    state::{EventReceiver, SharedState},
};

/// Identity a socket is bound to for presence tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence {
    /// Receives events only; commands still carry their own tokens.
    Spectator,
    /// The room owner.
    Owner { owner_id: String },
    /// A player of the room.
    Player { player_id: Uuid },
}

/// Resolve the connection credentials before accepting the upgrade.
pub async fn resolve_presence(
    state: &SharedState,
    room_id: Uuid,
    params: &ConnectParams,
) -> Result<Presence, ServiceError> {
    let room = require_room(state, room_id).await?;
    let tokens = state.tokens();

    if let Some(token) = params.owner_token.as_deref() {
        tokens.validate_owner(room_id, token).map_err(unauthorized)?;
        return Ok(Presence::Owner {
            owner_id: room.owner_id,
        });
    }

    let Some(token) = params.player_token.as_deref() else {
        return Ok(Presence::Spectator);
    };
    let player_id = match params.player_id {
        Some(player_id) => {
            tokens
                .validate_player(room_id, player_id, token)
                .map_err(unauthorized)?;
            player_id
        }
        None => tokens
            .player_for_token(room_id, token)
            .ok_or_else(|| ServiceError::Unauthorized("unknown player token".into()))?,
    };
    if !room.players.contains_key(&player_id) {
        return Err(ServiceError::NotFound(format!("player `{player_id}` not found")));
    }
    Ok(Presence::Player { player_id })
}

/// Handle the full lifecycle of a room WebSocket connection.
pub async fn handle_socket(
    state: SharedState,
    socket: WebSocket,
    room_id: Uuid,
    presence: Presence,
) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let hub = state.hubs().room(room_id);
    let (events, subscription) = hub.subscribe(state.config().subscriber_buffer);
    let forwarder_task = tokio::spawn(forward_events(events, outbound_tx.clone()));
    debug!(room_id = %room_id, subscription = subscription.id(), "socket subscribed");

    match room_events::load_snapshot(&state, room_id).await {
        Ok(snapshot) => match RoomEvent::json(EVENT_ROOM_SNAPSHOT, room_id, &snapshot) {
            Ok(event) => {
                send_event(&outbound_tx, &event);
            }
            Err(err) => warn!(room_id = %room_id, error = %err, "failed to serialize snapshot"),
        },
        Err(err) => {
            warn!(room_id = %room_id, error = %err, "room vanished before the socket was bound");
            subscription.cancel();
            forwarder_task.abort();
            if matches!(err, ServiceError::NotFound(_)) {
                state.hubs().remove(room_id);
            }
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
    }

    if let Err(err) = bind_presence(&state, room_id, &presence).await {
        warn!(room_id = %room_id, presence = ?presence, error = %err, "failed to bind presence");
    }
    info!(room_id = %room_id, presence = ?presence, "socket connected");

    let idle_timeout = state.config().idle_timeout;
    loop {
        let message = match tokio::time::timeout(idle_timeout, receiver.next()).await {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(_) => {
                info!(room_id = %room_id, presence = ?presence, "socket idle; closing");
                let _ = outbound_tx.send(Message::Close(None));
                break;
            }
        };
        match message {
            Ok(Message::Text(text)) => {
                handle_text(&state, room_id, text.as_str(), &outbound_tx).await;
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(room_id = %room_id, error = %err, "websocket error");
                break;
            }
        }
    }

    subscription.cancel();
    forwarder_task.abort();
    if let Err(err) = release_presence(&state, room_id, &presence).await {
        debug!(room_id = %room_id, presence = ?presence, error = %err, "presence release skipped");
    }
    info!(room_id = %room_id, presence = ?presence, "socket disconnected");

    finalize(writer_task, outbound_tx).await;
}

async fn bind_presence(
    state: &SharedState,
    room_id: Uuid,
    presence: &Presence,
) -> Result<(), ServiceError> {
    match presence {
        Presence::Spectator => Ok(()),
        Presence::Owner { owner_id } => {
            lifecycle_service::owner_connected(state, room_id, owner_id).await
        }
        Presence::Player { player_id } => {
            lifecycle_service::player_connected(state, room_id, *player_id).await
        }
    }
}

async fn release_presence(
    state: &SharedState,
    room_id: Uuid,
    presence: &Presence,
) -> Result<(), ServiceError> {
    match presence {
        Presence::Spectator => Ok(()),
        Presence::Owner { owner_id } => {
            lifecycle_service::owner_disconnected(state, room_id, owner_id).await
        }
        Presence::Player { player_id } => {
            lifecycle_service::player_disconnected(state, room_id, *player_id).await
        }
    }
}

/// Parse and dispatch one inbound frame; failures go to this connection only.
async fn handle_text(
    state: &SharedState,
    room_id: Uuid,
    text: &str,
    outbound_tx: &mpsc::UnboundedSender<Message>,
) {
    let envelope = match CommandEnvelope::from_json_str(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            let err = ServiceError::InvalidInput(format!("malformed message: {err}"));
            reply_error(room_id, "unknown".into(), &err, outbound_tx);
            return;
        }
    };
    let action = envelope.action_name();

    let result = if envelope.kind != COMMAND_TYPE {
        Err(ServiceError::InvalidInput(format!(
            "unsupported message type `{}`",
            envelope.kind
        )))
    } else if envelope.room_id != room_id {
        Err(ServiceError::InvalidInput(
            "roomId does not match the connected room".into(),
        ))
    } else {
        command_service::dispatch(state, room_id, envelope.payload).await
    };

    if let Err(err) = result {
        debug!(room_id = %room_id, action = %action, error = %err, "command rejected");
        reply_error(room_id, action, &err, outbound_tx);
    }
}

fn reply_error(
    room_id: Uuid,
    action: String,
    err: &ServiceError,
    outbound_tx: &mpsc::UnboundedSender<Message>,
) {
    match room_events::command_error(room_id, action, err) {
        Ok(event) => {
            send_event(outbound_tx, &event);
        }
        Err(err) => warn!(room_id = %room_id, error = %err, "failed to serialize command error"),
    }
}

/// Relay hub events to the socket writer until the hub or the socket closes.
async fn forward_events(mut events: EventReceiver, outbound_tx: mpsc::UnboundedSender<Message>) {
    while let Some(event) = events.recv().await {
        if !send_event(&outbound_tx, &event) {
            return;
        }
    }
    // The hub closed with the room: end the connection.
    let _ = outbound_tx.send(Message::Close(None));
}

/// Queue an event frame on the writer, returning `false` once the writer is gone.
fn send_event(outbound_tx: &mpsc::UnboundedSender<Message>, event: &RoomEvent) -> bool {
    match event.to_frame() {
        Ok(frame) => outbound_tx.send(Message::Text(frame.into())).is_ok(),
        Err(err) => {
            warn!(kind = event.kind, error = %err, "failed to serialize event frame");
            true
        }
    }
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
