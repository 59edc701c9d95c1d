use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use alcove_types::events::{RoomCommand, RoomEvent};

use crate::channel::RoomHub;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a pre-authenticated WebSocket connection for one room. The JWT was
/// already validated at the HTTP upgrade layer, so the subscription starts
/// immediately and a Ready event confirms it to the client.
///
/// When this function returns — clean close, heartbeat timeout, or transport
/// error — the subscription is dropped and presence is released. A client
/// that reconnects re-subscribes and reconciles message history over HTTP;
/// the gateway does no gap filling.
pub async fn handle_room_socket(
    socket: WebSocket,
    hub: RoomHub,
    room_id: Uuid,
    user_id: Uuid,
    username: String,
) {
    let mut subscription = match hub.subscribe(room_id, user_id, &username) {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!(
                "{} ({}) could not subscribe to room {}: {}",
                username, user_id, room_id, e
            );
            return;
        }
    };
    let typing = subscription.typing_sender();

    let (mut sender, mut receiver) = socket.split();

    info!("{} ({}) connected to room {}", username, user_id, room_id);

    // Send Ready event
    let ready = RoomEvent::Ready {
        room_id,
        user_id,
        username: username.clone(),
    };
    let ready_text = match serde_json::to_string(&ready) {
        Ok(text) => text,
        Err(e) => {
            warn!("failed to encode ready event: {}", e);
            return;
        }
    };
    if sender.send(Message::Text(ready_text.into())).await.is_err() {
        return;
    }

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward room events to the client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = subscription.next_event() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("failed to encode room event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        // Dropping the subscription here releases presence on every exit path.
    });

    // Read commands from the client
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<RoomCommand>(&text) {
                    Ok(RoomCommand::Typing { is_typing }) => typing.send_typing(is_typing),
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            &text[..text.len().min(200)]
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("{} ({}) disconnected from room {}", username, user_id, room_id);
}
