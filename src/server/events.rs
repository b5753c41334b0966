//! Real-time event stream
//!
//! An authenticated WebSocket carrying `subscribe`/`unsubscribe` frames.
//! Each subscribed channel maps to one bus subscription whose events are
//! forwarded as tagged envelopes. Channel names are opaque to this layer.

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::Event;
use crate::server::auth::validate_token;
use crate::server::state::SharedState;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    Ping,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    Event { channel: String, data: Event },
    Pong,
    Error { message: String },
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    token: String,
}

pub async fn events_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<EventsQuery>,
    State(state): State<SharedState>,
) -> Response {
    let user_id = match validate_token(&query.token, &state.config.auth.jwt_secret) {
        Ok(claims) => claims.sub,
        Err(_) => {
            warn!("Event stream connection denied: invalid token");
            return ws.on_upgrade(|mut socket| async move {
                let frame = ServerFrame::Error {
                    message: "invalid authentication token".to_string(),
                };
                if let Ok(json) = serde_json::to_string(&frame) {
                    let _ = socket.send(Message::Text(json)).await;
                }
                let _ = socket.close().await;
            });
        }
    };

    info!("Event stream opened for user {}", user_id);
    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

async fn handle_socket(socket: WebSocket, user_id: String, state: SharedState) {
    let (mut sink, mut stream) = socket.split();

    // One writer task; subscription forwarders feed it through a channel
    let (frame_tx, mut frame_rx) = mpsc::channel::<ServerFrame>(256);
    let writer = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            let Ok(json) = serde_json::to_string(&frame) else {
                continue;
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let mut forwarders: HashMap<String, JoinHandle<()>> = HashMap::new();

    while let Some(Ok(message)) = stream.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        match serde_json::from_str::<ClientFrame>(&text) {
            Ok(ClientFrame::Subscribe { channel }) => {
                if forwarders.contains_key(&channel) {
                    continue;
                }
                debug!("User {} subscribed to {}", user_id, channel);

                let subscription = state.bus.subscribe(&channel);
                let tx = frame_tx.clone();
                let name = channel.clone();
                let handle = tokio::spawn(async move {
                    loop {
                        let event = subscription.recv().await;
                        let frame = ServerFrame::Event {
                            channel: name.clone(),
                            data: event,
                        };
                        if tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                });
                forwarders.insert(channel, handle);
            }
            Ok(ClientFrame::Unsubscribe { channel }) => {
                debug!("User {} unsubscribed from {}", user_id, channel);
                if let Some(handle) = forwarders.remove(&channel) {
                    // Aborting drops the bus subscription
                    handle.abort();
                }
            }
            Ok(ClientFrame::Ping) => {
                let _ = frame_tx.send(ServerFrame::Pong).await;
            }
            Err(e) => {
                let _ = frame_tx
                    .send(ServerFrame::Error {
                        message: format!("unparseable frame: {}", e),
                    })
                    .await;
            }
        }
    }

    for (_, handle) in forwarders {
        handle.abort();
    }
    drop(frame_tx);
    let _ = writer.await;

    info!("Event stream closed for user {}", user_id);
}
