//! WebSocket alert stream
//!
//! Pushes `{type:"alert",payload}` and `{type:"graph"}` envelopes to every
//! connected client, with a 30-second ping heartbeat. Client messages are
//! ignored; connections quiet for 90 seconds are closed.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use tracing::debug;

use crate::broker::{BusMessage, TOPIC_ALERTS, TOPIC_GRAPH};

use super::AppState;

const PING_INTERVAL: Duration = Duration::from_secs(30);
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Bridge broker topics onto the broadcast channel WebSocket clients
/// subscribe to. One forwarder per process regardless of client count.
pub fn spawn_forwarder(state: &Arc<AppState>) {
    for topic in [TOPIC_ALERTS, TOPIC_GRAPH] {
        let mut subscription = state.broker.subscribe(topic);
        let ws_tx = state.ws_tx.clone();
        tokio::spawn(async move {
            while let Some(message) = subscription.rx.recv().await {
                let envelope = match message {
                    BusMessage::Alert(alert) => {
                        serde_json::json!({ "type": "alert", "payload": alert }).to_string()
                    }
                    BusMessage::GraphChanged => {
                        serde_json::json!({ "type": "graph" }).to_string()
                    }
                    _ => continue,
                };
                // No receivers is fine; clients come and go.
                let _ = ws_tx.send(envelope);
            }
        });
    }
}

pub async fn handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let mut rx = state.ws_tx.subscribe();
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_client_activity = tokio::time::Instant::now();

    loop {
        tokio::select! {
            envelope = rx.recv() => {
                match envelope {
                    Ok(text) => {
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    // Fell behind the broadcast buffer: drop and continue.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "websocket client lagged");
                    }
                    Err(_) => break,
                }
            }
            _ = ping.tick() => {
                if last_client_activity.elapsed() > IDLE_TIMEOUT {
                    debug!("closing idle websocket connection");
                    break;
                }
                let heartbeat = serde_json::json!({ "type": "ping" }).to_string();
                if socket.send(Message::Text(heartbeat.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(_)) => {
                        // Client-to-server content is ignored but counts as
                        // liveness.
                        last_client_activity = tokio::time::Instant::now();
                    }
                    _ => break,
                }
            }
        }
    }
}
