//! WebSocket streaming of the global snapshot.
//!
//! Connect to `/api/v1/ws` to receive the latest rollup result on a
//! fixed broadcast cadence. The cadence is independent of the rollup
//! interval - the socket simply republishes whatever the rollup loop
//! last published, which may not have changed between broadcasts.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::api::snapshot_payload;
use crate::node::NodeState;

/// WebSocket handler for snapshot broadcasts.
pub async fn ws_snapshot_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<NodeState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_snapshot_socket(socket, state))
}

/// Handle a WebSocket connection for snapshot broadcasts.
async fn handle_snapshot_socket(mut socket: WebSocket, state: Arc<NodeState>) {
    info!("WebSocket client connected for snapshot broadcasts");

    // Send the current snapshot immediately, then on the cadence.
    if let Err(e) = send_snapshot(&mut socket, &state).await {
        warn!("Failed to send initial snapshot: {}", e);
        return;
    }

    let mut interval =
        tokio::time::interval(Duration::from_millis(state.config.broadcast_interval_ms));
    // The first tick fires immediately; we already sent that one.
    interval.tick().await;

    loop {
        tokio::select! {
            // Handle incoming messages from client
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = socket.send(Message::Pong(data)).await {
                            warn!("Failed to send pong: {}", e);
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        debug!("Ignoring client message: {}", text);
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            // Republish the latest snapshot on the broadcast cadence
            _ = interval.tick() => {
                if let Err(e) = send_snapshot(&mut socket, &state).await {
                    warn!("Failed to send snapshot broadcast: {}", e);
                    break;
                }
            }
        }
    }
}

/// Serialize and send the current snapshot over the socket.
async fn send_snapshot(socket: &mut WebSocket, state: &NodeState) -> Result<(), axum::Error> {
    let payload = snapshot_payload(state).await;
    let json = serde_json::to_string(&payload).map_err(|e| {
        axum::Error::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            e.to_string(),
        ))
    })?;
    socket.send(Message::Text(json)).await
}
