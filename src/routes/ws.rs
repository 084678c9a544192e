//! Bidirectional channel endpoints: `/ws/{client_id}` and
//! `/ws/batch/{batch_id}`. A per-client inbound loop (heartbeats in) and
//! outbound queue (events out) fed by the progress hub; closure is a
//! single state change (the receiver closing) that releases both sides.

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use tracing::debug;

use crate::model::ProgressEvent;
use crate::state::AppState;

pub async fn client_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, client_id, None))
}

pub async fn batch_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> impl IntoResponse {
    let client_id = format!("batch-subscriber-{}", uuid::Uuid::new_v4());
    ws.on_upgrade(move |socket| handle_socket(socket, state, client_id, Some(batch_id)))
}

async fn handle_socket(socket: WebSocket, state: AppState, client_id: String, bind_batch: Option<String>) {
    let mut rx = state.progress.attach(&client_id);
    if let Some(batch_id) = &bind_batch {
        state.progress.bind(batch_id, &client_id);
    }

    let (mut sink, mut stream) = futures_util::StreamExt::split(socket);

    let outbound = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else { continue };
            if futures_util::SinkExt::send(&mut sink, Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let progress = state.progress.clone();
    let inbound_client_id = client_id.clone();
    let inbound = tokio::spawn(async move {
        while let Some(Ok(msg)) = futures_util::StreamExt::next(&mut stream).await {
            if let Message::Text(text) = msg {
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
                    if value.get("event").and_then(|v| v.as_str()) == Some("heartbeat") {
                        progress.touch(&inbound_client_id);
                        let ts = value.get("ts").and_then(|v| v.as_i64()).unwrap_or(0);
                        progress.send_direct(&inbound_client_id, ProgressEvent::HeartbeatAck { ts });
                    }
                }
            }
        }
    });

    let _ = tokio::join!(outbound, inbound);
    debug!(%client_id, "websocket connection closed");
}
