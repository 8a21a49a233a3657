pub mod handlers;
mod judge;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::protocol::BoxEvent;
use crate::state::AppState;
use crate::types::BoxId;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsQuery {
    pub box_id: BoxId,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    tracing::info!("WebSocket connection request for box {}", params.box_id);
    ws.on_upgrade(move |socket| handle_socket(socket, params.box_id, state))
}

async fn send_event<S>(sender: &mut S, event: &BoxEvent) -> bool
where
    S: SinkExt<Message> + Unpin,
{
    match serde_json::to_string(event) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!("Failed to encode event: {}", e);
            true
        }
    }
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, box_id: BoxId, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut broadcast_rx = state.broadcast.subscribe();

    loop {
        tokio::select! {
            // Box updates, filtered to this connection's box
            broadcast_msg = broadcast_rx.recv() => {
                match broadcast_msg {
                    Ok(event) if event.box_id() == Some(&box_id) => {
                        if !send_event(&mut sender, &event).await {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        // A fresh snapshot replaces whatever was missed
                        tracing::warn!("Connection for box {} lagged by {} events", box_id, skipped);
                        if let Some(snapshot) = state.get_box(&box_id).await {
                            let event = BoxEvent::StateSnapshot {
                                box_id: box_id.clone(),
                                state: Box::new(snapshot),
                            };
                            if !send_event(&mut sender, &event).await {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            // Handle client messages
            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Received message on box {}: {}", box_id, text.as_str());

                        match serde_json::from_str::<BoxEvent>(text.as_str()) {
                            Ok(event) => {
                                if let Some(response) = handlers::handle_event(event, &state).await {
                                    if !send_event(&mut sender, &response).await {
                                        tracing::error!("Failed to send response");
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::error!("Failed to parse client message: {}", e);
                                let error = BoxEvent::error(
                                    "PARSE_ERROR",
                                    format!("Invalid message format: {}", e),
                                );
                                let _ = send_event(&mut sender, &error).await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("WebSocket closed");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    tracing::info!("WebSocket connection closed for box {}", box_id);
}
