//! WebSocket stream of round events.
//!
//! `GET /ws` streams every [`RoundEvent`](crate::events::RoundEvent);
//! `GET /ws?round_id=...` only the events of one round plus game-wide pause
//! notices.

use super::handlers::AppState;
use crate::events::RoundSubscription;
use crate::types::RoundId;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub round_id: Option<RoundId>,
}

/// GET /ws
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> Response {
    let events = state.services.events.subscribe_round(query.round_id);
    ws.on_upgrade(move |socket| handle_connection(socket, events, query.round_id))
}

async fn handle_connection(socket: WebSocket, mut events: RoundSubscription, filter: Option<RoundId>) {
    let client_id = Uuid::new_v4();
    info!(%client_id, round_filter = ?filter, "WebSocket client connected");

    let (mut sender, mut receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize round event");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let receive_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => debug!(%client_id, "Send task completed"),
        _ = receive_task => debug!(%client_id, "Receive task completed"),
    }
    info!(%client_id, "WebSocket client disconnected");
}
