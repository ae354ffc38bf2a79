use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use shared::domain::UserId;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(rename = "userId")]
    user_id: Option<i64>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let user_id = query.user_id.filter(|id| *id > 0).map(UserId);
    ws.on_upgrade(move |socket| ws_connection(state, socket, user_id))
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket, user_id: Option<UserId>) {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let presence = Arc::clone(&state.api.presence);
    let connection_id = presence.connect(events_tx);

    match user_id {
        Some(user_id) => presence.register(user_id, connection_id),
        // Tolerated rather than rejected; the socket still receives
        // online-set broadcasts but never appears in them.
        None => warn!(
            connection_id = connection_id.0,
            "realtime connection without user id; not registered"
        ),
    }

    let (mut sender, mut receiver) = socket.split();

    let forward = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Clients send nothing meaningful on this channel; drain until close.
    while let Some(Ok(_frame)) = receiver.next().await {}

    forward.abort();
    if let Some(user_id) = user_id {
        presence.unregister(user_id, connection_id);
    }
    presence.disconnect(connection_id);
    debug!(connection_id = connection_id.0, "realtime connection closed");
}
