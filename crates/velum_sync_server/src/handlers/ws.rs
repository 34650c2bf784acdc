use crate::room::{ClientConnection, ConnectionEvent, ControlMessage, RoomRegistry};
use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Room name to join
    pub room: String,
}

/// Shared state for WebSocket handler
#[derive(Clone)]
pub struct WsState {
    pub registry: Arc<RoomRegistry>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    State(state): State<WsState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let room_name = query.room.trim().to_string();
    if room_name.is_empty() || room_name.len() > 255 {
        warn!("WebSocket connection rejected: invalid room name");
        return StatusCode::BAD_REQUEST.into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state.registry, room_name))
        .into_response()
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, registry: Arc<RoomRegistry>, room_name: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let room = match registry.open(&room_name).await {
        Ok(room) => room,
        Err(e) => {
            error!("Failed to open room '{}': {}", room_name, e);
            return;
        }
    };

    let client_id = uuid::Uuid::new_v4().to_string();
    let mut connection = ClientConnection::new(client_id.clone(), room.clone());

    info!(
        "WebSocket connected: client={}, room={}, connections={}",
        client_id,
        room_name,
        room.connection_count()
    );

    // Send initial sync (full state)
    let initial_state = connection.initial_state();
    if let Err(e) = ws_tx.send(Message::Binary(initial_state.into())).await {
        error!("Failed to send initial state: {}", e);
        return;
    }

    // Handle bidirectional communication
    loop {
        tokio::select! {
            // Handle incoming messages from client
            Some(msg) = ws_rx.next() => {
                match msg {
                    Ok(Message::Binary(data)) => {
                        if let Err(e) = connection.handle_update(&data) {
                            warn!("Rejected update from client {}: {}", client_id, e);
                        }
                    }
                    Ok(Message::Ping(data)) => {
                        if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                            error!("Failed to send pong: {}", e);
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("Client requested close");
                        break;
                    }
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            // Outbound traffic: updates from other clients and control
            // messages
            Some(event) = connection.next_event() => {
                match event {
                    ConnectionEvent::Update(payload) => {
                        if let Err(e) = ws_tx.send(Message::Binary(payload.into())).await {
                            error!("Failed to send broadcast: {}", e);
                            break;
                        }
                    }
                    ConnectionEvent::Control(ctrl) => {
                        let reset = matches!(ctrl, ControlMessage::DocumentReset { .. });
                        match serde_json::to_string(&ctrl) {
                            Ok(json) => {
                                if let Err(e) = ws_tx.send(Message::Text(json.into())).await {
                                    error!("Failed to send control message: {}", e);
                                    break;
                                }
                            }
                            Err(e) => error!("Failed to encode control message: {}", e),
                        }
                        // History was rewound; the client must reconnect for
                        // the new state.
                        if reset {
                            break;
                        }
                    }
                }
            }

            else => break,
        }
    }

    info!(
        "WebSocket disconnected: client={}, room={}",
        client_id, room_name
    );

    // Dropping the connection unsubscribes it from the room.
    drop(connection);
    let was_last = room.connection_count() == 0;
    drop(room);

    if was_last {
        registry.schedule_drain(&room_name);
    }
}
