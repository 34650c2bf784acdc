use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};
use velum_core::Result;

use super::room::{ControlMessage, Room};

/// Something the server should forward to a connected client.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Binary update payload from another client
    Update(Vec<u8>),
    /// Control message, sent to the client as JSON
    Control(ControlMessage),
}

/// Represents a connected client
pub struct ClientConnection {
    pub client_id: String,
    pub room_name: String,
    room: Arc<Room>,
    broadcast_rx: broadcast::Receiver<Vec<u8>>,
    control_rx: broadcast::Receiver<ControlMessage>,
}

impl ClientConnection {
    /// Create a new client connection
    pub fn new(client_id: String, room: Arc<Room>) -> Self {
        let control_rx = room.subscribe_control();
        let broadcast_rx = room.subscribe(&client_id);

        Self {
            client_id,
            room_name: room.name().to_string(),
            room,
            broadcast_rx,
            control_rx,
        }
    }

    /// Full document state for the initial sync
    pub fn initial_state(&self) -> Vec<u8> {
        self.room.full_state()
    }

    /// Apply an update payload sent by this client
    pub fn handle_update(&self, payload: &[u8]) -> Result<()> {
        self.room.apply_remote_update(payload)
    }

    /// Receive the next outbound event for this client, from either the
    /// update broadcast or the control channel. Returns `None` once both
    /// channels are closed (the room was dropped).
    ///
    /// A client that lags behind the update broadcast is resynced with the
    /// full document state instead of the missed deltas.
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        loop {
            tokio::select! {
                update = self.broadcast_rx.recv() => match update {
                    Ok(payload) => return Some(ConnectionEvent::Update(payload)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(
                            "Client {} lagged {} updates, sending full state",
                            self.client_id, n
                        );
                        return Some(ConnectionEvent::Update(self.room.full_state()));
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
                ctrl = self.control_rx.recv() => match ctrl {
                    Ok(msg) => return Some(ConnectionEvent::Control(msg)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.room.unsubscribe(&self.client_id);
        debug!(
            "Client disconnected: client={}, room={}",
            self.client_id, self.room_name
        );
    }
}
