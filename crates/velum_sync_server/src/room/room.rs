use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use velum_core::Result;
use velum_core::crdt::{RoomDoc, UpdateSubscription, VersionStore};

use super::{MergeBuffer, RoomTimings};

/// Control messages pushed to clients as JSON, alongside the binary update
/// stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// History was rewound (rollback or snapshot restore). Clients must
    /// reconnect to pick up the new state.
    DocumentReset { version_id: i64 },
    PeerCountChanged { peer_count: usize },
}

/// A live room: the in-memory document for one collaboratively edited text.
///
/// Incoming updates are applied to the document and fanned out to every
/// connected client; persistence goes through the room's [`MergeBuffer`].
/// The document's state at load time is kept so that draining can tell
/// whether anything actually changed during the room's lifetime.
pub struct Room {
    name: String,
    doc: Arc<RoomDoc>,
    buffer: Arc<MergeBuffer>,
    store: Arc<VersionStore>,
    /// Broadcast channel for binary update payloads
    broadcast_tx: broadcast::Sender<Vec<u8>>,
    /// Broadcast channel for control messages (JSON)
    control_tx: broadcast::Sender<ControlMessage>,
    /// Client ids of active connections
    connections: Mutex<HashSet<String>>,
    /// Encoded document state at load time, for the drain comparison
    baseline_state: Vec<u8>,
    /// Keeps the document-to-buffer observer alive
    _subscription: UpdateSubscription,
}

impl Room {
    /// Load a room from the version store and wire up its persistence
    /// buffer. Must be called from within a tokio runtime.
    pub fn load(name: &str, store: Arc<VersionStore>, timings: RoomTimings) -> Result<Arc<Self>> {
        let doc = Arc::new(store.load_at(name, None)?);
        let baseline_state = doc.encode_state_as_update();

        let buffer = MergeBuffer::spawn(
            name.to_string(),
            doc.clone(),
            store.clone(),
            timings,
            doc.plain_text(),
        );
        let subscription = doc.attach_sink(buffer.clone());

        let (broadcast_tx, _) = broadcast::channel(1024);
        let (control_tx, _) = broadcast::channel(256);

        Ok(Arc::new(Self {
            name: name.to_string(),
            doc,
            buffer,
            store,
            broadcast_tx,
            control_tx,
            connections: Mutex::new(HashSet::new()),
            baseline_state,
            _subscription: subscription,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribe to update broadcasts, registering an active connection.
    pub fn subscribe(&self, client_id: &str) -> broadcast::Receiver<Vec<u8>> {
        let rx = self.broadcast_tx.subscribe();
        let peer_count = {
            let mut connections = self.connections.lock().unwrap();
            connections.insert(client_id.to_string());
            connections.len()
        };
        let _ = self
            .control_tx
            .send(ControlMessage::PeerCountChanged { peer_count });
        rx
    }

    /// Subscribe to control messages
    pub fn subscribe_control(&self) -> broadcast::Receiver<ControlMessage> {
        self.control_tx.subscribe()
    }

    /// Unregister a connection
    pub fn unsubscribe(&self, client_id: &str) {
        let peer_count = {
            let mut connections = self.connections.lock().unwrap();
            connections.remove(client_id);
            connections.len()
        };
        let _ = self
            .control_tx
            .send(ControlMessage::PeerCountChanged { peer_count });
    }

    /// Get the number of active connections
    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    /// Apply an update from a client and fan it out to every connection.
    ///
    /// Persistence happens as a side effect: the document observer feeds the
    /// merge buffer.
    pub fn apply_remote_update(&self, payload: &[u8]) -> Result<()> {
        self.doc.apply_update(payload)?;
        let _ = self.broadcast_tx.send(payload.to_vec());
        Ok(())
    }

    /// Full document state for a newly connected client
    pub fn full_state(&self) -> Vec<u8> {
        self.doc.encode_state_as_update()
    }

    /// Current plain-text content
    pub fn content(&self) -> String {
        self.doc.plain_text()
    }

    /// Whether the document differs from its state at load time
    pub fn has_changed_since_load(&self) -> bool {
        self.doc.encode_state_as_update() != self.baseline_state
    }

    /// Flush the persistence buffer. See [`MergeBuffer::flush`].
    pub fn flush(&self, forced: bool) -> Result<Option<i64>> {
        self.buffer.flush(forced)
    }

    /// Persist everything before the room is dropped.
    ///
    /// Pending edits are force-flushed, and if the document changed at all
    /// since load, its full state is written as a final version so the room
    /// can be reloaded without replaying the session.
    pub fn archive(&self) -> Result<()> {
        self.buffer.flush(true)?;

        if self.has_changed_since_load() {
            let state = self.doc.encode_state_as_update();
            self.store.append_edit(&self.name, &state)?;
            debug!("Archived room '{}' with final state", self.name);
        } else {
            debug!("Archived room '{}' (unchanged)", self.name);
        }
        Ok(())
    }

    /// Broadcast a control message to all connected clients
    pub fn broadcast_control(&self, msg: ControlMessage) {
        let _ = self.control_tx.send(msg);
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("name", &self.name)
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use velum_core::crdt::MemoryLog;

    fn store() -> Arc<VersionStore> {
        Arc::new(VersionStore::new(Arc::new(MemoryLog::new())))
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_remote_update_broadcasts() {
        let room = Room::load("r", store(), RoomTimings::default()).unwrap();
        let mut rx = room.subscribe("c1");

        let source = RoomDoc::new();
        let update = source.insert_text(0, "hi");
        room.apply_remote_update(&update).unwrap();

        assert_eq!(rx.recv().await.unwrap(), update);
        assert_eq!(room.content(), "hi");
    }

    #[tokio::test(start_paused = true)]
    async fn test_archive_persists_round_trip() {
        let store = store();
        {
            let room = Room::load("r", store.clone(), RoomTimings::default()).unwrap();
            let source = RoomDoc::new();
            room.apply_remote_update(&source.insert_text(0, "X")).unwrap();
            room.archive().unwrap();
        }

        let reloaded = Room::load("r", store, RoomTimings::default()).unwrap();
        assert_eq!(reloaded.content(), "X");
        assert!(!reloaded.has_changed_since_load());
    }

    #[tokio::test(start_paused = true)]
    async fn test_archive_of_unchanged_room_writes_nothing() {
        let store = store();
        let source = RoomDoc::new();
        store.append_edit("r", &source.insert_text(0, "X")).unwrap();

        let room = Room::load("r", store.clone(), RoomTimings::default()).unwrap();
        room.archive().unwrap();

        assert_eq!(store.list_versions("r", i64::MAX).unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_control_message_json_shape() {
        let msg = ControlMessage::DocumentReset { version_id: 9 };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"document_reset","version_id":9}"#);
    }
}
