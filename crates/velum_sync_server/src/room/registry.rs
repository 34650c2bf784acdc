use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info};
use velum_core::Result;
use velum_core::crdt::VersionStore;

use super::room::{ControlMessage, Room};
use super::RoomTimings;

/// Statistics about the registry
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    pub active_connections: usize,
    pub active_rooms: usize,
}

/// Registry of live rooms.
///
/// Rooms move through three states: not loaded, loaded, and draining. A room
/// whose last client disconnects is not dropped immediately; a drain timer
/// gives reconnecting clients a grace period. When the timer fires with the
/// room still empty, the room is archived and removed. The rooms write lock
/// is held across the archive so a concurrent open always sees either the
/// live room or the fully persisted log, never a half-archived room.
pub struct RoomRegistry {
    /// Map of room name to live Room
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    /// Pending drain timers per room
    drain_timers: Mutex<HashMap<String, JoinHandle<()>>>,
    store: Arc<VersionStore>,
    timings: RoomTimings,
}

impl RoomRegistry {
    pub fn new(store: Arc<VersionStore>, timings: RoomTimings) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            drain_timers: Mutex::new(HashMap::new()),
            store,
            timings,
        }
    }

    /// The version store backing all rooms
    pub fn store(&self) -> &Arc<VersionStore> {
        &self.store
    }

    /// Get or load a room. Cancels any pending drain timer for it.
    pub async fn open(&self, name: &str) -> Result<Arc<Room>> {
        self.cancel_drain(name);

        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(name) {
                return Ok(room.clone());
            }
        }

        let mut rooms = self.rooms.write().await;

        // Double-check after acquiring write lock
        if let Some(room) = rooms.get(name) {
            return Ok(room.clone());
        }

        let room = Room::load(name, self.store.clone(), self.timings)?;
        rooms.insert(name.to_string(), room.clone());
        info!("Loaded room: {}", name);

        Ok(room)
    }

    /// Get a live room without loading it
    pub async fn get(&self, name: &str) -> Option<Arc<Room>> {
        let rooms = self.rooms.read().await;
        rooms.get(name).cloned()
    }

    /// Start the drain grace period for a room whose last client left.
    ///
    /// If the room is still empty when the timer fires, it is archived and
    /// removed. A reconnect in the meantime cancels the timer via `open`.
    pub fn schedule_drain(self: &Arc<Self>, name: &str) {
        let registry = self.clone();
        let room_name = name.to_string();
        let delay = self.timings.drain_delay;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            registry.archive_if_idle(&room_name).await;
        });

        let mut timers = self.drain_timers.lock().unwrap();
        if let Some(previous) = timers.insert(name.to_string(), handle) {
            previous.abort();
        }
    }

    /// Archive and remove a room if it still has no connections.
    async fn archive_if_idle(&self, name: &str) {
        let mut rooms = self.rooms.write().await;

        // The timer already fired; its map entry is stale on every path
        // below.
        self.drain_timers.lock().unwrap().remove(name);

        if let Some(room) = rooms.get(name) {
            if room.connection_count() > 0 {
                return;
            }
            if let Err(e) = room.archive() {
                error!("Failed to archive room '{}': {}", name, e);
            }
            rooms.remove(name);
            info!("Archived and removed idle room: {}", name);
        }
    }

    #[cfg(test)]
    fn drain_timer_count(&self) -> usize {
        self.drain_timers.lock().unwrap().len()
    }

    fn cancel_drain(&self, name: &str) {
        let mut timers = self.drain_timers.lock().unwrap();
        if let Some(handle) = timers.remove(name) {
            handle.abort();
        }
    }

    /// Force-flush a live room's pending edits, if the room is loaded.
    pub async fn flush_room(&self, name: &str) -> Result<Option<i64>> {
        match self.get(name).await {
            Some(room) => room.flush(true),
            None => Ok(None),
        }
    }

    /// Drop a live room after its history was rewound.
    ///
    /// Connected clients are told to reconnect; the next open reloads the
    /// document from the log.
    pub async fn evict_for_reset(&self, name: &str, new_version_id: i64) {
        self.cancel_drain(name);

        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.remove(name) {
            room.broadcast_control(ControlMessage::DocumentReset {
                version_id: new_version_id,
            });
            info!("Evicted room '{}' after history reset", name);
        }
    }

    /// Archive every live room. Used on server shutdown.
    pub async fn archive_all(&self) {
        let mut rooms = self.rooms.write().await;
        for (name, room) in rooms.drain() {
            if let Err(e) = room.archive() {
                error!("Failed to archive room '{}' on shutdown: {}", name, e);
            }
        }
    }

    /// Get statistics about live rooms
    pub async fn stats(&self) -> RegistryStats {
        let rooms = self.rooms.read().await;
        RegistryStats {
            active_connections: rooms.values().map(|r| r.connection_count()).sum(),
            active_rooms: rooms.len(),
        }
    }
}

impl std::fmt::Debug for RoomRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use velum_core::crdt::{MemoryLog, RoomDoc};

    fn registry() -> Arc<RoomRegistry> {
        let store = Arc::new(VersionStore::new(Arc::new(MemoryLog::new())));
        Arc::new(RoomRegistry::new(store, RoomTimings::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_returns_same_room() {
        let registry = registry();
        let a = registry.open("r").await.unwrap();
        let b = registry.open("r").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.stats().await.active_rooms, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_archives_idle_room() {
        let registry = registry();
        let room = registry.open("r").await.unwrap();

        let source = RoomDoc::new();
        room.apply_remote_update(&source.insert_text(0, "X")).unwrap();
        drop(room);

        registry.schedule_drain("r");
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert!(registry.get("r").await.is_none());

        // State survived the unload.
        let reloaded = registry.open("r").await.unwrap();
        assert_eq!(reloaded.content(), "X");
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(velum_core::crdt::SqliteLog::open(dir.path().join("velum.db")).unwrap());
        let registry = Arc::new(RoomRegistry::new(
            Arc::new(VersionStore::new(log)),
            RoomTimings::default(),
        ));

        let room = registry.open("r").await.unwrap();
        let source = RoomDoc::new();
        room.apply_remote_update(&source.insert_text(0, "disk")).unwrap();
        drop(room);

        registry.schedule_drain("r");
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(registry.get("r").await.is_none());

        let reloaded = registry.open("r").await.unwrap();
        assert_eq!(reloaded.content(), "disk");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_cancels_drain() {
        let registry = registry();
        let room = registry.open("r").await.unwrap();

        registry.schedule_drain("r");
        tokio::time::sleep(Duration::from_secs(2)).await;

        let reopened = registry.open("r").await.unwrap();
        assert!(Arc::ptr_eq(&room, &reopened));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(registry.get("r").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_skipped_while_clients_connected() {
        let registry = registry();
        let room = registry.open("r").await.unwrap();
        let _rx = room.subscribe("c1");

        registry.schedule_drain("r");
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert!(registry.get("r").await.is_some());
        // The fired timer's entry is cleaned up even though the room stays.
        assert_eq!(registry.drain_timer_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_for_reset_notifies_clients() {
        let registry = registry();
        let room = registry.open("r").await.unwrap();
        let mut control_rx = room.subscribe_control();

        registry.evict_for_reset("r", 7).await;

        assert!(registry.get("r").await.is_none());
        match control_rx.recv().await.unwrap() {
            ControlMessage::DocumentReset { version_id } => assert_eq!(version_id, 7),
            other => panic!("unexpected control message: {:?}", other),
        }
    }
}
