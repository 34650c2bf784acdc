use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};
use velum_core::Result;
use velum_core::crdt::{RoomDoc, UpdateSink, VersionStore};

use super::RoomTimings;

/// Debounce/merge buffer between a live document and its version log.
///
/// Edits observed on the document accumulate here. A flush happens once the
/// room has been quiet for the debounce period, persisting the whole burst as
/// a single version. Two more rules keep the log small:
///
/// - A flush whose resulting plain text equals the previously persisted text
///   (e.g. an insert immediately undone) is held back: the burst stays
///   buffered and rides along with the next flush, so the persisted update
///   stream never has gaps.
/// - A flush landing within the merge window of the previous one is folded
///   into the previous version instead of appending a new one.
///
/// A forced flush bypasses all three rules and is used when a room drains.
pub struct MergeBuffer {
    room: String,
    doc: Arc<RoomDoc>,
    store: Arc<VersionStore>,
    merge_window: Duration,
    poke_tx: mpsc::UnboundedSender<()>,
    /// Held across drain-and-persist so concurrent flushes serialize
    flush_lock: Mutex<()>,
    inner: Mutex<BufferInner>,
}

struct BufferInner {
    pending: Vec<Vec<u8>>,
    /// When the last version was persisted, for the merge window
    last_flush: Option<Instant>,
    /// Plain text at the last persisted flush, for content dedup
    last_content: Option<String>,
}

impl MergeBuffer {
    /// Create a buffer and spawn its debounce worker.
    ///
    /// `initial_content` is the document's plain text at load time, so that
    /// an edit burst with no net effect on a freshly loaded room is deduped.
    pub fn spawn(
        room: String,
        doc: Arc<RoomDoc>,
        store: Arc<VersionStore>,
        timings: RoomTimings,
        initial_content: String,
    ) -> Arc<Self> {
        let (poke_tx, poke_rx) = mpsc::unbounded_channel();
        let buffer = Arc::new(Self {
            room,
            doc,
            store,
            merge_window: timings.merge_window,
            poke_tx,
            flush_lock: Mutex::new(()),
            inner: Mutex::new(BufferInner {
                pending: Vec::new(),
                last_flush: None,
                last_content: Some(initial_content),
            }),
        });

        Self::spawn_worker(Arc::downgrade(&buffer), poke_rx, timings.debounce);
        buffer
    }

    /// Debounce loop: wait for a poke, then flush once the room has been
    /// quiet for the debounce period. Holds only a weak reference so the
    /// buffer (and its room) can be dropped while the worker is idle.
    fn spawn_worker(
        buffer: Weak<MergeBuffer>,
        mut poke_rx: mpsc::UnboundedReceiver<()>,
        debounce: Duration,
    ) {
        tokio::spawn(async move {
            while poke_rx.recv().await.is_some() {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(debounce) => break,
                        poke = poke_rx.recv() => {
                            if poke.is_none() {
                                return;
                            }
                        }
                    }
                }

                let Some(buffer) = buffer.upgrade() else {
                    return;
                };
                if let Err(e) = buffer.flush(false) {
                    warn!("Failed to flush room '{}': {}", buffer.room, e);
                }
            }
        });
    }

    /// Number of buffered update payloads awaiting flush.
    pub fn pending_len(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }

    /// Persist buffered edits as one version.
    ///
    /// A forced flush skips content dedup and the merge window; it always
    /// appends. Returns the id of the version written, or `None` when there
    /// was nothing to persist. A failed write is retried once; the payloads
    /// are dropped if the retry fails too.
    ///
    /// Flushes serialize: a call returns only once any in-flight flush has
    /// finished persisting, so a forced flush before a rollback never races
    /// the debounce worker's write.
    pub fn flush(&self, forced: bool) -> Result<Option<i64>> {
        let _flush_guard = self.flush_lock.lock().unwrap();

        let pending: Vec<Vec<u8>> = {
            let mut inner = self.inner.lock().unwrap();
            std::mem::take(&mut inner.pending)
        };
        if pending.is_empty() {
            return Ok(None);
        }

        let current_text = self.doc.plain_text();

        if !forced {
            let mut inner = self.inner.lock().unwrap();
            if inner.last_content.as_deref() == Some(current_text.as_str()) {
                debug!(
                    "Holding back {} update(s) for room '{}': content unchanged",
                    pending.len(),
                    self.room
                );
                // Requeue ahead of anything that arrived while flushing, so
                // the stored update stream stays gap-free.
                let mut held = pending;
                held.append(&mut inner.pending);
                inner.pending = held;
                return Ok(None);
            }
        }

        let merged = RoomDoc::merge_updates(&pending)?;

        let within_window = !forced
            && self
                .inner
                .lock()
                .unwrap()
                .last_flush
                .is_some_and(|at| at.elapsed() < self.merge_window);

        let persist = |payload: &[u8]| {
            if within_window {
                self.store.merge_into_latest(&self.room, payload)
            } else {
                self.store.append_edit(&self.room, payload)
            }
        };

        let id = match persist(&merged) {
            Ok(id) => id,
            Err(e) => {
                warn!("Flush failed for room '{}', retrying once: {}", self.room, e);
                persist(&merged)?
            }
        };

        let mut inner = self.inner.lock().unwrap();
        inner.last_flush = Some(Instant::now());
        inner.last_content = Some(current_text);

        debug!(
            "Flushed room '{}' to version {} ({})",
            self.room,
            id,
            if within_window { "merged" } else { "appended" }
        );
        Ok(Some(id))
    }
}

impl UpdateSink for MergeBuffer {
    fn on_update(&self, payload: &[u8]) {
        self.inner.lock().unwrap().pending.push(payload.to_vec());
        // Worker gone means the room is being torn down; the registry flushes
        // explicitly on that path.
        let _ = self.poke_tx.send(());
    }
}

impl std::fmt::Debug for MergeBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeBuffer")
            .field("room", &self.room)
            .field("pending", &self.pending_len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use velum_core::crdt::{MemoryLog, NamedSnapshot, Tag, VersionLog, VersionMeta, VersionRecord};

    /// Log whose first append blocks until the gate is released. Used to
    /// hold one flush mid-persist while another runs.
    struct GatedLog {
        inner: MemoryLog,
        gate: Mutex<Option<mpsc::Receiver<()>>>,
        appending: AtomicBool,
    }

    impl GatedLog {
        fn new(gate: mpsc::Receiver<()>) -> Self {
            Self {
                inner: MemoryLog::new(),
                gate: Mutex::new(Some(gate)),
                appending: AtomicBool::new(false),
            }
        }

        fn wait_until_appending(&self) {
            while !self.appending.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
        }
    }

    impl VersionLog for GatedLog {
        fn append(&self, room: &str, payload: &[u8], is_snapshot: bool) -> Result<i64> {
            self.appending.store(true, Ordering::SeqCst);
            if let Some(gate) = self.gate.lock().unwrap().take() {
                gate.recv().unwrap();
            }
            self.inner.append(room, payload, is_snapshot)
        }

        fn get(&self, room: &str, id: i64) -> Result<Option<VersionRecord>> {
            self.inner.get(room, id)
        }

        fn latest(&self, room: &str) -> Result<Option<VersionRecord>> {
            self.inner.latest(room)
        }

        fn latest_version_id(&self, room: &str) -> Result<Option<i64>> {
            self.inner.latest_version_id(room)
        }

        fn updates_between(&self, room: &str, after_id: i64, up_to_id: i64) -> Result<Vec<Vec<u8>>> {
            self.inner.updates_between(room, after_id, up_to_id)
        }

        fn newest_snapshot_at_or_before(&self, room: &str, id: i64) -> Result<Option<VersionRecord>> {
            self.inner.newest_snapshot_at_or_before(room, id)
        }

        fn count_edits(&self, room: &str) -> Result<i64> {
            self.inner.count_edits(room)
        }

        fn overwrite_payload(&self, room: &str, id: i64, payload: &[u8]) -> Result<()> {
            self.inner.overwrite_payload(room, id, payload)
        }

        fn list_versions(&self, room: &str, limit: i64) -> Result<Vec<VersionMeta>> {
            self.inner.list_versions(room, limit)
        }

        fn upsert_tag(&self, room: &str, name: &str, version_id: i64, created_by: &str) -> Result<i64> {
            self.inner.upsert_tag(room, name, version_id, created_by)
        }

        fn list_tags(&self, room: &str) -> Result<Vec<Tag>> {
            self.inner.list_tags(room)
        }

        fn delete_tag(&self, room: &str, tag_id: i64) -> Result<bool> {
            self.inner.delete_tag(room, tag_id)
        }

        fn insert_named_snapshot(
            &self,
            room: &str,
            name: &str,
            state: &[u8],
            created_by: &str,
        ) -> Result<i64> {
            self.inner.insert_named_snapshot(room, name, state, created_by)
        }

        fn list_named_snapshots(&self, room: &str) -> Result<Vec<NamedSnapshot>> {
            self.inner.list_named_snapshots(room)
        }

        fn get_named_snapshot(&self, room: &str, id: i64) -> Result<Option<(String, Vec<u8>)>> {
            self.inner.get_named_snapshot(room, id)
        }
    }

    fn setup(initial: &str) -> (Arc<VersionStore>, Arc<RoomDoc>, Arc<MergeBuffer>) {
        let store = Arc::new(VersionStore::new(Arc::new(MemoryLog::new())));
        let doc = Arc::new(RoomDoc::new());
        if !initial.is_empty() {
            doc.insert_text(0, initial);
        }
        let buffer = MergeBuffer::spawn(
            "room".to_string(),
            doc.clone(),
            store.clone(),
            RoomTimings::default(),
            doc.plain_text(),
        );
        (store, doc, buffer)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_version() {
        let (store, doc, buffer) = setup("");
        let _sub = doc.attach_sink(buffer.clone());

        doc.insert_text(0, "a");
        tokio::time::sleep(Duration::from_millis(500)).await;
        doc.insert_text(1, "b");
        tokio::time::sleep(Duration::from_millis(500)).await;
        doc.insert_text(2, "c");

        // Quiet period elapses, single flush fires.
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(store.list_versions("room", i64::MAX).unwrap().len(), 1);
        assert_eq!(store.load_at("room", None).unwrap().plain_text(), "abc");
        assert_eq!(buffer.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_within_merge_window_folds_into_previous_version() {
        let (store, doc, buffer) = setup("");
        let _sub = doc.attach_sink(buffer.clone());

        doc.insert_text(0, "a");
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(store.list_versions("room", i64::MAX).unwrap().len(), 1);

        // Second flush lands ~3s after the first, inside the 5s window.
        doc.insert_text(1, "b");
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(store.list_versions("room", i64::MAX).unwrap().len(), 1);
        assert_eq!(store.load_at("room", None).unwrap().plain_text(), "ab");

        // Third flush lands well outside the window and appends.
        tokio::time::sleep(Duration::from_secs(10)).await;
        doc.insert_text(2, "c");
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(store.list_versions("room", i64::MAX).unwrap().len(), 2);
        assert_eq!(store.load_at("room", None).unwrap().plain_text(), "abc");
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_net_change_is_not_persisted() {
        let (store, doc, buffer) = setup("");
        let _sub = doc.attach_sink(buffer.clone());

        doc.insert_text(0, "x");
        doc.delete_range(0, 1);
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(store.list_versions("room", i64::MAX).unwrap().is_empty());

        // A real change afterwards still persists.
        doc.insert_text(0, "y");
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(store.list_versions("room", i64::MAX).unwrap().len(), 1);
        assert_eq!(store.load_at("room", None).unwrap().plain_text(), "y");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dedup_uses_loaded_content_as_baseline() {
        let (store, doc, buffer) = setup("hello");
        let _sub = doc.attach_sink(buffer.clone());

        // Append and undo against a non-empty starting state.
        doc.insert_text(5, "!");
        doc.delete_range(5, 1);
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(store.list_versions("room", i64::MAX).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_flush_bypasses_debounce_and_dedup() {
        let (store, doc, buffer) = setup("");
        let _sub = doc.attach_sink(buffer.clone());

        doc.insert_text(0, "x");
        doc.delete_range(0, 1);

        // No time passes; forced flush persists the no-op burst anyway.
        let id = buffer.flush(true).unwrap();
        assert!(id.is_some());
        assert_eq!(store.list_versions("room", i64::MAX).unwrap().len(), 1);
        assert_eq!(store.load_at("room", None).unwrap().plain_text(), "");
        assert_eq!(buffer.pending_len(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_flushes_serialize() {
        let (gate_tx, gate_rx) = mpsc::channel();
        let log = Arc::new(GatedLog::new(gate_rx));
        let store = Arc::new(VersionStore::new(log.clone()));
        let doc = Arc::new(RoomDoc::new());
        let buffer = MergeBuffer::spawn(
            "room".to_string(),
            doc.clone(),
            store.clone(),
            RoomTimings::default(),
            doc.plain_text(),
        );
        let _sub = doc.attach_sink(buffer.clone());

        doc.insert_text(0, "a");

        // First flush blocks inside the log append.
        let slow = {
            let buffer = buffer.clone();
            tokio::task::spawn_blocking(move || buffer.flush(false).unwrap())
        };
        log.wait_until_appending();

        // A forced flush must wait for the in-flight one; by the time it
        // returns, the pending edit is in the log and cannot land after a
        // subsequent history rewrite.
        let forced = {
            let buffer = buffer.clone();
            let store = store.clone();
            tokio::task::spawn_blocking(move || {
                buffer.flush(true).unwrap();
                store.list_versions("room", i64::MAX).unwrap().len()
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!forced.is_finished());

        gate_tx.send(()).unwrap();
        assert_eq!(slow.await.unwrap(), Some(1));
        assert_eq!(forced.await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_with_empty_buffer_is_noop() {
        let (store, _doc, buffer) = setup("");
        assert_eq!(buffer.flush(true).unwrap(), None);
        assert!(store.list_versions("room", i64::MAX).unwrap().is_empty());
    }
}
