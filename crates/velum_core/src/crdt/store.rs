//! Version store: snapshot cadence, reconstruction, rollback, tags.
//!
//! [`VersionStore`] layers history semantics over a [`VersionLog`] backend.
//! The log stores opaque payloads; this module decides when a snapshot is
//! materialized, how a document is rebuilt at a point in time, and how
//! rollback and named snapshots are expressed as new log records.

use std::sync::Arc;

use super::doc::RoomDoc;
use super::log::VersionLog;
use super::types::{NamedSnapshot, Tag, VersionMeta};
use crate::error::{Result, VelumError};

/// A full-state snapshot is written after every N non-snapshot records.
pub const SNAPSHOT_INTERVAL: i64 = 50;

/// History operations for room documents over a pluggable log backend.
///
/// History is append-only. Rollback and snapshot restore copy an old state
/// forward as a new snapshot record; no record is ever deleted.
pub struct VersionStore {
    log: Arc<dyn VersionLog>,
    snapshot_interval: i64,
}

impl VersionStore {
    pub fn new(log: Arc<dyn VersionLog>) -> Self {
        Self {
            log,
            snapshot_interval: SNAPSHOT_INTERVAL,
        }
    }

    /// Override the snapshot cadence. Mainly useful in tests.
    pub fn with_snapshot_interval(log: Arc<dyn VersionLog>, interval: i64) -> Self {
        Self {
            log,
            snapshot_interval: interval,
        }
    }

    /// Append an incremental edit to a room's log.
    ///
    /// Every `snapshot_interval`-th edit additionally materializes a
    /// full-state snapshot record, so reconstruction never replays more than
    /// one interval's worth of deltas. A failed snapshot write is logged and
    /// does not fail the edit.
    pub fn append_edit(&self, room: &str, payload: &[u8]) -> Result<i64> {
        let id = self.log.append(room, payload, false)?;

        let count = self.log.count_edits(room)?;
        if count % self.snapshot_interval == 0 {
            if let Err(e) = self.materialize_snapshot(room, id) {
                log::warn!("Failed to write snapshot for room '{}': {}", room, e);
            }
        }

        Ok(id)
    }

    /// Append a full-state snapshot record.
    pub fn append_snapshot(&self, room: &str, state: &[u8]) -> Result<i64> {
        self.log.append(room, state, true)
    }

    fn materialize_snapshot(&self, room: &str, up_to: i64) -> Result<i64> {
        let doc = self.load_at(room, Some(up_to))?;
        let state = doc.encode_state_as_update();
        self.append_snapshot(room, &state)
    }

    /// Fold an edit into the room's most recent record instead of appending.
    ///
    /// Used for edits that land within the merge window of the previous
    /// flush. Falls back to a plain append when the log is empty or the
    /// merge fails.
    pub fn merge_into_latest(&self, room: &str, payload: &[u8]) -> Result<i64> {
        let Some(latest) = self.log.latest(room)? else {
            return self.append_edit(room, payload);
        };

        match RoomDoc::merge_updates(&[latest.payload, payload.to_vec()]) {
            Ok(merged) => {
                self.log.overwrite_payload(room, latest.id, &merged)?;
                Ok(latest.id)
            }
            Err(e) => {
                log::warn!(
                    "Merge into version {} failed for room '{}', appending instead: {}",
                    latest.id,
                    room,
                    e
                );
                self.append_edit(room, payload)
            }
        }
    }

    /// Reconstruct a room's document at a version, or at the latest state
    /// when `target` is `None`.
    ///
    /// Loading starts from the newest snapshot at or before the target and
    /// replays the deltas after it. Records that fail to decode or apply are
    /// skipped with a warning so one corrupt payload cannot wedge the room.
    pub fn load_at(&self, room: &str, target: Option<i64>) -> Result<RoomDoc> {
        let up_to = target.unwrap_or(i64::MAX);
        let doc = RoomDoc::new();

        let mut after = 0;
        if let Some(snapshot) = self.log.newest_snapshot_at_or_before(room, up_to)? {
            if let Err(e) = doc.apply_update(&snapshot.payload) {
                log::warn!(
                    "Skipping unreadable snapshot {} for room '{}': {}",
                    snapshot.id,
                    room,
                    e
                );
            } else {
                after = snapshot.id;
            }
        }

        for payload in self.log.updates_between(room, after, up_to)? {
            if let Err(e) = doc.apply_update(&payload) {
                log::warn!("Skipping unreadable update for room '{}': {}", room, e);
            }
        }

        Ok(doc)
    }

    /// Roll a room back to an earlier version.
    ///
    /// The old state is appended as a new snapshot record; every version that
    /// existed before the rollback remains loadable. Returns the id of the
    /// new record.
    pub fn rollback(&self, room: &str, version_id: i64) -> Result<i64> {
        if !self.has_version(room, version_id)? {
            return Err(VelumError::VersionNotFound {
                room: room.to_string(),
                version: version_id,
            });
        }

        let doc = self.load_at(room, Some(version_id))?;
        let state = doc.encode_state_as_update();
        self.append_snapshot(room, &state)
    }

    /// Whether a version exists in a room's log.
    pub fn has_version(&self, room: &str, version_id: i64) -> Result<bool> {
        Ok(self.log.get(room, version_id)?.is_some())
    }

    /// Version metadata for a room, newest first.
    pub fn list_versions(&self, room: &str, limit: i64) -> Result<Vec<VersionMeta>> {
        self.log.list_versions(room, limit)
    }

    /// The id of the room's most recent version, if any.
    pub fn latest_version_id(&self, room: &str) -> Result<Option<i64>> {
        self.log.latest_version_id(room)
    }

    // Tags

    /// Tag a version with a name. Re-tagging an existing name moves it.
    pub fn create_tag(
        &self,
        room: &str,
        name: &str,
        version_id: i64,
        created_by: &str,
    ) -> Result<Tag> {
        if !self.has_version(room, version_id)? {
            return Err(VelumError::VersionNotFound {
                room: room.to_string(),
                version: version_id,
            });
        }

        let id = self.log.upsert_tag(room, name, version_id, created_by)?;
        Ok(Tag {
            id,
            room: room.to_string(),
            name: name.to_string(),
            version_id,
            created_by: created_by.to_string(),
            created_at: chrono::Utc::now().timestamp_millis(),
        })
    }

    pub fn list_tags(&self, room: &str) -> Result<Vec<Tag>> {
        self.log.list_tags(room)
    }

    pub fn delete_tag(&self, room: &str, tag_id: i64) -> Result<()> {
        if self.log.delete_tag(room, tag_id)? {
            Ok(())
        } else {
            Err(VelumError::TagNotFound(tag_id))
        }
    }

    // Named snapshots

    /// Save a user-named snapshot of the given full document state.
    pub fn create_named_snapshot(
        &self,
        room: &str,
        name: &str,
        state: &[u8],
        created_by: &str,
    ) -> Result<i64> {
        self.log.insert_named_snapshot(room, name, state, created_by)
    }

    pub fn list_named_snapshots(&self, room: &str) -> Result<Vec<NamedSnapshot>> {
        self.log.list_named_snapshots(room)
    }

    /// Restore a named snapshot by appending its state as a new snapshot
    /// record in the version log. Returns the id of the new record.
    pub fn restore_named_snapshot(&self, room: &str, snapshot_id: i64) -> Result<i64> {
        let Some((_, state)) = self.log.get_named_snapshot(room, snapshot_id)? else {
            return Err(VelumError::SnapshotNotFound {
                room: room.to_string(),
                snapshot: snapshot_id,
            });
        };
        self.append_snapshot(room, &state)
    }
}

impl std::fmt::Debug for VersionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionStore")
            .field("snapshot_interval", &self.snapshot_interval)
            .finish_non_exhaustive()
    }
}
