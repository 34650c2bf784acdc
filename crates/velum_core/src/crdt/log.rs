//! Version log storage abstraction.

use crate::error::Result;

use super::types::{NamedSnapshot, Tag, VersionMeta, VersionRecord};

/// Append-only per-room log of CRDT update payloads, plus tags and named
/// snapshots.
///
/// Records within a room are strictly ordered by `id`. Implementations only
/// store and retrieve opaque payloads; snapshot cadence, reconstruction and
/// rollback live in [`super::VersionStore`].
///
/// The single sanctioned mutation of an existing record is
/// [`overwrite_payload`](VersionLog::overwrite_payload), used by the server's
/// merge window to fold a rapid follow-up edit into the previous record.
pub trait VersionLog: Send + Sync {
    /// Append a record to a room's log and return its id.
    fn append(&self, room: &str, payload: &[u8], is_snapshot: bool) -> Result<i64>;

    /// Fetch a single record by id, if it exists in this room.
    fn get(&self, room: &str, id: i64) -> Result<Option<VersionRecord>>;

    /// The most recent record of a room, if any.
    fn latest(&self, room: &str) -> Result<Option<VersionRecord>>;

    /// The id of a room's most recent record, if any.
    fn latest_version_id(&self, room: &str) -> Result<Option<i64>>;

    /// Non-snapshot payloads with `after_id < id <= up_to_id`, ascending.
    ///
    /// `up_to_id = i64::MAX` means "through the end of the log".
    fn updates_between(&self, room: &str, after_id: i64, up_to_id: i64) -> Result<Vec<Vec<u8>>>;

    /// The newest snapshot record at or before the given id, if any.
    fn newest_snapshot_at_or_before(&self, room: &str, id: i64) -> Result<Option<VersionRecord>>;

    /// Number of non-snapshot records in a room's log.
    fn count_edits(&self, room: &str) -> Result<i64>;

    /// Replace the payload of an existing record, keeping its id, flag and
    /// timestamp.
    fn overwrite_payload(&self, room: &str, id: i64, payload: &[u8]) -> Result<()>;

    /// Version metadata for a room, newest first, up to `limit` entries.
    fn list_versions(&self, room: &str, limit: i64) -> Result<Vec<VersionMeta>>;

    // Tags

    /// Create a tag or, if `(room, name)` already exists, move it to the new
    /// version. Returns the tag id.
    fn upsert_tag(&self, room: &str, name: &str, version_id: i64, created_by: &str) -> Result<i64>;

    /// Tags of a room, newest first.
    fn list_tags(&self, room: &str) -> Result<Vec<Tag>>;

    /// Delete a tag by id. Returns whether a row was removed.
    fn delete_tag(&self, room: &str, tag_id: i64) -> Result<bool>;

    // Named snapshots

    /// Store a user-named full-state snapshot. Returns the snapshot id.
    fn insert_named_snapshot(
        &self,
        room: &str,
        name: &str,
        state: &[u8],
        created_by: &str,
    ) -> Result<i64>;

    /// Named snapshot metadata for a room, newest first.
    fn list_named_snapshots(&self, room: &str) -> Result<Vec<NamedSnapshot>>;

    /// Fetch a named snapshot's name and state blob by id.
    fn get_named_snapshot(&self, room: &str, id: i64) -> Result<Option<(String, Vec<u8>)>>;
}
