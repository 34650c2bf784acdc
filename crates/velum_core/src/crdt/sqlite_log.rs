//! SQLite-backed version log implementation.
//!
//! This module persists each room's update stream to a SQLite database,
//! together with tags and named snapshots. It is the production backend for
//! the version store.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};

use super::log::VersionLog;
use super::types::{NamedSnapshot, Tag, VersionMeta, VersionRecord};
use crate::error::Result;

/// SQLite-backed version log.
///
/// # Thread Safety
///
/// The connection is wrapped in a `Mutex` for thread-safe access.
/// SQLite itself is used in serialized threading mode.
pub struct SqliteLog {
    conn: Mutex<Connection>,
}

impl SqliteLog {
    /// Open or create a SQLite database at the given path.
    ///
    /// This will create the necessary tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or if schema
    /// initialization fails.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let log = Self {
            conn: Mutex::new(conn),
        };
        log.init_schema()?;
        Ok(log)
    }

    /// Create an in-memory SQLite database for testing.
    ///
    /// Data is lost when the log is dropped.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let log = Self {
            conn: Mutex::new(conn),
        };
        log.init_schema()?;
        Ok(log)
    }

    /// Initialize the database schema.
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            -- Per-room append-only version log. Snapshot rows hold the full
            -- document state; the rest hold incremental deltas.
            CREATE TABLE IF NOT EXISTS doc_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                room_name TEXT NOT NULL,
                update_data BLOB NOT NULL,
                is_snapshot INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );

            -- Index for replay and latest-version queries
            CREATE INDEX IF NOT EXISTS idx_doc_versions_room_id
                ON doc_versions(room_name, id);

            -- Named pointers into the version log, unique per (room, name)
            CREATE TABLE IF NOT EXISTS doc_tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                room_name TEXT NOT NULL,
                tag_name TEXT NOT NULL,
                version_id INTEGER NOT NULL,
                created_by TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE(room_name, tag_name)
            );

            -- User-named full-state snapshots (separate from log snapshots)
            CREATE TABLE IF NOT EXISTS doc_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                room_name TEXT NOT NULL,
                snapshot_name TEXT NOT NULL,
                state_data BLOB NOT NULL,
                created_by TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

impl std::fmt::Debug for SqliteLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteLog").finish_non_exhaustive()
    }
}

fn row_to_record(room: &str, row: &rusqlite::Row<'_>) -> rusqlite::Result<VersionRecord> {
    Ok(VersionRecord {
        id: row.get(0)?,
        room: room.to_string(),
        payload: row.get(1)?,
        is_snapshot: row.get::<_, i64>(2)? != 0,
        created_at: row.get(3)?,
    })
}

impl VersionLog for SqliteLog {
    fn append(&self, room: &str, payload: &[u8], is_snapshot: bool) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().timestamp_millis();

        conn.execute(
            "INSERT INTO doc_versions (room_name, update_data, is_snapshot, created_at)
             VALUES (?, ?, ?, ?)",
            params![room, payload, is_snapshot as i32, now],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn get(&self, room: &str, id: i64) -> Result<Option<VersionRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT id, update_data, is_snapshot, created_at FROM doc_versions
                 WHERE room_name = ? AND id = ?",
                params![room, id],
                |row| row_to_record(room, row),
            )
            .optional()?;
        Ok(record)
    }

    fn latest(&self, room: &str) -> Result<Option<VersionRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT id, update_data, is_snapshot, created_at FROM doc_versions
                 WHERE room_name = ? ORDER BY id DESC LIMIT 1",
                params![room],
                |row| row_to_record(room, row),
            )
            .optional()?;
        Ok(record)
    }

    fn latest_version_id(&self, room: &str) -> Result<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        let id = conn
            .query_row(
                "SELECT id FROM doc_versions WHERE room_name = ? ORDER BY id DESC LIMIT 1",
                params![room],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn updates_between(&self, room: &str, after_id: i64, up_to_id: i64) -> Result<Vec<Vec<u8>>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT update_data FROM doc_versions
             WHERE room_name = ? AND is_snapshot = 0 AND id > ? AND id <= ?
             ORDER BY id ASC",
        )?;
        let payloads = stmt
            .query_map(params![room, after_id, up_to_id], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(payloads)
    }

    fn newest_snapshot_at_or_before(&self, room: &str, id: i64) -> Result<Option<VersionRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT id, update_data, is_snapshot, created_at FROM doc_versions
                 WHERE room_name = ? AND is_snapshot = 1 AND id <= ?
                 ORDER BY id DESC LIMIT 1",
                params![room, id],
                |row| row_to_record(room, row),
            )
            .optional()?;
        Ok(record)
    }

    fn count_edits(&self, room: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM doc_versions WHERE room_name = ? AND is_snapshot = 0",
            params![room],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn overwrite_payload(&self, room: &str, id: i64, payload: &[u8]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE doc_versions SET update_data = ? WHERE room_name = ? AND id = ?",
            params![payload, room, id],
        )?;
        Ok(())
    }

    fn list_versions(&self, room: &str, limit: i64) -> Result<Vec<VersionMeta>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, created_at, LENGTH(update_data), is_snapshot FROM doc_versions
             WHERE room_name = ? ORDER BY id DESC LIMIT ?",
        )?;
        let versions = stmt
            .query_map(params![room, limit], |row| {
                Ok(VersionMeta {
                    id: row.get(0)?,
                    created_at: row.get(1)?,
                    size: row.get(2)?,
                    is_snapshot: row.get::<_, i64>(3)? != 0,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(versions)
    }

    fn upsert_tag(&self, room: &str, name: &str, version_id: i64, created_by: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().timestamp_millis();

        conn.execute(
            "INSERT INTO doc_tags (room_name, tag_name, version_id, created_by, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(room_name, tag_name) DO UPDATE SET
                 version_id = excluded.version_id,
                 created_by = excluded.created_by,
                 created_at = excluded.created_at",
            params![room, name, version_id, created_by, now],
        )?;

        let id = conn.query_row(
            "SELECT id FROM doc_tags WHERE room_name = ? AND tag_name = ?",
            params![room, name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn list_tags(&self, room: &str) -> Result<Vec<Tag>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, tag_name, version_id, created_by, created_at FROM doc_tags
             WHERE room_name = ? ORDER BY created_at DESC, id DESC",
        )?;
        let tags = stmt
            .query_map(params![room], |row| {
                Ok(Tag {
                    id: row.get(0)?,
                    room: room.to_string(),
                    name: row.get(1)?,
                    version_id: row.get(2)?,
                    created_by: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(tags)
    }

    fn delete_tag(&self, room: &str, tag_id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "DELETE FROM doc_tags WHERE room_name = ? AND id = ?",
            params![room, tag_id],
        )?;
        Ok(affected > 0)
    }

    fn insert_named_snapshot(
        &self,
        room: &str,
        name: &str,
        state: &[u8],
        created_by: &str,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().timestamp_millis();

        conn.execute(
            "INSERT INTO doc_snapshots (room_name, snapshot_name, state_data, created_by, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params![room, name, state, created_by, now],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn list_named_snapshots(&self, room: &str) -> Result<Vec<NamedSnapshot>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, snapshot_name, created_by, created_at FROM doc_snapshots
             WHERE room_name = ? ORDER BY created_at DESC, id DESC",
        )?;
        let snapshots = stmt
            .query_map(params![room], |row| {
                Ok(NamedSnapshot {
                    id: row.get(0)?,
                    room: room.to_string(),
                    name: row.get(1)?,
                    created_by: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(snapshots)
    }

    fn get_named_snapshot(&self, room: &str, id: i64) -> Result<Option<(String, Vec<u8>)>> {
        let conn = self.conn.lock().unwrap();
        let result = conn
            .query_row(
                "SELECT snapshot_name, state_data FROM doc_snapshots
                 WHERE room_name = ? AND id = ?",
                params![room, id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_get() {
        let log = SqliteLog::in_memory().unwrap();

        let id1 = log.append("room", b"u1", false).unwrap();
        let id2 = log.append("room", b"u2", true).unwrap();
        assert!(id1 < id2);

        let rec = log.get("room", id2).unwrap().unwrap();
        assert_eq!(rec.payload, b"u2");
        assert!(rec.is_snapshot);

        assert!(log.get("room", id2 + 100).unwrap().is_none());
        assert!(log.get("other", id1).unwrap().is_none());
    }

    #[test]
    fn test_latest_and_latest_id() {
        let log = SqliteLog::in_memory().unwrap();
        assert!(log.latest("room").unwrap().is_none());
        assert!(log.latest_version_id("room").unwrap().is_none());

        log.append("room", b"u1", false).unwrap();
        let id2 = log.append("room", b"u2", false).unwrap();

        assert_eq!(log.latest("room").unwrap().unwrap().id, id2);
        assert_eq!(log.latest_version_id("room").unwrap(), Some(id2));
    }

    #[test]
    fn test_updates_between_skips_snapshots() {
        let log = SqliteLog::in_memory().unwrap();
        let id1 = log.append("room", b"u1", false).unwrap();
        let _snap = log.append("room", b"s1", true).unwrap();
        let id3 = log.append("room", b"u3", false).unwrap();

        let all = log.updates_between("room", 0, i64::MAX).unwrap();
        assert_eq!(all, vec![b"u1".to_vec(), b"u3".to_vec()]);

        let after = log.updates_between("room", id1, id3).unwrap();
        assert_eq!(after, vec![b"u3".to_vec()]);
    }

    #[test]
    fn test_newest_snapshot_at_or_before() {
        let log = SqliteLog::in_memory().unwrap();
        let s1 = log.append("room", b"s1", true).unwrap();
        let e1 = log.append("room", b"u1", false).unwrap();
        let s2 = log.append("room", b"s2", true).unwrap();

        assert_eq!(
            log.newest_snapshot_at_or_before("room", e1).unwrap().unwrap().id,
            s1
        );
        assert_eq!(
            log.newest_snapshot_at_or_before("room", i64::MAX)
                .unwrap()
                .unwrap()
                .id,
            s2
        );
        assert!(
            log.newest_snapshot_at_or_before("room", s1 - 1)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_count_edits_excludes_snapshots() {
        let log = SqliteLog::in_memory().unwrap();
        log.append("room", b"u1", false).unwrap();
        log.append("room", b"s1", true).unwrap();
        log.append("room", b"u2", false).unwrap();

        assert_eq!(log.count_edits("room").unwrap(), 2);
        assert_eq!(log.count_edits("other").unwrap(), 0);
    }

    #[test]
    fn test_overwrite_payload_keeps_id_and_flag() {
        let log = SqliteLog::in_memory().unwrap();
        let id = log.append("room", b"old", false).unwrap();

        log.overwrite_payload("room", id, b"new").unwrap();

        let rec = log.get("room", id).unwrap().unwrap();
        assert_eq!(rec.payload, b"new");
        assert!(!rec.is_snapshot);
        assert_eq!(log.latest_version_id("room").unwrap(), Some(id));
    }

    #[test]
    fn test_list_versions_newest_first() {
        let log = SqliteLog::in_memory().unwrap();
        log.append("room", b"abc", false).unwrap();
        let id2 = log.append("room", b"defgh", true).unwrap();

        let versions = log.list_versions("room", 10).unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].id, id2);
        assert_eq!(versions[0].size, 5);
        assert!(versions[0].is_snapshot);

        let limited = log.list_versions("room", 1).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_tag_upsert_moves_pointer() {
        let log = SqliteLog::in_memory().unwrap();
        let v1 = log.append("room", b"u1", false).unwrap();
        let v2 = log.append("room", b"u2", false).unwrap();

        let t1 = log.upsert_tag("room", "release", v1, "alice").unwrap();
        let t2 = log.upsert_tag("room", "release", v2, "bob").unwrap();
        assert_eq!(t1, t2);

        let tags = log.list_tags("room").unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].version_id, v2);
        assert_eq!(tags[0].created_by, "bob");
    }

    #[test]
    fn test_delete_tag() {
        let log = SqliteLog::in_memory().unwrap();
        let v1 = log.append("room", b"u1", false).unwrap();
        let tag_id = log.upsert_tag("room", "release", v1, "alice").unwrap();

        assert!(log.delete_tag("room", tag_id).unwrap());
        assert!(!log.delete_tag("room", tag_id).unwrap());
        assert!(log.list_tags("room").unwrap().is_empty());
    }

    #[test]
    fn test_named_snapshots() {
        let log = SqliteLog::in_memory().unwrap();

        let id = log
            .insert_named_snapshot("room", "before-refactor", b"state", "alice")
            .unwrap();

        let listed = log.list_named_snapshots("room").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "before-refactor");

        let (name, state) = log.get_named_snapshot("room", id).unwrap().unwrap();
        assert_eq!(name, "before-refactor");
        assert_eq!(state, b"state");

        assert!(log.get_named_snapshot("room", id + 1).unwrap().is_none());
    }

    #[test]
    fn test_open_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.db");
        {
            let log = SqliteLog::open(&path).unwrap();
            log.append("room", b"u1", false).unwrap();
        }

        let log = SqliteLog::open(&path).unwrap();
        assert_eq!(log.count_edits("room").unwrap(), 1);
        assert_eq!(log.latest("room").unwrap().unwrap().payload, b"u1");
    }

    #[test]
    fn test_rooms_are_isolated() {
        let log = SqliteLog::in_memory().unwrap();
        log.append("a", b"u1", false).unwrap();
        log.append("b", b"u2", false).unwrap();

        assert_eq!(log.count_edits("a").unwrap(), 1);
        assert_eq!(log.updates_between("b", 0, i64::MAX).unwrap().len(), 1);
    }
}
