//! In-memory version log implementation for tests and ephemeral servers.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};

use super::log::VersionLog;
use super::types::{NamedSnapshot, Tag, VersionMeta, VersionRecord};
use crate::error::Result;

#[derive(Clone)]
struct StoredTag {
    id: i64,
    name: String,
    version_id: i64,
    created_by: String,
    created_at: i64,
}

#[derive(Clone)]
struct StoredSnapshot {
    id: i64,
    name: String,
    state: Vec<u8>,
    created_by: String,
    created_at: i64,
}

/// Version log held entirely in memory. Data is lost on drop.
#[derive(Default)]
pub struct MemoryLog {
    records: RwLock<HashMap<String, Vec<VersionRecord>>>,
    tags: RwLock<HashMap<String, Vec<StoredTag>>>,
    snapshots: RwLock<HashMap<String, Vec<StoredSnapshot>>>,
    next_id: AtomicI64,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    fn alloc_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl std::fmt::Debug for MemoryLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLog").finish_non_exhaustive()
    }
}

impl VersionLog for MemoryLog {
    fn append(&self, room: &str, payload: &[u8], is_snapshot: bool) -> Result<i64> {
        let id = self.alloc_id();
        let mut records = self.records.write().unwrap();
        records.entry(room.to_string()).or_default().push(VersionRecord {
            id,
            room: room.to_string(),
            payload: payload.to_vec(),
            is_snapshot,
            created_at: chrono::Utc::now().timestamp_millis(),
        });
        Ok(id)
    }

    fn get(&self, room: &str, id: i64) -> Result<Option<VersionRecord>> {
        let records = self.records.read().unwrap();
        Ok(records
            .get(room)
            .and_then(|list| list.iter().find(|r| r.id == id))
            .cloned())
    }

    fn latest(&self, room: &str) -> Result<Option<VersionRecord>> {
        let records = self.records.read().unwrap();
        Ok(records.get(room).and_then(|list| list.last()).cloned())
    }

    fn latest_version_id(&self, room: &str) -> Result<Option<i64>> {
        let records = self.records.read().unwrap();
        Ok(records.get(room).and_then(|list| list.last()).map(|r| r.id))
    }

    fn updates_between(&self, room: &str, after_id: i64, up_to_id: i64) -> Result<Vec<Vec<u8>>> {
        let records = self.records.read().unwrap();
        Ok(records
            .get(room)
            .map(|list| {
                list.iter()
                    .filter(|r| !r.is_snapshot && r.id > after_id && r.id <= up_to_id)
                    .map(|r| r.payload.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn newest_snapshot_at_or_before(&self, room: &str, id: i64) -> Result<Option<VersionRecord>> {
        let records = self.records.read().unwrap();
        Ok(records
            .get(room)
            .and_then(|list| list.iter().rev().find(|r| r.is_snapshot && r.id <= id))
            .cloned())
    }

    fn count_edits(&self, room: &str) -> Result<i64> {
        let records = self.records.read().unwrap();
        Ok(records
            .get(room)
            .map(|list| list.iter().filter(|r| !r.is_snapshot).count() as i64)
            .unwrap_or(0))
    }

    fn overwrite_payload(&self, room: &str, id: i64, payload: &[u8]) -> Result<()> {
        let mut records = self.records.write().unwrap();
        if let Some(list) = records.get_mut(room)
            && let Some(record) = list.iter_mut().find(|r| r.id == id)
        {
            record.payload = payload.to_vec();
        }
        Ok(())
    }

    fn list_versions(&self, room: &str, limit: i64) -> Result<Vec<VersionMeta>> {
        let records = self.records.read().unwrap();
        Ok(records
            .get(room)
            .map(|list| {
                list.iter()
                    .rev()
                    .take(limit as usize)
                    .map(|r| VersionMeta {
                        id: r.id,
                        created_at: r.created_at,
                        size: r.payload.len() as i64,
                        is_snapshot: r.is_snapshot,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn upsert_tag(&self, room: &str, name: &str, version_id: i64, created_by: &str) -> Result<i64> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut tags = self.tags.write().unwrap();
        let list = tags.entry(room.to_string()).or_default();

        if let Some(tag) = list.iter_mut().find(|t| t.name == name) {
            tag.version_id = version_id;
            tag.created_by = created_by.to_string();
            tag.created_at = now;
            return Ok(tag.id);
        }

        let id = self.alloc_id();
        list.push(StoredTag {
            id,
            name: name.to_string(),
            version_id,
            created_by: created_by.to_string(),
            created_at: now,
        });
        Ok(id)
    }

    fn list_tags(&self, room: &str) -> Result<Vec<Tag>> {
        let tags = self.tags.read().unwrap();
        let mut listed: Vec<Tag> = tags
            .get(room)
            .map(|list| {
                list.iter()
                    .map(|t| Tag {
                        id: t.id,
                        room: room.to_string(),
                        name: t.name.clone(),
                        version_id: t.version_id,
                        created_by: t.created_by.clone(),
                        created_at: t.created_at,
                    })
                    .collect()
            })
            .unwrap_or_default();
        listed.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(listed)
    }

    fn delete_tag(&self, room: &str, tag_id: i64) -> Result<bool> {
        let mut tags = self.tags.write().unwrap();
        if let Some(list) = tags.get_mut(room) {
            let before = list.len();
            list.retain(|t| t.id != tag_id);
            return Ok(list.len() < before);
        }
        Ok(false)
    }

    fn insert_named_snapshot(
        &self,
        room: &str,
        name: &str,
        state: &[u8],
        created_by: &str,
    ) -> Result<i64> {
        let id = self.alloc_id();
        let mut snapshots = self.snapshots.write().unwrap();
        snapshots.entry(room.to_string()).or_default().push(StoredSnapshot {
            id,
            name: name.to_string(),
            state: state.to_vec(),
            created_by: created_by.to_string(),
            created_at: chrono::Utc::now().timestamp_millis(),
        });
        Ok(id)
    }

    fn list_named_snapshots(&self, room: &str) -> Result<Vec<NamedSnapshot>> {
        let snapshots = self.snapshots.read().unwrap();
        let mut listed: Vec<NamedSnapshot> = snapshots
            .get(room)
            .map(|list| {
                list.iter()
                    .map(|s| NamedSnapshot {
                        id: s.id,
                        room: room.to_string(),
                        name: s.name.clone(),
                        created_by: s.created_by.clone(),
                        created_at: s.created_at,
                    })
                    .collect()
            })
            .unwrap_or_default();
        listed.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(listed)
    }

    fn get_named_snapshot(&self, room: &str, id: i64) -> Result<Option<(String, Vec<u8>)>> {
        let snapshots = self.snapshots.read().unwrap();
        Ok(snapshots
            .get(room)
            .and_then(|list| list.iter().find(|s| s.id == id))
            .map(|s| (s.name.clone(), s.state.clone())))
    }
}
