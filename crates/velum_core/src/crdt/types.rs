//! Core types for the document version store.

use serde::{Deserialize, Serialize};

/// One persisted record in a room's version log.
///
/// Records are ordered by `id` within a room. Replaying all non-snapshot
/// records in ascending order against a fresh document reproduces the exact
/// document state; a snapshot record is self-contained and reproduces the
/// full state on its own.
#[derive(Debug, Clone)]
pub struct VersionRecord {
    /// Monotonically increasing ordinal (log rowid)
    pub id: i64,

    /// Room this record belongs to
    pub room: String,

    /// Binary CRDT update payload
    pub payload: Vec<u8>,

    /// Whether the payload encodes the full document state
    pub is_snapshot: bool,

    /// Unix timestamp when this record was created (milliseconds)
    pub created_at: i64,
}

/// Listing projection of a version record: metadata without the payload blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionMeta {
    pub id: i64,
    pub created_at: i64,
    /// Payload size in bytes
    pub size: i64,
    pub is_snapshot: bool,
}

/// A named pointer to a version. Unique per `(room, name)`; re-tagging the
/// same name moves it to the new version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub room: String,
    pub name: String,
    pub version_id: i64,
    pub created_by: String,
    pub created_at: i64,
}

/// Metadata for a user-created named snapshot.
///
/// Named snapshots are a user-facing naming scheme, distinct from the
/// automatic density-based snapshots in the version log. The state blob is
/// stored alongside but only fetched on restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedSnapshot {
    pub id: i64,
    pub room: String,
    pub name: String,
    pub created_by: String,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_meta_serializes() {
        let meta = VersionMeta {
            id: 7,
            created_at: 1_700_000_000_000,
            size: 42,
            is_snapshot: true,
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"is_snapshot\":true"));
        assert!(json.contains("\"size\":42"));
    }

    #[test]
    fn test_tag_round_trip() {
        let tag = Tag {
            id: 1,
            room: "r1".to_string(),
            name: "v1.0".to_string(),
            version_id: 12,
            created_by: "alice".to_string(),
            created_at: 0,
        };
        let json = serde_json::to_string(&tag).unwrap();
        let back: Tag = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "v1.0");
        assert_eq!(back.version_id, 12);
    }
}
