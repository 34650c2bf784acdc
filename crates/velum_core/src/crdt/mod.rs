//! CRDT version store: document wrapper, update log, snapshots, and history.

mod doc;
mod log;
mod memory_log;
mod sqlite_log;
mod store;
mod types;

pub use doc::{RoomDoc, UpdateSink};
pub use yrs::Subscription as UpdateSubscription;
pub use log::VersionLog;
pub use memory_log::MemoryLog;
pub use sqlite_log::SqliteLog;
pub use store::VersionStore;
pub use types::{NamedSnapshot, Tag, VersionMeta, VersionRecord};
