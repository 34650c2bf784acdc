//! Velum Sync Server
//!
//! A collaborative document server built on velum_core's CRDT version store.
//!
//! ## Features
//!
//! - **Real-time sync**: WebSocket rooms broadcasting binary CRDT updates
//! - **Version history**: Every flushed edit becomes a loadable version
//! - **Debounced persistence**: Edit bursts are coalesced before hitting disk
//! - **Rollback, tags, snapshots**: History operations over a REST API
//!
//! ## Environment Variables
//!
//! - `HOST`: Server host (default: 0.0.0.0)
//! - `PORT`: Server port (default: 3030)
//! - `DATABASE_PATH`: Path to SQLite database (default: ./velum.db)
//! - `DEBOUNCE_MS`: Quiet period before a flush (default: 2000)
//! - `MERGE_WINDOW_MS`: Window for folding a flush into the previous version (default: 5000)
//! - `ARCHIVE_DELAY_MS`: Grace period before an empty room is archived (default: 5000)
//! - `SNAPSHOT_INTERVAL`: A full-state snapshot is written after every N edits (default: 50)
//! - `CORS_ORIGINS`: Comma-separated list of allowed origins

pub mod config;
pub mod handlers;
pub mod room;

pub use config::Config;
