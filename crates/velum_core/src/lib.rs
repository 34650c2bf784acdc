//! Velum core - a version store for collaboratively edited CRDT documents.
//!
//! This crate persists the evolving state of documents represented as streams
//! of binary CRDT updates, and layers version history on top:
//!
//! - An append-only per-room **version log** ([`crdt::VersionLog`]) with
//!   SQLite and in-memory backends
//! - Automatic **snapshots** every N edits to bound replay cost
//! - **Reconstruction** of a document at any past version
//! - **Rollback** realized as "copy old state forward" (history is never
//!   rewritten)
//! - **Tags** (named pointers to versions) and user-facing **named snapshots**
//!
//! The CRDT engine itself is `yrs`; this crate only governs how its binary
//! outputs are stored, compacted, and replayed. See [`crdt::VersionStore`]
//! for the main entry point.

pub mod crdt;
pub mod error;

pub use error::{Result, VelumError};
