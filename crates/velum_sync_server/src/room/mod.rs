//! Room lifecycle: live documents, debounced persistence, and draining.

mod buffer;
mod connection;
mod registry;
mod room;

use std::time::Duration;

pub use buffer::MergeBuffer;
pub use connection::{ClientConnection, ConnectionEvent};
pub use registry::{RegistryStats, RoomRegistry};
pub use room::{ControlMessage, Room};

/// Timing knobs shared by the buffer and the registry.
#[derive(Debug, Clone, Copy)]
pub struct RoomTimings {
    /// Quiet period before buffered edits are flushed
    pub debounce: Duration,
    /// Window for folding a flush into the previous version
    pub merge_window: Duration,
    /// Grace period before an empty room is archived
    pub drain_delay: Duration,
}

impl Default for RoomTimings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(2000),
            merge_window: Duration::from_millis(5000),
            drain_delay: Duration::from_millis(5000),
        }
    }
}
