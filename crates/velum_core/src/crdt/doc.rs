//! Room document CRDT wrapper.
//!
//! `RoomDoc` wraps a `yrs::Doc` holding a single Y.Text named `"content"`.
//! The version store treats update payloads as opaque binary blobs; this
//! module is the only place that touches the CRDT engine directly.

use std::sync::Arc;

use yrs::{
    Doc, GetString, ReadTxn, Text, Transact, Update, updates::decoder::Decode,
    updates::encoder::Encode,
};

use crate::error::{Result, VelumError};

/// Name of the Y.Text holding the document content.
const CONTENT_TEXT_NAME: &str = "content";

/// Receiver for document change notifications.
///
/// Implementations are invoked synchronously with the binary delta payload
/// whenever a local or remote edit mutates the document. The server's
/// debounce/merge buffer implements this to accumulate edit bursts.
pub trait UpdateSink: Send + Sync {
    fn on_update(&self, payload: &[u8]);
}

/// A CRDT document for a single room's content.
pub struct RoomDoc {
    doc: Doc,
    content: yrs::TextRef,
}

impl RoomDoc {
    /// Create a new empty room document.
    pub fn new() -> Self {
        let doc = Doc::new();
        let content = doc.get_or_insert_text(CONTENT_TEXT_NAME);
        Self { doc, content }
    }

    /// Create a document from a single update payload (e.g. a snapshot).
    pub fn from_update(payload: &[u8]) -> Result<Self> {
        let doc = Self::new();
        doc.apply_update(payload)?;
        Ok(doc)
    }

    /// Apply a binary update payload to this document.
    pub fn apply_update(&self, payload: &[u8]) -> Result<()> {
        let update = Update::decode_v1(payload)
            .map_err(|e| VelumError::Crdt(format!("Failed to decode update: {}", e)))?;

        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| VelumError::Crdt(format!("Failed to apply update: {}", e)))?;
        Ok(())
    }

    /// Encode the full document state as a single self-contained update.
    pub fn encode_state_as_update(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&Default::default())
    }

    /// Extract the plain-text content, used for content-dedup comparison.
    pub fn plain_text(&self) -> String {
        let txn = self.doc.transact();
        self.content.get_string(&txn)
    }

    /// Length of the content text in Y.js units.
    pub fn content_len(&self) -> u32 {
        let txn = self.doc.transact();
        self.content.len(&txn)
    }

    /// Insert text at a position, returning the incremental update payload
    /// describing just this change.
    pub fn insert_text(&self, index: u32, text: &str) -> Vec<u8> {
        let sv_before = {
            let txn = self.doc.transact();
            txn.state_vector()
        };

        {
            let mut txn = self.doc.transact_mut();
            self.content.insert(&mut txn, index, text);
        }

        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&sv_before)
    }

    /// Delete a range of text, returning the incremental update payload.
    pub fn delete_range(&self, index: u32, length: u32) -> Vec<u8> {
        let sv_before = {
            let txn = self.doc.transact();
            txn.state_vector()
        };

        {
            let mut txn = self.doc.transact_mut();
            self.content.remove_range(&mut txn, index, length);
        }

        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&sv_before)
    }

    /// Merge several update payloads into one without materializing a
    /// document (the engine's multi-update merge primitive).
    pub fn merge_updates(payloads: &[Vec<u8>]) -> Result<Vec<u8>> {
        let mut decoded = Vec::with_capacity(payloads.len());
        for payload in payloads {
            decoded.push(
                Update::decode_v1(payload)
                    .map_err(|e| VelumError::Crdt(format!("Failed to decode update: {}", e)))?,
            );
        }
        Ok(Update::merge_updates(decoded).encode_v1())
    }

    /// Register an update sink that receives every delta applied to this
    /// document, local or remote. The returned subscription must be kept
    /// alive for as long as notifications are wanted.
    pub fn attach_sink(&self, sink: Arc<dyn UpdateSink>) -> yrs::Subscription {
        self.doc
            .observe_update_v1(move |_txn, event| {
                sink.on_update(&event.update);
            })
            .expect("Failed to observe document updates")
    }
}

impl Default for RoomDoc {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RoomDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomDoc")
            .field("content_len", &self.content_len())
            .finish_non_exhaustive()
    }
}
