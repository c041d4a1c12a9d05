//! Pending-request store: message id → completion slot.

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::error::{DriverError, DriverResult};
use crate::response::Response;

/// Completion slot sender for one in-flight request.
pub(crate) type ReplySlot = oneshot::Sender<DriverResult<Response>>;

/// Holds the completion slot of every request in flight on one connection,
/// keyed by message id.
///
/// Owned and mutated exclusively by the connection's actor task; the
/// matching receivers are awaited by callers on any task. Capacity grows
/// with the in-flight count, nothing is pre-allocated.
pub(crate) struct MessageStore {
    pending: HashMap<u64, ReplySlot>,
}

impl MessageStore {
    pub(crate) fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Register the completion slot for `id`.
    pub(crate) fn add(&mut self, id: u64, slot: ReplySlot) {
        debug_assert!(!self.pending.contains_key(&id), "message id {id} reused");
        self.pending.insert(id, slot);
    }

    /// Complete the slot for `id` with the response parsed from `payload`.
    ///
    /// An unknown id is a protocol violation by the server; it is logged and
    /// discarded rather than tearing the connection down. A payload that
    /// does not parse as a response envelope is returned as an error for the
    /// connection to act on.
    pub(crate) fn resolve(&mut self, id: u64, payload: Vec<u8>) -> DriverResult<()> {
        let Some(slot) = self.pending.remove(&id) else {
            tracing::warn!(message_id = id, "response for unknown message id, discarding");
            return Ok(());
        };
        let response = Response::from_payload(payload)?;
        // A dropped receiver means the caller gave up (cancelled or timed
        // out); the response is discarded.
        let _ = slot.send(Ok(response));
        Ok(())
    }

    /// Fail every pending slot with a clone of `error` (connection loss).
    pub(crate) fn clear(&mut self, error: &DriverError) {
        for (id, slot) in self.pending.drain() {
            tracing::debug!(message_id = id, %error, "failing pending request");
            let _ = slot.send(Err(error.clone()));
        }
    }

    /// Number of requests in flight.
    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no requests are in flight.
    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
