//! Per-upload write serialization.
//!
//! Each upload id that has a request in flight owns one slot: an async mutex
//! that admits one writer at a time, and a notifier that wakes chunks which
//! arrived ahead of their predecessor. Slots are created on demand and
//! dropped when the last handle goes away, so idle ids cost nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, Notify};

#[derive(Default)]
pub struct UploadSlot {
    pub write: AsyncMutex<()>,
    pub progressed: Notify,
}

#[derive(Default)]
pub struct UploadLocks {
    slots: Mutex<HashMap<String, Arc<UploadSlot>>>,
}

impl UploadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join (or open) the slot for `id`.
    pub fn acquire(&self, id: &str) -> SlotHandle<'_> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(UploadSlot::default()))
            .clone();
        SlotHandle {
            locks: self,
            id: id.to_string(),
            slot,
        }
    }

    /// Number of ids with a live slot.
    #[cfg(test)]
    pub fn active(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Membership in a slot; the slot is pruned when the last member drops.
pub struct SlotHandle<'a> {
    locks: &'a UploadLocks,
    id: String,
    slot: Arc<UploadSlot>,
}

impl SlotHandle<'_> {
    pub fn slot(&self) -> &UploadSlot {
        &self.slot
    }

    /// Wake every request parked on this id.
    pub fn notify_progress(&self) {
        self.slot.progressed.notify_waiters();
    }
}

impl Drop for SlotHandle<'_> {
    fn drop(&mut self) {
        let mut slots = self
            .locks
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one here.
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(&self.id);
        }
    }
}
