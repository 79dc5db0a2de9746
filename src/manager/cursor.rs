use std::sync::atomic::{AtomicU64, Ordering};

use crate::{SlotNum, Version};

/// The next slot a local proposal would go to.
///
/// The log's version bounds the cursor from below: slots up to the version
/// have been applied, so none of them can be free.
#[derive(Debug)]
pub(crate) struct Cursor {
    next: AtomicU64,
}

impl Cursor {
    pub fn new(start: SlotNum) -> Self {
        Self {
            next: AtomicU64::new(start.max(1)),
        }
    }

    pub fn peek(&self, log_version: Version) -> SlotNum {
        self.next.load(Ordering::Acquire).max(log_version + 1)
    }

    /// Takes the next free slot for a local proposal.
    pub fn claim(&self, log_version: Version) -> SlotNum {
        let floor = log_version + 1;

        let previous = self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |next| {
                Some(next.max(floor) + 1)
            })
            .unwrap_or_else(|next| next);

        previous.max(floor)
    }

    /// Moves the cursor past a decided slot.
    pub fn advance_past(&self, slot: SlotNum) {
        self.next.fetch_max(slot + 1, Ordering::AcqRel);
    }
}
