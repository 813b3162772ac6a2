//! Batch queue state
//!
//! Pure bookkeeping for the shared item list: a dispatch cursor, a per-phase
//! completion counter, and a quit flag. Every method here runs with the
//! batch mutex held; the blocking protocol (two condition variables over one
//! mutex) lives in `batch`.
//!
//! Items leave the queue by value while a worker owns them — `next` vacates
//! the slot and `finish` refills it — which is what makes the at-most-one-
//! borrower invariant structural rather than conventional.

use std::path::PathBuf;

use crate::item::{Item, ItemState};

/// Which kind of work the current dispatch cycle hands out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Probe,
    Fetch,
}

pub(crate) struct QueueCore {
    slots: Vec<Option<Box<Item>>>,
    cursor: usize,
    returned: usize,
    borrowed: usize,
    phase: Phase,
    quit: bool,
}

impl QueueCore {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            cursor: 0,
            returned: 0,
            borrowed: 0,
            phase: Phase::Probe,
            quit: false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn is_quit(&self) -> bool {
        self.quit
    }

    pub(crate) fn set_quit(&mut self) {
        self.quit = true;
    }

    pub(crate) fn borrowed(&self) -> usize {
        self.borrowed
    }

    /// Append a new item in probe state; returns its index
    pub(crate) fn push(&mut self, name: PathBuf) -> usize {
        let index = self.slots.len();
        self.slots.push(Some(Box::new(Item::new(name, index))));
        index
    }

    /// Hand out the next undispatched item, if any
    pub(crate) fn next(&mut self) -> Option<Box<Item>> {
        if self.cursor >= self.slots.len() {
            return None;
        }
        let item = self.slots[self.cursor]
            .take()
            .expect("queue slot handed out twice in one phase");
        self.cursor += 1;
        self.borrowed += 1;
        Some(item)
    }

    /// True when the item about to be returned is the last of a fetch phase
    pub(crate) fn returning_last_fetch(&self) -> bool {
        self.phase == Phase::Fetch && self.returned + 1 == self.slots.len()
    }

    /// Take an item back from a worker
    pub(crate) fn finish(&mut self, mut item: Box<Item>) {
        if self.phase == Phase::Fetch {
            item.state = ItemState::Ready;
        }
        let index = item.index;
        debug_assert!(self.slots[index].is_none());
        self.slots[index] = Some(item);
        self.borrowed -= 1;
        self.returned += 1;
    }

    /// Every dispatched item of the current phase has come back
    pub(crate) fn all_returned(&self) -> bool {
        self.returned == self.slots.len()
    }

    /// Promote every item to the fetch phase and rewind the cursor
    pub(crate) fn begin_fetch(&mut self) {
        debug_assert!(self.all_returned());
        for slot in &mut self.slots {
            if let Some(item) = slot {
                if item.state == ItemState::Probe {
                    item.state = ItemState::Fetch;
                }
            }
        }
        self.phase = Phase::Fetch;
        self.cursor = 0;
        self.returned = 0;
    }

    /// Stop further handouts without touching borrowed items
    pub(crate) fn stop_handouts(&mut self) {
        self.cursor = self.slots.len();
    }

    /// Drop every item and rewind for the next batch
    pub(crate) fn reset(&mut self) {
        debug_assert_eq!(self.borrowed, 0);
        self.slots.clear();
        self.cursor = 0;
        self.returned = 0;
        self.phase = Phase::Probe;
    }

    /// Iterate the parked items; callers run between phases or after sync,
    /// when every slot is occupied
    pub(crate) fn items_mut(&mut self) -> impl Iterator<Item = &mut Item> {
        self.slots.iter_mut().filter_map(|slot| slot.as_deref_mut())
    }
}
