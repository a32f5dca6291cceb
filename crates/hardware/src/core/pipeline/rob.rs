//! Reorder buffer and reservation station.
//!
//! The ROB is a bounded FIFO of allocator slots, youngest at the tail. A
//! fused packet occupies a single slot (its head); all members share it.
//! Retirement pops the head in program order; misprediction rollback pops
//! the tail down to the branch. The RS is an unordered set with free-index
//! management; a uop holds its slot from allocation until writeback (or
//! squash).

use crate::common::Seq;
use crate::core::mop::{MopId, UopId};

/// One allocator slot in the ROB.
#[derive(Clone, Copy, Debug)]
pub struct RobEntry {
    /// The uop (fusion head for fused packets).
    pub uop: UopId,
    /// Oracle sequence of the owning Mop (rollback key; kept here so
    /// rollback never needs the arena).
    pub seq: Seq,
    /// The owning Mop.
    pub mop: MopId,
}

/// The reorder buffer.
pub struct Rob {
    entries: Vec<Option<RobEntry>>,
    head: usize,
    num: usize,
}

impl Rob {
    /// Creates a ROB with `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: vec![None; capacity.max(1)],
            head: 0,
            num: 0,
        }
    }

    /// Capacity in slots.
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Occupied slots.
    pub fn len(&self) -> usize {
        self.num
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.num == 0
    }

    /// True when full.
    pub fn is_full(&self) -> bool {
        self.num == self.entries.len()
    }

    /// Pushes a slot at the tail; returns its physical index.
    pub fn push(&mut self, entry: RobEntry) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        let slot = (self.head + self.num) % self.entries.len();
        self.entries[slot] = Some(entry);
        self.num += 1;
        Some(slot)
    }

    /// The oldest slot.
    pub fn head(&self) -> Option<RobEntry> {
        if self.num == 0 {
            None
        } else {
            self.entries[self.head]
        }
    }

    /// Pops the oldest slot (retirement).
    pub fn pop_head(&mut self) -> Option<RobEntry> {
        if self.num == 0 {
            return None;
        }
        let entry = self.entries[self.head].take();
        self.head = (self.head + 1) % self.entries.len();
        self.num -= 1;
        entry
    }

    /// The youngest slot.
    pub fn tail(&self) -> Option<RobEntry> {
        if self.num == 0 {
            return None;
        }
        let slot = (self.head + self.num - 1) % self.entries.len();
        self.entries[slot]
    }

    /// Pops the youngest slot (misprediction rollback).
    pub fn pop_tail(&mut self) -> Option<RobEntry> {
        if self.num == 0 {
            return None;
        }
        let slot = (self.head + self.num - 1) % self.entries.len();
        self.num -= 1;
        self.entries[slot].take()
    }

    /// Drops everything (complete flush).
    pub fn clear(&mut self) {
        for entry in &mut self.entries {
            *entry = None;
        }
        self.head = 0;
        self.num = 0;
    }

    /// Iterates occupied slots from head (oldest) to tail.
    pub fn iter(&self) -> impl Iterator<Item = RobEntry> + '_ {
        (0..self.num)
            .filter_map(move |offset| self.entries[(self.head + offset) % self.entries.len()])
    }
}

impl std::fmt::Debug for Rob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Rob({}/{})", self.num, self.entries.len())
    }
}

/// The reservation station: an unordered pool of scheduled uops.
pub struct Rs {
    entries: Vec<Option<UopId>>,
    free: Vec<usize>,
}

impl Rs {
    /// Creates an RS with `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: vec![None; capacity],
            free: (0..capacity).rev().collect(),
        }
    }

    /// Capacity in entries.
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Occupied entries.
    pub fn len(&self) -> usize {
        self.entries.len() - self.free.len()
    }

    /// True when no entry is free.
    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    /// Claims a free entry for `uop`.
    pub fn alloc(&mut self, uop: UopId) -> Option<usize> {
        let slot = self.free.pop()?;
        self.entries[slot] = Some(uop);
        Some(slot)
    }

    /// Releases an entry (writeback or squash). Idempotent.
    pub fn dealloc(&mut self, slot: usize) {
        if self.entries[slot].take().is_some() {
            self.free.push(slot);
        }
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        let capacity = self.entries.len();
        for entry in &mut self.entries {
            *entry = None;
        }
        self.free = (0..capacity).rev().collect();
    }
}

impl std::fmt::Debug for Rs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Rs({}/{})", self.len(), self.entries.len())
    }
}
