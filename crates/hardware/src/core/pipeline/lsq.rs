//! Load queue and store queue.
//!
//! Both are rings with stable physical slots (cache fill events address
//! entries by slot + action id). The LDQ holds loads youngest at the tail;
//! each load records its *store color*, the STQ slot of the newest older
//! store at dispatch, which bounds its STQ search. The STQ keeps committed
//! stores around as *senior* entries until their DL1 write and DTLB
//! translation both drain; allocation stalls while seniors hold the ring
//! full (hard stall, never an overflow).

use crate::common::{ActionId, NEVER, Seq, Tick};
use crate::core::mop::UopId;

/// One load in the LDQ.
#[derive(Clone, Copy, Debug)]
pub struct LdqEntry {
    /// The load uop.
    pub uop: UopId,
    /// Oracle sequence of the owning Mop.
    pub seq: Seq,
    /// Effective virtual address.
    pub vaddr: u64,
    /// Effective physical address.
    pub paddr: u64,
    /// Access size in bytes.
    pub size: u8,
    /// Address generated (AGEN executed).
    pub addr_valid: bool,
    /// Received its value from the STQ.
    pub hit_in_stq: bool,
    /// A DL1/DTLB access is (or was) in flight for this issue.
    pub cache_issued: bool,
    /// STQ slot of the newest older store at dispatch.
    pub store_color: Option<usize>,
    /// Cycle the load issued (reset to `NEVER` on squash/replay).
    pub when_issued: Tick,
    /// Cancellation tag for in-flight cache responses.
    pub action_id: ActionId,
}

/// The load queue.
pub struct Ldq {
    entries: Vec<Option<LdqEntry>>,
    head: usize,
    num: usize,
}

impl Ldq {
    /// Creates an LDQ with `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: vec![None; capacity.max(1)],
            head: 0,
            num: 0,
        }
    }

    /// Capacity.
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Occupied entries.
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

    /// Pushes a load at the tail; returns its physical slot.
    pub fn push(&mut self, entry: LdqEntry) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        let slot = (self.head + self.num) % self.entries.len();
        self.entries[slot] = Some(entry);
        self.num += 1;
        Some(slot)
    }

    /// Entry access by physical slot.
    pub fn get(&self, slot: usize) -> Option<&LdqEntry> {
        self.entries[slot].as_ref()
    }

    /// Mutable entry access by physical slot.
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut LdqEntry> {
        self.entries[slot].as_mut()
    }

    /// The physical slot the next pushed load will occupy.
    pub fn next_slot(&self) -> usize {
        (self.head + self.num) % self.entries.len()
    }

    /// Pops the oldest load (commit).
    pub fn pop_head(&mut self) -> Option<LdqEntry> {
        if self.num == 0 {
            return None;
        }
        let entry = self.entries[self.head].take();
        self.head = (self.head + 1) % self.entries.len();
        self.num -= 1;
        entry
    }

    /// Pops the youngest load (rollback).
    pub fn pop_tail(&mut self) -> Option<LdqEntry> {
        if self.num == 0 {
            return None;
        }
        let slot = (self.head + self.num - 1) % self.entries.len();
        self.num -= 1;
        self.entries[slot].take()
    }

    /// The youngest entry's sequence, if any.
    pub fn tail_seq(&self) -> Option<Seq> {
        if self.num == 0 {
            return None;
        }
        let slot = (self.head + self.num - 1) % self.entries.len();
        self.entries[slot].as_ref().map(|e| e.seq)
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        for entry in &mut self.entries {
            *entry = None;
        }
        self.head = 0;
        self.num = 0;
    }

    /// Iterates physical slots oldest-first.
    pub fn slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.num).map(move |offset| (self.head + offset) % self.entries.len())
    }
}

impl std::fmt::Debug for Ldq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ldq({}/{})", self.num, self.entries.len())
    }
}

/// One store in the STQ. A store occupies one slot for both its sta and std
/// halves (invariant: both halves share the slot and the Mop).
#[derive(Clone, Copy, Debug)]
pub struct StqEntry {
    /// Store-address uop.
    pub sta: Option<UopId>,
    /// Store-data uop.
    pub std: Option<UopId>,
    /// Oracle sequence of the owning Mop.
    pub seq: Seq,
    /// Effective virtual address.
    pub vaddr: u64,
    /// Effective physical address.
    pub paddr: u64,
    /// Store size in bytes.
    pub size: u8,
    /// Address known (sta executed).
    pub addr_valid: bool,
    /// Value known (std executed).
    pub value_valid: bool,
    /// LDQ slot of the oldest load younger than this store at its dispatch.
    pub next_load: Option<usize>,
    /// Senior half: DTLB translation drained.
    pub translation_complete: bool,
    /// Senior half: DL1 write drained.
    pub write_complete: bool,
    /// Senior drain requests issued.
    pub drain_requested: bool,
    /// Cancellation tag (refreshed for the senior drain).
    pub action_id: ActionId,
}

/// The store queue: senior entries at the front, young entries behind.
///
/// Ring layout: `senior_head .. head` are senior (committed, draining),
/// `head .. tail` are young (uncommitted).
pub struct Stq {
    entries: Vec<Option<StqEntry>>,
    senior_head: usize,
    head: usize,
    num_senior: usize,
    num_young: usize,
}

impl Stq {
    /// Creates an STQ with `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: vec![None; capacity.max(1)],
            senior_head: 0,
            head: 0,
            num_senior: 0,
            num_young: 0,
        }
    }

    /// Capacity.
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Young (uncommitted) entries.
    pub fn len(&self) -> usize {
        self.num_young
    }

    /// Senior (committed, draining) entries.
    pub fn senior_len(&self) -> usize {
        self.num_senior
    }

    /// All occupied slots.
    pub fn total(&self) -> usize {
        self.num_young + self.num_senior
    }

    /// True when no young stores are present.
    pub fn is_empty(&self) -> bool {
        self.num_young == 0
    }

    /// True when the ring (young + senior) is full.
    pub fn is_full(&self) -> bool {
        self.total() == self.entries.len()
    }

    /// Slot of the newest young store (the store color for a load
    /// dispatching now).
    pub fn color(&self) -> Option<usize> {
        if self.num_young == 0 {
            // the newest senior store still forwards
            if self.num_senior == 0 {
                return None;
            }
            return Some((self.senior_head + self.num_senior - 1) % self.entries.len());
        }
        Some((self.head + self.num_young - 1) % self.entries.len())
    }

    /// Pushes a store at the tail; returns its physical slot.
    pub fn push(&mut self, entry: StqEntry) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        let slot = (self.head + self.num_young) % self.entries.len();
        self.entries[slot] = Some(entry);
        self.num_young += 1;
        Some(slot)
    }

    /// Entry access by physical slot.
    pub fn get(&self, slot: usize) -> Option<&StqEntry> {
        self.entries[slot].as_ref()
    }

    /// Mutable entry access by physical slot.
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut StqEntry> {
        self.entries[slot].as_mut()
    }

    /// Physical slot of the newest young store (alloc fills its std half).
    pub fn tail_slot(&self) -> Option<usize> {
        if self.num_young == 0 {
            return None;
        }
        Some((self.head + self.num_young - 1) % self.entries.len())
    }

    /// Commits the oldest young store: it becomes senior and awaits drain.
    pub fn commit_head_to_senior(&mut self) -> Option<usize> {
        if self.num_young == 0 {
            return None;
        }
        let slot = self.head;
        self.head = (self.head + 1) % self.entries.len();
        self.num_young -= 1;
        self.num_senior += 1;
        Some(slot)
    }

    /// Oldest senior slot, if any.
    pub fn senior_head_slot(&self) -> Option<usize> {
        if self.num_senior == 0 {
            return None;
        }
        Some(self.senior_head)
    }

    /// Iterates senior slots oldest-first.
    pub fn senior_slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.num_senior).map(move |offset| (self.senior_head + offset) % self.entries.len())
    }

    /// Releases drained senior entries from the front of the senior region.
    /// Returns how many were released.
    pub fn release_drained_seniors(&mut self) -> usize {
        let mut released = 0;
        while self.num_senior > 0 {
            let slot = self.senior_head;
            let done = self.entries[slot]
                .as_ref()
                .is_some_and(|e| e.write_complete && e.translation_complete);
            if !done {
                break;
            }
            self.entries[slot] = None;
            self.senior_head = (self.senior_head + 1) % self.entries.len();
            self.num_senior -= 1;
            released += 1;
        }
        released
    }

    /// Pops the youngest young store (rollback).
    pub fn pop_tail(&mut self) -> Option<StqEntry> {
        if self.num_young == 0 {
            return None;
        }
        let slot = (self.head + self.num_young - 1) % self.entries.len();
        self.num_young -= 1;
        self.entries[slot].take()
    }

    /// The youngest young entry's sequence, if any.
    pub fn tail_seq(&self) -> Option<Seq> {
        self.tail_slot()
            .and_then(|slot| self.entries[slot].as_ref())
            .map(|e| e.seq)
    }

    /// Drops young entries; seniors keep draining (they are committed).
    pub fn clear_young(&mut self) {
        while self.pop_tail().is_some() {}
    }

    /// Walks the stores older than `load_seq` starting at `color`,
    /// youngest-first. Yields physical slots of occupied entries.
    pub fn older_stores(&self, color: Option<usize>, load_seq: Seq) -> Vec<usize> {
        let Some(color) = color else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut slot = color;
        for _ in 0..self.total() {
            match self.entries[slot].as_ref() {
                Some(entry) if entry.seq < load_seq => out.push(slot),
                _ => break,
            }
            if slot == self.senior_head {
                break;
            }
            slot = (slot + self.entries.len() - 1) % self.entries.len();
        }
        out
    }
}

impl std::fmt::Debug for Stq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Stq(young {}, senior {}, cap {})",
            self.num_young,
            self.num_senior,
            self.entries.len()
        )
    }
}
