//! Shared channels between adjacent memory hierarchy levels.
//!
//! A bus has an integer width in bytes. Using it for an n-byte transfer
//! marks it busy for ⌈n/width⌉ cycles (halved when double-pumped); a free
//! check gates upstream issue. `busy_until` is monotonically non-decreasing.

use crate::common::Tick;

/// Index of a bus in the memory system.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BusId(pub usize);

/// A point-to-point or shared bus between two hierarchy levels.
pub struct Bus {
    /// Name for statistics.
    pub name: String,
    /// Width in bytes per cycle.
    pub width: u64,
    /// Double-pumped: two transfers per cycle.
    pub ddr: bool,
    /// First cycle the bus is free again.
    pub busy_until: Tick,
    /// Total transfers.
    pub accesses: u64,
    /// Transfers on behalf of prefetches.
    pub prefetch_accesses: u64,
    /// Cycles spent busy (utilization numerator).
    pub busy_cycles: u64,
}

impl Bus {
    /// Creates an idle bus.
    pub fn new(name: &str, width: u64, ddr: bool) -> Self {
        Self {
            name: name.to_string(),
            width: width.max(1),
            ddr,
            busy_until: 0,
            accesses: 0,
            prefetch_accesses: 0,
            busy_cycles: 0,
        }
    }

    /// True when a new transfer may start at `now`.
    #[inline]
    pub fn free(&self, now: Tick) -> bool {
        now >= self.busy_until
    }

    /// Occupies the bus for an `n_bytes` transfer starting at `now`.
    pub fn use_bus(&mut self, now: Tick, n_bytes: u64, is_prefetch: bool) {
        let mut cycles = n_bytes.div_ceil(self.width).max(1);
        if self.ddr {
            cycles = cycles.div_ceil(2);
        }
        self.accesses += 1;
        if is_prefetch {
            self.prefetch_accesses += 1;
        }
        self.busy_cycles += cycles;
        self.busy_until = self.busy_until.max(now) + cycles;
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bus({}:{}B)", self.name, self.width)
    }
}
