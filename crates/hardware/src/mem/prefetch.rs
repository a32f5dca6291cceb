//! Hardware prefetchers and the prefetch filter.
//!
//! Prefetchers observe demand accesses and produce candidate line addresses;
//! the filter suppresses lines that were recently prefetched, and the cache
//! schedules survivors into its prefetch FIFO subject to MSHR watermarks.
//!
//! Selected by option string:
//! - `nextline:degree` — sequential next-line prefetch.
//! - `IP:tablesize:degree` — instruction-pointer stride table: per-PC last
//!   address and stride with a two-bit confidence counter (2-level IP).

use crate::common::error::{SimResult, bad_opt};
use crate::core::units::bpred::twobit::TwoBit;

/// One prefetcher instance.
pub enum Prefetcher {
    /// Sequential next-line.
    NextLine {
        /// Lines ahead to prefetch.
        degree: u64,
    },
    /// Per-PC stride detection.
    IpStride {
        /// Pattern table.
        table: Vec<IpEntry>,
        /// Lines ahead to prefetch once confident.
        degree: u64,
    },
}

/// Per-PC stride table entry.
#[derive(Clone, Copy, Debug, Default)]
pub struct IpEntry {
    /// PC tag.
    pub tag: u64,
    /// Last address observed.
    pub last_addr: u64,
    /// Detected stride.
    pub stride: i64,
    /// Confidence.
    pub conf: TwoBit,
}

impl Prefetcher {
    /// Parses a prefetcher option string.
    pub fn parse(opt: &str) -> SimResult<Self> {
        let fields: Vec<&str> = opt.split(':').collect();
        match fields.first().copied() {
            Some("nextline") => {
                let degree: u64 = fields
                    .get(1)
                    .unwrap_or(&"1")
                    .parse()
                    .map_err(|_| bad_opt("prefetch", opt, "nextline:degree"))?;
                Ok(Self::NextLine {
                    degree: degree.max(1),
                })
            }
            Some("IP") => {
                if fields.len() < 2 {
                    return Err(bad_opt("prefetch", opt, "IP:tablesize:degree"));
                }
                let size: usize = fields[1]
                    .parse()
                    .map_err(|_| bad_opt("prefetch", opt, "numeric tablesize"))?;
                if size == 0 || !size.is_power_of_two() {
                    return Err(bad_opt("prefetch", opt, "power-of-two tablesize"));
                }
                let degree: u64 = fields
                    .get(2)
                    .unwrap_or(&"1")
                    .parse()
                    .map_err(|_| bad_opt("prefetch", opt, "numeric degree"))?;
                Ok(Self::IpStride {
                    table: vec![IpEntry::default(); size],
                    degree: degree.max(1),
                })
            }
            _ => Err(bad_opt("prefetch", opt, "nextline:degree or IP:tablesize:degree")),
        }
    }

    /// Observes a demand access; returns candidate prefetch line addresses.
    ///
    /// `pc` is the accessing instruction (zero on the fetch side), `paddr`
    /// the physical access address, `hit` the array outcome.
    pub fn observe(&mut self, pc: u64, paddr: u64, hit: bool, linesize: u64) -> Vec<u64> {
        let line = paddr & !(linesize - 1);
        match self {
            Self::NextLine { degree } => {
                if hit {
                    return Vec::new();
                }
                (1..=*degree).map(|i| line + i * linesize).collect()
            }
            Self::IpStride { table, degree } => {
                if pc == 0 {
                    return Vec::new();
                }
                let index = (pc >> 1) as usize & (table.len() - 1);
                let entry = &mut table[index];
                let mut out = Vec::new();
                if entry.tag == pc {
                    let stride = paddr as i64 - entry.last_addr as i64;
                    if stride == entry.stride && stride != 0 {
                        entry.conf = entry.conf.update(true);
                        if entry.conf.taken() {
                            let mut addr = paddr;
                            for _ in 0..*degree {
                                addr = addr.wrapping_add_signed(stride);
                                out.push(addr & !(linesize - 1));
                            }
                        }
                    } else {
                        entry.conf = entry.conf.update(false);
                        entry.stride = stride;
                    }
                    entry.last_addr = paddr;
                } else {
                    *entry = IpEntry {
                        tag: pc,
                        last_addr: paddr,
                        stride: 0,
                        conf: TwoBit::default(),
                    };
                }
                let _ = hit;
                out
            }
        }
    }
}

impl std::fmt::Debug for Prefetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NextLine { degree } => write!(f, "Prefetcher(nextline:{degree})"),
            Self::IpStride { table, degree } => {
                write!(f, "Prefetcher(IP:{}:{degree})", table.len())
            }
        }
    }
}

/// Suppresses prefetches for lines issued recently.
///
/// A small direct-mapped table of line addresses; a candidate already
/// present is dropped, otherwise it is recorded and passed through.
pub struct PrefetchFilter {
    table: Vec<u64>,
}

impl PrefetchFilter {
    /// Creates a filter with `size` slots (rounded up to a power of two).
    pub fn new(size: usize) -> Self {
        Self {
            table: vec![0; size.next_power_of_two().max(16)],
        }
    }

    /// Returns true when the candidate should be issued, recording it.
    pub fn admit(&mut self, line_addr: u64) -> bool {
        let index = (line_addr >> 6) as usize & (self.table.len() - 1);
        if self.table[index] == line_addr {
            return false;
        }
        self.table[index] = line_addr;
        true
    }
}

impl std::fmt::Debug for PrefetchFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrefetchFilter({})", self.table.len())
    }
}
