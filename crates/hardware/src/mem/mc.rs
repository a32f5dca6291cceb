//! Memory controller and DRAM timing models.
//!
//! The controller owns the request queue between the front-side bus and the
//! DRAM banks; the DRAM model is a plug-in that prices an access at a given
//! physical address. Variants:
//! - MC `ideal` — zero latency, no queue: fills complete the cycle they
//!   arrive.
//! - MC `simple:latency:depth` — fixed controller latency plus a bounded
//!   FIFO; each request additionally pays the DRAM model's price.
//! - DRAM `const:latency` — constant access time.
//! - DRAM `page:tcas:tras:tpre` — open-page row buffer: a row hit pays CAS
//!   only, a row conflict pays precharge + RAS + CAS.

use std::collections::VecDeque;

use crate::common::Tick;
use crate::common::error::{SimResult, bad_opt};
use crate::mem::cache::CacheId;

/// DRAM access timing model.
pub enum DramModel {
    /// Constant latency.
    Const {
        /// Cycles per access.
        latency: u64,
    },
    /// Open-page row-buffer model.
    Page {
        /// Column access latency.
        t_cas: u64,
        /// Row activate latency.
        t_ras: u64,
        /// Precharge latency.
        t_pre: u64,
        /// Currently open row.
        last_row: Option<u64>,
        /// Row hits observed.
        row_hits: u64,
        /// Row conflicts observed.
        row_misses: u64,
    },
}

/// Row size assumed by the page model (2 KiB).
const ROW_MASK: u64 = !2047;

impl DramModel {
    /// Parses a DRAM option string.
    pub fn parse(opt: &str) -> SimResult<Self> {
        let fields: Vec<&str> = opt.split(':').collect();
        match fields.first().copied() {
            Some("const") => {
                if fields.len() != 2 {
                    return Err(bad_opt("dram", opt, "const:latency"));
                }
                let latency = fields[1]
                    .parse()
                    .map_err(|_| bad_opt("dram", opt, "numeric latency"))?;
                Ok(Self::Const { latency })
            }
            Some("page") => {
                if fields.len() != 4 {
                    return Err(bad_opt("dram", opt, "page:tcas:tras:tpre"));
                }
                let parse = |s: &str| {
                    s.parse::<u64>()
                        .map_err(|_| bad_opt("dram", opt, "numeric timing"))
                };
                Ok(Self::Page {
                    t_cas: parse(fields[1])?,
                    t_ras: parse(fields[2])?,
                    t_pre: parse(fields[3])?,
                    last_row: None,
                    row_hits: 0,
                    row_misses: 0,
                })
            }
            _ => Err(bad_opt("dram", opt, "const:latency or page:tcas:tras:tpre")),
        }
    }

    /// Access latency for `paddr`, updating row-buffer state.
    pub fn access_latency(&mut self, paddr: u64) -> u64 {
        match self {
            Self::Const { latency } => *latency,
            Self::Page {
                t_cas,
                t_ras,
                t_pre,
                last_row,
                row_hits,
                row_misses,
            } => {
                let row = paddr & ROW_MASK;
                match last_row {
                    Some(open) if *open == row => {
                        *row_hits += 1;
                        *t_cas
                    }
                    Some(_) => {
                        *row_misses += 1;
                        *last_row = Some(row);
                        *t_pre + *t_ras + *t_cas
                    }
                    None => {
                        *last_row = Some(row);
                        *t_ras + *t_cas
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for DramModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Const { latency } => write!(f, "DramModel(const:{latency})"),
            Self::Page {
                t_cas, t_ras, t_pre, ..
            } => write!(f, "DramModel(page:{t_cas}:{t_ras}:{t_pre})"),
        }
    }
}

/// One request queued at the memory controller.
#[derive(Clone, Copy, Debug)]
pub struct McRequest {
    /// Line-aligned physical address.
    pub paddr: u64,
    /// Cycle the DRAM access completes.
    pub ready_at: Tick,
    /// Cache and MSHR awaiting the fill (`None` for writebacks).
    pub dest: Option<(CacheId, usize)>,
    /// Prefetch-priority traffic.
    pub is_prefetch: bool,
}

/// A completed DRAM access to deliver back into the hierarchy.
#[derive(Clone, Copy, Debug)]
pub struct McFill {
    /// Line-aligned physical address.
    pub paddr: u64,
    /// Cache and MSHR awaiting the fill.
    pub dest: (CacheId, usize),
    /// Prefetch-priority traffic.
    pub is_prefetch: bool,
}

/// The memory controller.
pub enum Mc {
    /// Zero latency, no queue.
    Ideal {
        /// Total accesses.
        total_accesses: u64,
    },
    /// Fixed latency plus a bounded FIFO.
    Simple {
        /// Controller latency in cycles.
        latency: u64,
        /// Queue depth.
        depth: usize,
        /// Pending requests, FIFO order.
        queue: VecDeque<McRequest>,
        /// Total accesses.
        total_accesses: u64,
    },
}

impl Mc {
    /// Parses a memory controller option string.
    pub fn parse(opt: &str) -> SimResult<Self> {
        let fields: Vec<&str> = opt.split(':').collect();
        match fields.first().copied() {
            Some("ideal") => Ok(Self::Ideal { total_accesses: 0 }),
            Some("simple") => {
                if fields.len() != 3 {
                    return Err(bad_opt("MC", opt, "simple:latency:depth"));
                }
                let latency = fields[1]
                    .parse()
                    .map_err(|_| bad_opt("MC", opt, "numeric latency"))?;
                let depth: usize = fields[2]
                    .parse()
                    .map_err(|_| bad_opt("MC", opt, "numeric depth"))?;
                if depth == 0 {
                    return Err(bad_opt("MC", opt, "nonzero depth"));
                }
                Ok(Self::Simple {
                    latency,
                    depth,
                    queue: VecDeque::new(),
                    total_accesses: 0,
                })
            }
            _ => Err(bad_opt("MC", opt, "ideal or simple:latency:depth")),
        }
    }

    /// True when the controller can accept another request.
    pub fn enqueuable(&self) -> bool {
        match self {
            Self::Ideal { .. } => true,
            Self::Simple { queue, depth, .. } => queue.len() < *depth,
        }
    }

    /// Enqueues a request. For the ideal controller the fill is returned
    /// immediately; otherwise the request waits in the queue.
    pub fn enqueue(
        &mut self,
        now: Tick,
        paddr: u64,
        dest: Option<(CacheId, usize)>,
        is_prefetch: bool,
        dram: &mut DramModel,
    ) -> Option<McFill> {
        match self {
            Self::Ideal { total_accesses } => {
                *total_accesses += 1;
                dest.map(|dest| McFill {
                    paddr,
                    dest,
                    is_prefetch,
                })
            }
            Self::Simple {
                latency,
                depth,
                queue,
                total_accesses,
            } => {
                debug_assert!(queue.len() < *depth);
                *total_accesses += 1;
                let ready_at = now + *latency + dram.access_latency(paddr);
                queue.push_back(McRequest {
                    paddr,
                    ready_at,
                    dest,
                    is_prefetch,
                });
                None
            }
        }
    }

    /// Advances the controller one uncore cycle, returning completed fills.
    pub fn step(&mut self, now: Tick) -> Vec<McFill> {
        let mut done = Vec::new();
        if let Self::Simple { queue, .. } = self {
            while queue.front().is_some_and(|front| front.ready_at <= now) {
                if let Some(req) = queue.pop_front()
                    && let Some(dest) = req.dest
                {
                    done.push(McFill {
                        paddr: req.paddr,
                        dest,
                        is_prefetch: req.is_prefetch,
                    });
                }
            }
        }
        done
    }

    /// Queue occupancy (0 for the ideal controller).
    pub fn occupancy(&self) -> usize {
        match self {
            Self::Ideal { .. } => 0,
            Self::Simple { queue, .. } => queue.len(),
        }
    }
}

impl std::fmt::Debug for Mc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ideal { .. } => write!(f, "Mc(ideal)"),
            Self::Simple { latency, depth, .. } => write!(f, "Mc(simple:{latency}:{depth})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_model_row_hits_are_cheap() {
        let mut dram = DramModel::parse("page:14:14:14").unwrap();
        let cold = dram.access_latency(0x10000);
        assert_eq!(cold, 28); // ras + cas
        let hit = dram.access_latency(0x10040);
        assert_eq!(hit, 14); // cas only
        let conflict = dram.access_latency(0x20000);
        assert_eq!(conflict, 42); // pre + ras + cas
    }

    #[test]
    fn ideal_mc_fills_immediately() {
        let mut mc = Mc::parse("ideal").unwrap();
        let mut dram = DramModel::parse("const:90").unwrap();
        let fill = mc.enqueue(0, 0x1000, Some((CacheId(0), 3)), false, &mut dram);
        assert!(fill.is_some());
        assert_eq!(fill.map(|f| f.dest.1), Some(3));
    }

    #[test]
    fn simple_mc_respects_latency_and_depth() {
        let mut mc = Mc::parse("simple:10:2").unwrap();
        let mut dram = DramModel::parse("const:90").unwrap();
        assert!(mc.enqueue(0, 0x1000, Some((CacheId(0), 0)), false, &mut dram).is_none());
        assert!(mc.enqueue(0, 0x2000, Some((CacheId(0), 1)), false, &mut dram).is_none());
        assert!(!mc.enqueuable());

        assert!(mc.step(50).is_empty());
        let fills = mc.step(100); // 10 + 90
        assert_eq!(fills.len(), 2);
        assert!(mc.enqueuable());
    }
}
