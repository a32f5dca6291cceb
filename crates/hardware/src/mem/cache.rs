//! Non-blocking set-associative caches with MSHRs.
//!
//! Every level of the hierarchy (IL1, ITLB, DL1, DTLB, DL2, LLC) is one
//! `Cache`. A TLB is a cache whose "line" is a page table entry and whose
//! miss path walks the next data level. This module provides:
//! 1. **Arrays:** banked, set-associative lookup with LRU/NMRU/MRU/random
//!    replacement and per-line coherence data.
//! 2. **MSHRs:** in-flight misses with RPWB dispatch ordering (reads,
//!    prefetches, writebacks) toward the next level.
//! 3. **Completion:** hits and fills mature through a time-ordered pending
//!    heap, so each level's latency accrues on the fill path; finished work
//!    surfaces as typed actions the memory system routes (a core event, a
//!    fill to a downstream MSHR, or an upstream request).
//! 4. **Prefetch:** per-cache prefetcher list feeding a filtered FIFO,
//!    drained when MSHR occupancy is below the watermark.
//!
//! In-flight work is cancelled by action-id comparison at the consumer; the
//! cache itself never chases squashes.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

use crate::common::error::{SimResult, bad_opt};
use crate::common::{ActionId, Tick};
use crate::mem::coherence::CoherenceController;
use crate::mem::prefetch::{PrefetchFilter, Prefetcher};

/// Index of a cache in the memory system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheId(pub usize);

/// Cache command kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemCmd {
    /// Demand read (load, instruction fetch, page walk).
    Read,
    /// Store write (senior STQ drain).
    Write,
    /// Dirty-line writeback from a downstream level.
    Writeback,
    /// Prefetch read.
    Prefetch,
}

/// Who to notify when a request completes at a core-side cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FillTarget {
    /// A load's DL1 data access (LDQ slot).
    LoadData(usize),
    /// A load's DTLB translation (LDQ slot).
    LoadTranslation(usize),
    /// A byte-queue entry's IL1 fetch.
    ByteqFetch(usize),
    /// A byte-queue entry's ITLB translation.
    ByteqTranslation(usize),
    /// A senior store's DL1 write (STQ slot).
    StoreWrite(usize),
    /// A senior store's DTLB translation (STQ slot).
    StoreTranslation(usize),
}

impl FillTarget {
    /// True for instruction-side (byte queue) completions.
    pub const fn is_insn_side(self) -> bool {
        matches!(self, Self::ByteqFetch(_) | Self::ByteqTranslation(_))
    }
}

/// A completion delivered to a core.
#[derive(Clone, Copy, Debug)]
pub struct CacheEvent {
    /// Owning core.
    pub core: usize,
    /// What completed.
    pub target: FillTarget,
    /// Action id captured at enqueue; consumers drop stale events.
    pub action_id: ActionId,
    /// Physical address of the access.
    pub paddr: u64,
}

/// Completion routing for one request.
#[derive(Clone, Copy, Debug)]
pub enum Requester {
    /// Notify a core.
    Core {
        /// Owning core.
        core: usize,
        /// What completed.
        target: FillTarget,
        /// Cancellation tag.
        action_id: ActionId,
    },
    /// Fill a downstream cache's MSHR.
    Cache {
        /// Downstream cache.
        cache: CacheId,
        /// MSHR index awaiting this line.
        mshr: usize,
    },
    /// Nobody (prefetch, writeback).
    None,
}

/// One request entering a cache's input queue.
#[derive(Clone, Copy, Debug)]
pub struct CacheRequest {
    /// Command.
    pub cmd: MemCmd,
    /// Originating core (coherence accounting).
    pub core: usize,
    /// Accessing instruction PC (IP prefetcher; 0 when not applicable).
    pub pc: u64,
    /// Physical address.
    pub paddr: u64,
    /// Completion routing.
    pub requester: Requester,
}

/// Work a cache step hands back to the memory system for routing.
#[derive(Clone, Copy, Debug)]
pub enum CacheAction {
    /// Deliver a completion event to a core.
    Event(CacheEvent),
    /// Deliver a fill into a downstream cache's MSHR.
    FillDownstream {
        /// Downstream cache and MSHR index.
        dest: (CacheId, usize),
        /// Line address being filled.
        paddr: u64,
    },
    /// Send a request toward the next level (or the memory controller).
    Upstream {
        /// Command (Read/Prefetch/Writeback).
        cmd: MemCmd,
        /// Line address.
        paddr: u64,
        /// Originating core.
        core: usize,
        /// This cache's MSHR awaiting the fill (None for writebacks).
        mshr: Option<usize>,
    },
}

/// Replacement policies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplPolicy {
    /// Least recently used.
    Lru,
    /// Random non-MRU way.
    Nmru,
    /// Most recently used.
    Mru,
    /// Uniform random.
    Random,
}

/// Write-hit policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WritePolicy {
    /// Dirty lines written back on eviction.
    WriteBack,
    /// Every write forwarded upstream.
    WriteThrough,
}

#[derive(Clone, Copy, Debug, Default)]
struct Line {
    tag: u64,
    valid: bool,
    dirty: bool,
    repl: u64,
    coh: u8,
}

#[derive(Clone, Copy, Debug)]
struct Mshr {
    valid: bool,
    paddr: u64,
    cmd: MemCmd,
    requester: Requester,
    core: usize,
    sent: bool,
    when_enqueued: Tick,
    when_started: Tick,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Pending {
    when: Tick,
    order: u64,
    paddr: u64,
    requester_slot: usize,
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.when, self.order).cmp(&(other.when, other.order))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Per-cache statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct CacheStats {
    /// Array lookups.
    pub lookups: u64,
    /// Array hits.
    pub hits: u64,
    /// Array misses.
    pub misses: u64,
    /// Lines filled.
    pub fills: u64,
    /// Dirty evictions written back.
    pub writebacks: u64,
    /// Prefetches issued into the array pipeline.
    pub prefetches: u64,
    /// Cycles a request stalled for a free MSHR.
    pub mshr_full: u64,
}

/// One cache (or TLB) level.
pub struct Cache {
    /// Configured name (`DL1`, `ITLB`, ...).
    pub name: String,
    sets: usize,
    assoc: usize,
    /// Line size in bytes (PTE size for TLBs).
    pub linesize: u64,
    banks: usize,
    /// Bytes a bank can deliver per access.
    pub bank_width: u64,
    /// Hit latency in cycles.
    pub latency: u64,
    repl_policy: ReplPolicy,
    write_policy: WritePolicy,
    write_alloc: bool,
    write_combining: bool,
    lines: Vec<Line>,
    mshrs: Vec<Mshr>,
    wbb: VecDeque<u64>,
    wbb_cap: usize,
    inq: VecDeque<CacheRequest>,
    inq_cap: usize,
    bank_free: Vec<Tick>,
    pending: BinaryHeap<Reverse<Pending>>,
    pending_reqs: Vec<Option<Requester>>,
    pending_free: Vec<usize>,
    pending_order: u64,
    lfsr: u32,
    prefetchers: Vec<Prefetcher>,
    pf_filter: PrefetchFilter,
    pf_fifo: VecDeque<u64>,
    pf_fifo_cap: usize,
    /// Free-MSHR count required before prefetches may issue.
    pf_watermark: usize,
    /// Next hierarchy level (None at the LLC: misses go to the MC).
    pub next_level: Option<CacheId>,
    /// Bus toward the next level (None = core-internal, never contended).
    pub next_bus: Option<crate::mem::bus::BusId>,
    /// Coherence controller.
    pub coherence: CoherenceController,
    /// Statistics.
    pub stats: CacheStats,
}

impl Cache {
    /// Parses a cache option string:
    /// `name:sets:assoc:linesize:banks:bankwidth:latency:repl:alloc:write:mshrs:wc[:wbb[:coh]]`
    /// e.g. `DL1:64:8:64:8:64:2:L:W:B:8:C`.
    pub fn parse(opt: &str, prefetchers: &[String]) -> SimResult<Self> {
        const SHAPE: &str =
            "name:sets:assoc:linesize:banks:bankwidth:latency:repl:alloc:write:mshrs:wc[:wbb[:coh]]";
        let fields: Vec<&str> = opt.split(':').collect();
        if fields.len() < 12 || fields.len() > 14 {
            return Err(bad_opt("cache", opt, SHAPE));
        }
        let num = |s: &str| -> SimResult<u64> {
            s.parse().map_err(|_| bad_opt("cache", opt, SHAPE))
        };
        let sets = num(fields[1])? as usize;
        let assoc = num(fields[2])? as usize;
        let linesize = num(fields[3])?;
        let banks = num(fields[4])? as usize;
        let bank_width = num(fields[5])?;
        let latency = num(fields[6])?;
        if sets == 0 || !sets.is_power_of_two() || assoc == 0 {
            return Err(bad_opt("cache", opt, "power-of-two sets, nonzero assoc"));
        }
        if linesize == 0 || !linesize.is_power_of_two() || banks == 0 {
            return Err(bad_opt("cache", opt, "power-of-two linesize, nonzero banks"));
        }
        let repl_policy = match fields[7] {
            "L" => ReplPolicy::Lru,
            "N" => ReplPolicy::Nmru,
            "M" => ReplPolicy::Mru,
            "R" => ReplPolicy::Random,
            _ => return Err(bad_opt("cache", opt, "repl in {L,N,M,R}")),
        };
        let write_alloc = match fields[8] {
            "W" => true,
            "N" => false,
            _ => return Err(bad_opt("cache", opt, "alloc in {W,N}")),
        };
        let write_policy = match fields[9] {
            "B" => WritePolicy::WriteBack,
            "T" => WritePolicy::WriteThrough,
            _ => return Err(bad_opt("cache", opt, "write in {B,T}")),
        };
        let num_mshrs = num(fields[10])? as usize;
        if num_mshrs == 0 {
            return Err(bad_opt("cache", opt, "nonzero MSHRs"));
        }
        let write_combining = match fields[11] {
            "C" => true,
            "N" => false,
            _ => return Err(bad_opt("cache", opt, "wc in {C,N}")),
        };
        let wbb_cap = if fields.len() > 12 {
            num(fields[12])? as usize
        } else {
            num_mshrs
        };
        let coherence = if fields.len() > 13 {
            CoherenceController::parse(fields[13])?
        } else {
            CoherenceController::None
        };
        let prefetchers = prefetchers
            .iter()
            .map(|p| Prefetcher::parse(p))
            .collect::<SimResult<Vec<_>>>()?;

        Ok(Self {
            name: fields[0].to_string(),
            sets,
            assoc,
            linesize,
            banks,
            bank_width,
            latency,
            repl_policy,
            write_policy,
            write_alloc,
            write_combining,
            lines: vec![Line::default(); sets * assoc],
            mshrs: vec![
                Mshr {
                    valid: false,
                    paddr: 0,
                    cmd: MemCmd::Read,
                    requester: Requester::None,
                    core: 0,
                    sent: false,
                    when_enqueued: 0,
                    when_started: 0,
                };
                num_mshrs
            ],
            wbb: VecDeque::new(),
            wbb_cap: wbb_cap.max(1),
            inq: VecDeque::new(),
            inq_cap: (banks * 2).max(4),
            bank_free: vec![0; banks],
            pending: BinaryHeap::new(),
            pending_reqs: Vec::new(),
            pending_free: Vec::new(),
            pending_order: 0,
            lfsr: 0x1234_5677,
            prefetchers,
            pf_filter: PrefetchFilter::new(64),
            pf_fifo: VecDeque::new(),
            pf_fifo_cap: 8,
            pf_watermark: (num_mshrs / 2).max(1),
            next_level: None,
            next_bus: None,
            coherence: CoherenceController::None,
            stats: CacheStats::default(),
        }
        .with_coherence(coherence))
    }

    /// Parses a TLB option string: `name:sets:assoc:banks:latency:repl:mshrs`,
    /// e.g. `DTLB:64:4:1:2:L:4`. A TLB line is one 8-byte PTE.
    pub fn parse_tlb(opt: &str) -> SimResult<Self> {
        const SHAPE: &str = "name:sets:assoc:banks:latency:repl:mshrs";
        let fields: Vec<&str> = opt.split(':').collect();
        if fields.len() != 7 {
            return Err(bad_opt("TLB", opt, SHAPE));
        }
        let full = format!(
            "{}:{}:{}:8:{}:8:{}:{}:W:B:{}:N",
            fields[0], fields[1], fields[2], fields[3], fields[4], fields[5], fields[6]
        );
        Self::parse(&full, &[])
    }

    fn with_coherence(mut self, coherence: CoherenceController) -> Self {
        self.coherence = coherence;
        self
    }

    #[inline]
    fn line_addr(&self, paddr: u64) -> u64 {
        paddr & !(self.linesize - 1)
    }

    #[inline]
    fn set_of(&self, paddr: u64) -> usize {
        ((paddr / self.linesize) as usize) & (self.sets - 1)
    }

    #[inline]
    fn tag_of(&self, paddr: u64) -> u64 {
        paddr / (self.linesize * self.sets as u64)
    }

    #[inline]
    fn bank_of(&self, paddr: u64) -> usize {
        ((paddr / self.linesize) as usize) % self.banks
    }

    fn find_way(&self, paddr: u64) -> Option<usize> {
        let base = self.set_of(paddr) * self.assoc;
        let tag = self.tag_of(paddr);
        (0..self.assoc).find(|&way| {
            let line = &self.lines[base + way];
            line.valid && line.tag == tag
        })
    }

    /// True when the array currently holds `paddr`'s line.
    pub fn contains(&self, paddr: u64) -> bool {
        self.find_way(paddr).is_some()
    }

    fn next_rand(&mut self) -> u32 {
        // xorshift32
        let mut x = self.lfsr;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.lfsr = x;
        x
    }

    fn victim_way(&mut self, set: usize) -> usize {
        let base = set * self.assoc;
        for way in 0..self.assoc {
            if !self.lines[base + way].valid {
                return way;
            }
        }
        match self.repl_policy {
            ReplPolicy::Lru => (0..self.assoc)
                .min_by_key(|&way| self.lines[base + way].repl)
                .unwrap_or(0),
            ReplPolicy::Mru => (0..self.assoc)
                .max_by_key(|&way| self.lines[base + way].repl)
                .unwrap_or(0),
            ReplPolicy::Random => self.next_rand() as usize % self.assoc,
            ReplPolicy::Nmru => {
                let mru = (0..self.assoc)
                    .max_by_key(|&way| self.lines[base + way].repl)
                    .unwrap_or(0);
                if self.assoc == 1 {
                    0
                } else {
                    let mut way = self.next_rand() as usize % self.assoc;
                    if way == mru {
                        way = (way + 1) % self.assoc;
                    }
                    way
                }
            }
        }
    }

    /// Installs `paddr`'s line, evicting as needed. Dirty victims enter the
    /// writeback buffer (write-combined when configured).
    pub fn insert_line(&mut self, paddr: u64, dirty: bool, core: usize) {
        let set = self.set_of(paddr);
        let way = self.victim_way(set);
        let idx = set * self.assoc + way;
        let victim = self.lines[idx];
        if victim.valid && victim.dirty && self.write_policy == WritePolicy::WriteBack {
            let victim_addr =
                (victim.tag * self.sets as u64 + set as u64) * self.linesize;
            self.push_writeback(victim_addr);
        }
        self.pending_order += 1;
        self.lines[idx] = Line {
            tag: self.tag_of(paddr),
            valid: true,
            dirty,
            repl: self.pending_order,
            coh: (core as u8) + 1,
        };
        self.stats.fills += 1;
    }

    fn push_writeback(&mut self, line_addr: u64) {
        if self.write_combining && self.wbb.contains(&line_addr) {
            return;
        }
        self.wbb.push_back(line_addr);
        self.stats.writebacks += 1;
    }

    /// Pre-simulation warm install (no timing).
    pub fn warm_insert(&mut self, paddr: u64, dirty: bool) {
        if !self.contains(paddr) {
            self.insert_line(paddr, dirty, 0);
            self.stats.fills -= 1;
        }
    }

    fn free_mshr(&self) -> Option<usize> {
        self.mshrs.iter().position(|m| !m.valid)
    }

    /// Number of free MSHRs.
    pub fn free_mshr_count(&self) -> usize {
        self.mshrs.iter().filter(|m| !m.valid).count()
    }

    /// True when a new request for `paddr` can enter this cycle: its bank is
    /// free, the input queue has room, and an MSHR is available for a miss.
    pub fn enqueuable(&self, now: Tick, paddr: u64) -> bool {
        self.bank_free[self.bank_of(paddr)] <= now
            && self.inq.len() < self.inq_cap
            && self.free_mshr().is_some()
            && self.wbb.len() < self.wbb_cap
    }

    /// Pushes a request into the input queue. Callers must have checked
    /// [`Cache::enqueuable`] this cycle.
    pub fn enqueue(&mut self, req: CacheRequest) {
        debug_assert!(self.inq.len() < self.inq_cap);
        self.inq.push_back(req);
    }

    /// Input queue occupancy.
    pub fn inq_len(&self) -> usize {
        self.inq.len()
    }

    /// True when the input queue can accept another request (inter-level
    /// traffic is gated on this alone; core-side traffic uses
    /// [`Cache::enqueuable`]).
    pub fn has_inq_room(&self) -> bool {
        self.inq.len() < self.inq_cap
    }

    fn schedule_done(&mut self, when: Tick, paddr: u64, requester: Requester) {
        if matches!(requester, Requester::None) {
            return;
        }
        let slot = if let Some(slot) = self.pending_free.pop() {
            self.pending_reqs[slot] = Some(requester);
            slot
        } else {
            self.pending_reqs.push(Some(requester));
            self.pending_reqs.len() - 1
        };
        self.pending_order += 1;
        self.pending.push(Reverse(Pending {
            when,
            order: self.pending_order,
            paddr,
            requester_slot: slot,
        }));
    }

    /// Delivers a fill into MSHR `mshr_idx`: installs the line and schedules
    /// the completion after this cache's latency.
    pub fn fill_arrived(&mut self, now: Tick, mshr_idx: usize) {
        let mshr = self.mshrs[mshr_idx];
        if !mshr.valid {
            return;
        }
        let dirty = mshr.cmd == MemCmd::Write;
        self.insert_line(mshr.paddr, dirty, mshr.core);
        if dirty && self.write_policy == WritePolicy::WriteThrough {
            self.push_writeback(self.line_addr(mshr.paddr));
        }
        self.mshrs[mshr_idx].valid = false;
        self.schedule_done(now + self.latency, mshr.paddr, mshr.requester);
    }

    /// Advances this cache one cycle. Returned actions are routed by the
    /// memory system; `upstream_free` gates MSHR dispatch and writebacks.
    pub fn step(&mut self, now: Tick, upstream_free: bool) -> Vec<CacheAction> {
        let mut actions = Vec::new();

        // 1. mature pending completions
        while let Some(Reverse(p)) = self.pending.peek().copied() {
            if p.when > now {
                break;
            }
            let _ = self.pending.pop();
            let requester = self.pending_reqs[p.requester_slot].take();
            self.pending_free.push(p.requester_slot);
            match requester {
                Some(Requester::Core {
                    core,
                    target,
                    action_id,
                }) => actions.push(CacheAction::Event(CacheEvent {
                    core,
                    target,
                    action_id,
                    paddr: p.paddr,
                })),
                Some(Requester::Cache { cache, mshr }) => {
                    actions.push(CacheAction::FillDownstream {
                        dest: (cache, mshr),
                        paddr: p.paddr,
                    });
                }
                Some(Requester::None) | None => {}
            }
        }

        // 2. array lookups, bank-scheduled, head of queue first
        let mut processed = 0;
        while processed < self.banks {
            let Some(req) = self.inq.front().copied() else {
                break;
            };
            let bank = self.bank_of(req.paddr);
            if self.bank_free[bank] > now {
                break;
            }
            if self.free_mshr().is_none() {
                // a miss would need an MSHR: head-of-line block
                self.stats.mshr_full += 1;
                break;
            }
            let _ = self.lookup_one(now, req);
            self.bank_free[bank] = now + 1;
            let _ = self.inq.pop_front();
            processed += 1;
        }

        // 3. drain the prefetch FIFO under the MSHR watermark
        if self.free_mshr_count() >= self.pf_watermark
            && self.inq.len() < self.inq_cap
            && let Some(paddr) = self.pf_fifo.pop_front()
            && !self.contains(paddr)
        {
            self.stats.prefetches += 1;
            self.inq.push_back(CacheRequest {
                cmd: MemCmd::Prefetch,
                core: 0,
                pc: 0,
                paddr,
                requester: Requester::None,
            });
        }

        // 4. dispatch one unsent MSHR (or a writeback) upstream: RPWB order
        if upstream_free {
            let pick = self
                .mshrs
                .iter()
                .enumerate()
                .filter(|(_, m)| m.valid && !m.sent && m.cmd != MemCmd::Prefetch)
                .min_by_key(|(_, m)| m.when_enqueued)
                .map(|(i, _)| i)
                .or_else(|| {
                    self.mshrs
                        .iter()
                        .enumerate()
                        .filter(|(_, m)| m.valid && !m.sent)
                        .min_by_key(|(_, m)| m.when_enqueued)
                        .map(|(i, _)| i)
                });
            if let Some(idx) = pick {
                self.mshrs[idx].sent = true;
                self.mshrs[idx].when_started = now;
                let m = self.mshrs[idx];
                actions.push(CacheAction::Upstream {
                    cmd: if m.cmd == MemCmd::Prefetch {
                        MemCmd::Prefetch
                    } else {
                        MemCmd::Read
                    },
                    paddr: self.line_addr(m.paddr),
                    core: m.core,
                    mshr: Some(idx),
                });
            } else if let Some(line_addr) = self.wbb.pop_front() {
                actions.push(CacheAction::Upstream {
                    cmd: MemCmd::Writeback,
                    paddr: line_addr,
                    core: 0,
                    mshr: None,
                });
            }
        }

        actions
    }

    /// Processes one request at the array. Returns `None` when the request
    /// missed and no MSHR was free (caller retries next cycle).
    fn lookup_one(&mut self, now: Tick, req: CacheRequest) -> Option<()> {
        self.stats.lookups += 1;
        let hit_way = self.find_way(req.paddr);
        let hit = hit_way.is_some();

        // prefetcher observation on demand traffic
        if matches!(req.cmd, MemCmd::Read | MemCmd::Write) {
            let linesize = self.linesize;
            let mut candidates = Vec::new();
            for pf in &mut self.prefetchers {
                candidates.extend(pf.observe(req.pc, req.paddr, hit, linesize));
            }
            for cand in candidates {
                if self.pf_fifo.len() >= self.pf_fifo_cap {
                    break;
                }
                if self.pf_filter.admit(cand) {
                    self.pf_fifo.push_back(cand);
                }
            }
        }

        if let Some(way) = hit_way {
            self.stats.hits += 1;
            let set = self.set_of(req.paddr);
            let idx = set * self.assoc + way;
            self.pending_order += 1;
            self.lines[idx].repl = self.pending_order;
            let is_write = req.cmd == MemCmd::Write || req.cmd == MemCmd::Writeback;
            if is_write {
                self.lines[idx].dirty = self.write_policy == WritePolicy::WriteBack;
            }
            let mut coh = self.lines[idx].coh;
            let penalty = self.coherence.hit_penalty(&mut coh, req.core, is_write);
            self.lines[idx].coh = coh;
            if req.cmd == MemCmd::Write && self.write_policy == WritePolicy::WriteThrough {
                let line_addr = self.line_addr(req.paddr);
                self.push_writeback(line_addr);
            }
            if req.cmd != MemCmd::Writeback {
                self.schedule_done(now + self.latency + penalty, req.paddr, req.requester);
            }
            return Some(());
        }

        self.stats.misses += 1;
        match req.cmd {
            MemCmd::Writeback => {
                // victim fill from downstream: install directly, dirty
                self.insert_line(req.paddr, true, req.core);
                Some(())
            }
            MemCmd::Write if !self.write_alloc => {
                // no-allocate write miss: forward via the writeback buffer
                let line_addr = self.line_addr(req.paddr);
                self.push_writeback(line_addr);
                self.schedule_done(now + self.latency, req.paddr, req.requester);
                Some(())
            }
            MemCmd::Read | MemCmd::Write | MemCmd::Prefetch => {
                let idx = self.free_mshr()?;
                let coh_prev = 0;
                self.coherence.note_upstream(coh_prev, req.core);
                self.mshrs[idx] = Mshr {
                    valid: true,
                    paddr: self.line_addr(req.paddr),
                    cmd: req.cmd,
                    requester: req.requester,
                    core: req.core,
                    sent: false,
                    when_enqueued: now,
                    when_started: 0,
                };
                Some(())
            }
        }
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache({}:{}x{}x{})",
            self.name, self.sets, self.assoc, self.linesize
        )
    }
}
