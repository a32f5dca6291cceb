//! The memory hierarchy: per-core caches and TLBs, the shared LLC, the
//! front-side bus, the memory controller, and DRAM.
//!
//! All caches live in one flat arena owned by `MemorySystem`; cores hold
//! [`CacheId`]s. A cache step returns typed actions (completion events,
//! downstream fills, upstream requests) that the system routes here, so no
//! structure ever holds a reference into another. Per-core caches advance on
//! core cycles; the LLC, FSB, MC, and DRAM advance on uncore cycles at the
//! configured clock ratio. Everything runs on one thread, which serializes
//! shared-structure access by construction.

/// Buses between hierarchy levels.
pub mod bus;
/// Set-associative caches with MSHRs.
pub mod cache;
/// Coherence controllers.
pub mod coherence;
/// Memory controller and DRAM models.
pub mod mc;
/// Prefetchers and the prefetch filter.
pub mod prefetch;
/// Deterministic virtual-to-physical translation.
pub mod translate;

use crate::common::Tick;
use crate::common::error::SimResult;
use crate::config::Config;
use crate::mem::bus::{Bus, BusId};
use crate::mem::cache::{Cache, CacheAction, CacheEvent, CacheId, CacheRequest, Requester};
use crate::mem::mc::{DramModel, Mc};

/// The cache ids belonging to one core.
#[derive(Clone, Copy, Debug)]
pub struct CoreCaches {
    /// L1 instruction cache.
    pub il1: CacheId,
    /// Instruction TLB.
    pub itlb: CacheId,
    /// L1 data cache.
    pub dl1: CacheId,
    /// Data TLB.
    pub dtlb: CacheId,
    /// Optional private L2.
    pub dl2: Option<CacheId>,
}

/// The full memory system shared by all cores.
pub struct MemorySystem {
    caches: Vec<Cache>,
    buses: Vec<Bus>,
    /// Front-side bus between the LLC and the memory controller.
    pub fsb: BusId,
    /// The shared last-level cache.
    pub llc: CacheId,
    /// Memory controller.
    pub mc: Mc,
    /// DRAM timing model.
    pub dram: DramModel,
    core_caches: Vec<CoreCaches>,
    events_insn: Vec<Vec<CacheEvent>>,
    events_data: Vec<Vec<CacheEvent>>,
    llc_linesize: u64,
}

impl MemorySystem {
    /// Builds the hierarchy for `num_cores` cores from the configuration.
    pub fn new(cfg: &Config) -> SimResult<Self> {
        let num_cores = cfg.general.num_cores.max(1);
        let mut caches = Vec::new();
        let mut buses = Vec::new();
        let mut core_caches = Vec::new();

        let llc_id = CacheId(0);
        caches.push(Cache::parse(&cfg.uncore.llc, &cfg.uncore.llc_pf)?);
        let llc_linesize = caches[0].linesize;

        let fsb = BusId(buses.len());
        buses.push(Bus::new("FSB", cfg.uncore.fsb_width, cfg.uncore.fsb_ddr));

        for core in 0..num_cores {
            let il1 = CacheId(caches.len());
            caches.push(Cache::parse(&cfg.core.fetch.il1, &cfg.core.fetch.il1_pf)?);
            let itlb = CacheId(caches.len());
            caches.push(Cache::parse_tlb(&cfg.core.fetch.itlb)?);
            let dl1 = CacheId(caches.len());
            caches.push(Cache::parse(&cfg.core.exec.dl1, &cfg.core.exec.dl1_pf)?);
            let dtlb = CacheId(caches.len());
            caches.push(Cache::parse_tlb(&cfg.core.exec.dtlb)?);
            let dl2 = match &cfg.core.exec.dl2 {
                Some(opt) => {
                    let id = CacheId(caches.len());
                    caches.push(Cache::parse(opt, &cfg.core.exec.dl2_pf)?);
                    Some(id)
                }
                None => None,
            };

            // one bus from the L1s to the next private level, and one from
            // the last private level out to the LLC
            let l2_bus = BusId(buses.len());
            buses.push(Bus::new(&format!("core{core}.L2_bus"), 32, false));
            let llc_bus = BusId(buses.len());
            buses.push(Bus::new(&format!("core{core}.LLC_bus"), 32, false));

            let l1_next = dl2.unwrap_or(llc_id);
            let l1_bus = if dl2.is_some() { l2_bus } else { llc_bus };
            caches[il1.0].next_level = Some(l1_next);
            caches[il1.0].next_bus = Some(l1_bus);
            caches[dl1.0].next_level = Some(l1_next);
            caches[dl1.0].next_bus = Some(l1_bus);
            if let Some(dl2_id) = dl2 {
                caches[dl2_id.0].next_level = Some(llc_id);
                caches[dl2_id.0].next_bus = Some(llc_bus);
            }
            // TLB misses walk the page table through the data cache
            caches[itlb.0].next_level = Some(dl1);
            caches[dtlb.0].next_level = Some(dl1);

            core_caches.push(CoreCaches {
                il1,
                itlb,
                dl1,
                dtlb,
                dl2,
            });
        }

        Ok(Self {
            caches,
            buses,
            fsb,
            llc: llc_id,
            mc: Mc::parse(&cfg.uncore.mc)?,
            dram: DramModel::parse(&cfg.uncore.dram)?,
            core_caches,
            events_insn: vec![Vec::new(); num_cores],
            events_data: vec![Vec::new(); num_cores],
            llc_linesize,
        })
    }

    /// The cache ids of `core`.
    pub fn core_caches(&self, core: usize) -> CoreCaches {
        self.core_caches[core]
    }

    /// Every cache in the hierarchy, LLC first.
    pub fn all_caches(&self) -> &[Cache] {
        &self.caches
    }

    /// Bus access by id.
    pub fn bus(&self, id: BusId) -> &Bus {
        &self.buses[id.0]
    }

    /// Immutable access to a cache.
    pub fn cache(&self, id: CacheId) -> &Cache {
        &self.caches[id.0]
    }

    /// Mutable access to a cache.
    pub fn cache_mut(&mut self, id: CacheId) -> &mut Cache {
        &mut self.caches[id.0]
    }

    /// True when `id` can accept a new request for `paddr` this cycle.
    pub fn enqueuable(&self, id: CacheId, now: Tick, paddr: u64) -> bool {
        self.caches[id.0].enqueuable(now, paddr)
    }

    /// Enqueues a request at a cache.
    pub fn enqueue(&mut self, id: CacheId, req: CacheRequest) {
        self.caches[id.0].enqueue(req);
    }

    /// Warms the LLC with one pre-simulation access.
    pub fn warm_llc(&mut self, paddr: u64, is_write: bool) {
        let llc = self.llc;
        self.caches[llc.0].warm_insert(paddr, is_write);
    }

    /// Drains instruction-side completion events destined for `core`.
    pub fn take_insn_events(&mut self, core: usize) -> Vec<CacheEvent> {
        std::mem::take(&mut self.events_insn[core])
    }

    /// Drains data-side completion events destined for `core`.
    pub fn take_data_events(&mut self, core: usize) -> Vec<CacheEvent> {
        std::mem::take(&mut self.events_data[core])
    }

    /// Steps the instruction-side caches of `core` (IL1, ITLB).
    pub fn step_core_insn(&mut self, core: usize, now: Tick) {
        let cc = self.core_caches[core];
        self.step_cache(cc.il1, now);
        self.step_cache(cc.itlb, now);
    }

    /// Steps the data-side caches of `core` (DL1, DTLB, DL2).
    pub fn step_core_data(&mut self, core: usize, now: Tick) {
        let cc = self.core_caches[core];
        self.step_cache(cc.dl1, now);
        self.step_cache(cc.dtlb, now);
        if let Some(dl2) = cc.dl2 {
            self.step_cache(dl2, now);
        }
    }

    /// Steps the shared uncore (LLC, FSB, MC, DRAM) one uncore cycle.
    pub fn step_uncore(&mut self, now: Tick) {
        self.step_cache(self.llc, now);
        for fill in self.mc.step(now) {
            let linesize = self.llc_linesize;
            self.buses[self.fsb.0].use_bus(now, linesize, fill.is_prefetch);
            self.deliver_fill(fill.dest.0, fill.dest.1, now);
        }
    }

    fn upstream_ready(&self, id: CacheId, now: Tick) -> bool {
        let cache = &self.caches[id.0];
        match cache.next_level {
            Some(next) => {
                cache.next_bus.is_none_or(|b| self.buses[b.0].free(now))
                    && self.caches[next.0].has_inq_room()
            }
            None => self.buses[self.fsb.0].free(now) && self.mc.enqueuable(),
        }
    }

    fn step_cache(&mut self, id: CacheId, now: Tick) {
        let upstream_free = self.upstream_ready(id, now);
        let actions = self.caches[id.0].step(now, upstream_free);
        for action in actions {
            match action {
                CacheAction::Event(event) => {
                    if event.target.is_insn_side() {
                        self.events_insn[event.core].push(event);
                    } else {
                        self.events_data[event.core].push(event);
                    }
                }
                CacheAction::FillDownstream { dest, paddr } => {
                    // the fill rides the downstream cache's upstream bus
                    let down = &self.caches[dest.0.0];
                    let bytes = down.linesize;
                    if let Some(b) = down.next_bus {
                        self.buses[b.0].use_bus(now, bytes, false);
                    }
                    let _ = paddr;
                    self.deliver_fill(dest.0, dest.1, now);
                }
                CacheAction::Upstream {
                    cmd,
                    paddr,
                    core,
                    mshr,
                } => {
                    let bytes = self.caches[id.0].linesize;
                    match self.caches[id.0].next_level {
                        Some(next) => {
                            if let Some(b) = self.caches[id.0].next_bus {
                                self.buses[b.0].use_bus(
                                    now,
                                    bytes,
                                    cmd == cache::MemCmd::Prefetch,
                                );
                            }
                            let requester = match mshr {
                                Some(m) => Requester::Cache { cache: id, mshr: m },
                                None => Requester::None,
                            };
                            self.caches[next.0].enqueue(CacheRequest {
                                cmd,
                                core,
                                pc: 0,
                                paddr,
                                requester,
                            });
                        }
                        None => {
                            // LLC boundary: out over the FSB to the MC
                            self.buses[self.fsb.0].use_bus(
                                now,
                                bytes,
                                cmd == cache::MemCmd::Prefetch,
                            );
                            let dest = mshr.map(|m| (id, m));
                            if let Some(fill) = self.mc.enqueue(
                                now,
                                paddr,
                                dest,
                                cmd == cache::MemCmd::Prefetch,
                                &mut self.dram,
                            ) {
                                self.deliver_fill(fill.dest.0, fill.dest.1, now);
                            }
                        }
                    }
                }
            }
        }
    }

    fn deliver_fill(&mut self, cache: CacheId, mshr: usize, now: Tick) {
        self.caches[cache.0].fill_arrived(now, mshr);
    }
}

impl std::fmt::Debug for MemorySystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySystem")
            .field("caches", &self.caches.len())
            .field("cores", &self.core_caches.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::cache::{FillTarget, MemCmd};

    fn system() -> MemorySystem {
        MemorySystem::new(&Config::default()).unwrap()
    }

    #[test]
    fn builds_default_hierarchy() {
        let mem = system();
        let cc = mem.core_caches(0);
        assert!(cc.dl2.is_some());
        assert_eq!(mem.cache(cc.itlb).linesize, 8);
        assert_eq!(mem.cache(mem.llc).name, "LLC");
    }

    #[test]
    fn cold_load_miss_reaches_dram_and_returns() {
        let mut mem = system();
        let cc = mem.core_caches(0);
        let paddr = 0x0004_2000;
        assert!(mem.enqueuable(cc.dl1, 0, paddr));
        mem.enqueue(
            cc.dl1,
            CacheRequest {
                cmd: MemCmd::Read,
                core: 0,
                pc: 0x400000,
                paddr,
                requester: Requester::Core {
                    core: 0,
                    target: FillTarget::LoadData(1),
                    action_id: 1,
                },
            },
        );

        let mut got = None;
        for now in 0..2000 {
            mem.step_core_data(0, now);
            if now % 2 == 0 {
                mem.step_uncore(now);
            }
            let events = mem.take_data_events(0);
            if let Some(ev) = events.first() {
                got = Some((now, *ev));
                break;
            }
        }
        let (when, event) = got.expect("load fill never returned");
        assert!(matches!(event.target, FillTarget::LoadData(1)));
        // must cost at least the sum of the per-level latencies
        let floor = mem.cache(cc.dl1).latency
            + mem.cache(cc.dl2.unwrap()).latency
            + mem.cache(mem.llc).latency;
        assert!(when >= floor);
    }

    #[test]
    fn llc_warming_short_circuits_dram() {
        let mut mem = system();
        let paddr = 0x0009_0000;
        mem.warm_llc(paddr, false);
        assert!(mem.cache(mem.llc).contains(paddr));
    }
}
