//! Property tests over the core data structures.

use std::collections::HashMap;

use proptest::prelude::*;

use oosim_core::core::mop::{MopId, UopId};
use oosim_core::core::pipeline::rob::{Rob, RobEntry};
use oosim_core::core::units::bpred::twobit::TwoBit;
use oosim_core::mem::bus::Bus;
use oosim_core::oracle::SpecMem;

proptest! {
    /// The speculative memory journal behaves like a map with snapshots:
    /// rewinding to a sequence restores exactly the older writes.
    #[test]
    fn spec_mem_rewind_matches_model(
        writes in prop::collection::vec((1u64..20, 0u64..64, any::<u8>()), 0..60),
        cut in 0u64..20,
    ) {
        // apply writes in nondecreasing seq order, as the oracle does
        let mut writes = writes;
        writes.sort_by_key(|w| w.0);

        let mut spec = SpecMem::default();
        let mut model: HashMap<u64, u8> = HashMap::new();
        for &(seq, addr, byte) in &writes {
            spec.write(seq, addr, byte);
            if seq <= cut {
                model.insert(addr, byte);
            }
        }
        spec.rewind(cut);
        for addr in 0u64..64 {
            prop_assert_eq!(spec.read(addr), model.get(&addr).copied());
        }
    }

    /// Two-bit counters never leave their 0..=3 range and always move at
    /// most one step.
    #[test]
    fn twobit_saturates(dirs in prop::collection::vec(any::<bool>(), 0..100)) {
        let mut counter = TwoBit::default();
        for d in dirs {
            let before = counter.taken();
            counter = counter.update(d);
            // a single update can only flip the direction toward d
            if counter.taken() != before {
                prop_assert_eq!(counter.taken(), d);
            }
        }
    }

    /// The ROB behaves like a bounded deque under pushes, head pops, and
    /// tail rollbacks.
    #[test]
    fn rob_matches_deque_model(ops in prop::collection::vec(0u8..3, 0..200)) {
        let mut rob = Rob::new(16);
        let mut model: std::collections::VecDeque<u64> = std::collections::VecDeque::new();
        let mut next_seq = 1u64;
        for op in ops {
            match op {
                0 => {
                    let entry = RobEntry { uop: UopId(next_seq as u32), seq: next_seq, mop: MopId(0) };
                    let pushed = rob.push(entry).is_some();
                    if model.len() < 16 {
                        prop_assert!(pushed);
                        model.push_back(next_seq);
                        next_seq += 1;
                    } else {
                        prop_assert!(!pushed);
                    }
                }
                1 => {
                    let popped = rob.pop_head().map(|e| e.seq);
                    prop_assert_eq!(popped, model.pop_front());
                }
                _ => {
                    let popped = rob.pop_tail().map(|e| e.seq);
                    prop_assert_eq!(popped, model.pop_back());
                }
            }
            prop_assert_eq!(rob.len(), model.len());
        }
    }

    /// Bus busy time is monotonically non-decreasing no matter the traffic.
    #[test]
    fn bus_busy_until_monotone(
        uses in prop::collection::vec((0u64..100, 1u64..256, any::<bool>()), 0..50),
    ) {
        let mut bus = Bus::new("b", 8, false);
        let mut last = 0;
        let mut uses = uses;
        uses.sort_by_key(|u| u.0);
        for (now, bytes, pf) in uses {
            bus.use_bus(now, bytes, pf);
            prop_assert!(bus.busy_until >= last);
            last = bus.busy_until;
        }
    }
}
