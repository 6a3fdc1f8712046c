//! Statistical memory hierarchy model.
//!
//! No addresses exist; each access rolls one uniform draw against a chain of
//! cumulative thresholds to pick the level that satisfies it. Thresholds are
//! built once from the configured miss rates:
//!
//! ```text
//! cdf_stb  = p_stb_hit
//! cdf_l1   = 1 + cdf_stb * p_l1_miss - p_l1_miss
//! cdf_l2   = 1 + cdf_l1  * p_l2_miss - p_l2_miss
//! cdf_l3   = 1 + cdf_l2  * p_l3_miss - p_l3_miss
//! ```
//!
//! so each threshold folds in the probability mass already claimed by the
//! levels above it. The instruction side chains the same way from the
//! instruction-cache miss rate, and the TLBs add a translation penalty on
//! top of whichever level hits.

use rand::Rng;

use crate::common::CycleCount;
use crate::config::{MemoryRates, MemoryTimings};

/// Cycles to forward a load from the store buffer.
pub const STORE_FORWARD_LATENCY: u64 = 3;

/// Level that satisfied a data access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataLevel {
    /// Store-to-load forwarding.
    StoreBuffer,
    /// L1 data cache.
    L1,
    /// L2 cache.
    L2,
    /// L3 cache.
    L3,
    /// Main memory.
    Memory,
}

/// Level that satisfied an instruction fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchLevel {
    /// Instruction cache; modeled as free.
    ICache,
    /// L2 cache.
    L2,
    /// L3 cache.
    L3,
    /// Main memory.
    Memory,
}

/// Precomputed thresholds plus hit counters.
#[derive(Debug)]
pub struct MemoryModel {
    timings: MemoryTimings,

    cdf_stb: f64,
    cdf_dl1: f64,
    cdf_dl2: f64,
    cdf_dl3: f64,
    cdf_dtlb1: f64,
    cdf_dtlb2: f64,

    cdf_ic: f64,
    cdf_il2: f64,
    cdf_il3: f64,
    cdf_itlb1: f64,
    cdf_itlb2: f64,

    stb_hits: u64,
    dl1_hits: u64,
    dl2_hits: u64,
    dl3_hits: u64,
    dmem_hits: u64,
    dtlb1_misses: u64,
    dtlb2_misses: u64,

    ic_hits: u64,
    il2_hits: u64,
    il3_hits: u64,
    imem_hits: u64,
    itlb1_misses: u64,
    itlb2_misses: u64,

    stores: u64,
}

fn chain(above: f64, miss: f64) -> f64 {
    1.0 + above * miss - miss
}

impl MemoryModel {
    /// Builds the threshold chains from rates and latencies.
    pub fn new(timings: MemoryTimings, rates: &MemoryRates) -> Self {
        let cdf_stb = rates.store_forward_rate;
        let cdf_dl1 = chain(cdf_stb, rates.dl1_miss_rate);
        let cdf_dl2 = chain(cdf_dl1, rates.l2_miss_rate);
        let cdf_dl3 = chain(cdf_dl2, rates.l3_miss_rate);
        let cdf_dtlb1 = 1.0 - rates.dtlb1_miss_rate;
        let cdf_dtlb2 = chain(cdf_dtlb1, rates.dtlb2_miss_rate);

        let cdf_ic = 1.0 - rates.icache_miss_rate;
        let cdf_il2 = chain(cdf_ic, rates.l2_miss_rate);
        let cdf_il3 = chain(cdf_il2, rates.l3_miss_rate);
        let cdf_itlb1 = 1.0 - rates.itlb1_miss_rate;
        let cdf_itlb2 = chain(cdf_itlb1, rates.itlb2_miss_rate);

        MemoryModel {
            timings,
            cdf_stb,
            cdf_dl1,
            cdf_dl2,
            cdf_dl3,
            cdf_dtlb1,
            cdf_dtlb2,
            cdf_ic,
            cdf_il2,
            cdf_il3,
            cdf_itlb1,
            cdf_itlb2,
            stb_hits: 0,
            dl1_hits: 0,
            dl2_hits: 0,
            dl3_hits: 0,
            dmem_hits: 0,
            dtlb1_misses: 0,
            dtlb2_misses: 0,
            ic_hits: 0,
            il2_hits: 0,
            il3_hits: 0,
            imem_hits: 0,
            itlb1_misses: 0,
            itlb2_misses: 0,
            stores: 0,
        }
    }

    /// Classifies a data-access draw against the threshold chain.
    pub(crate) fn classify_data(&self, p: f64) -> DataLevel {
        if p < self.cdf_stb {
            DataLevel::StoreBuffer
        } else if p < self.cdf_dl1 {
            DataLevel::L1
        } else if p < self.cdf_dl2 {
            DataLevel::L2
        } else if p < self.cdf_dl3 {
            DataLevel::L3
        } else {
            DataLevel::Memory
        }
    }

    /// Classifies an instruction-fetch draw.
    pub(crate) fn classify_fetch(&self, p: f64) -> FetchLevel {
        if p < self.cdf_ic {
            FetchLevel::ICache
        } else if p < self.cdf_il2 {
            FetchLevel::L2
        } else if p < self.cdf_il3 {
            FetchLevel::L3
        } else {
            FetchLevel::Memory
        }
    }

    fn data_tlb_penalty(&mut self, p: f64) -> u64 {
        if p < self.cdf_dtlb1 {
            0
        } else if p < self.cdf_dtlb2 {
            self.dtlb1_misses += 1;
            self.timings.tlb1_miss_latency
        } else {
            self.dtlb1_misses += 1;
            self.dtlb2_misses += 1;
            self.timings.tlb2_miss_latency
        }
    }

    fn fetch_tlb_penalty(&mut self, p: f64) -> u64 {
        if p < self.cdf_itlb1 {
            0
        } else if p < self.cdf_itlb2 {
            self.itlb1_misses += 1;
            self.timings.tlb1_miss_latency
        } else {
            self.itlb1_misses += 1;
            self.itlb2_misses += 1;
            self.timings.tlb2_miss_latency
        }
    }

    /// Serves a load issued at `cycle`; returns the cycle the data arrives.
    pub fn serve_load<R: Rng>(&mut self, cycle: CycleCount, rng: &mut R) -> CycleCount {
        let translation = self.data_tlb_penalty(rng.gen());
        let latency = match self.classify_data(rng.gen()) {
            DataLevel::StoreBuffer => {
                self.stb_hits += 1;
                STORE_FORWARD_LATENCY
            }
            DataLevel::L1 => {
                self.dl1_hits += 1;
                self.timings.l1_latency
            }
            DataLevel::L2 => {
                self.dl2_hits += 1;
                self.timings.l2_latency
            }
            DataLevel::L3 => {
                self.dl3_hits += 1;
                self.timings.l3_latency
            }
            DataLevel::Memory => {
                self.dmem_hits += 1;
                self.timings.memory_latency
            }
        };
        cycle + translation + latency
    }

    /// Serves a store issued at `cycle`. Stores complete into the store
    /// buffer, so only the occupancy of the access is modeled.
    pub fn serve_store<R: Rng>(&mut self, cycle: CycleCount, rng: &mut R) -> CycleCount {
        self.stores += 1;
        let translation = self.data_tlb_penalty(rng.gen());
        cycle + translation
    }

    /// Serves an instruction fetch issued at `cycle`; returns the cycle the
    /// fetch window may next be used.
    pub fn serve_ifetch<R: Rng>(&mut self, cycle: CycleCount, rng: &mut R) -> CycleCount {
        let translation = self.fetch_tlb_penalty(rng.gen());
        let latency = match self.classify_fetch(rng.gen()) {
            FetchLevel::ICache => {
                self.ic_hits += 1;
                0
            }
            FetchLevel::L2 => {
                self.il2_hits += 1;
                self.timings.l2_latency
            }
            FetchLevel::L3 => {
                self.il3_hits += 1;
                self.timings.l3_latency
            }
            FetchLevel::Memory => {
                self.imem_hits += 1;
                self.timings.memory_latency
            }
        };
        cycle + translation + latency
    }

    /// Data-side hit counts: (store-buffer, L1, L2, L3, memory).
    pub fn data_hits(&self) -> (u64, u64, u64, u64, u64) {
        (self.stb_hits, self.dl1_hits, self.dl2_hits, self.dl3_hits, self.dmem_hits)
    }

    /// Instruction-side hit counts: (I-cache, L2, L3, memory).
    pub fn fetch_hits(&self) -> (u64, u64, u64, u64) {
        (self.ic_hits, self.il2_hits, self.il3_hits, self.imem_hits)
    }

    /// TLB miss counts: (dtlb1, dtlb2, itlb1, itlb2).
    pub fn tlb_misses(&self) -> (u64, u64, u64, u64) {
        (self.dtlb1_misses, self.dtlb2_misses, self.itlb1_misses, self.itlb2_misses)
    }

    /// Stores served.
    pub fn stores(&self) -> u64 {
        self.stores
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemoryRates, MemoryTimings};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rates(stb: f64, l1_miss: f64) -> MemoryRates {
        MemoryRates {
            store_forward_rate: stb,
            dl1_miss_rate: l1_miss,
            ..MemoryRates::default()
        }
    }

    #[test]
    fn test_threshold_chain_folds_upper_levels() {
        let model = MemoryModel::new(MemoryTimings::default(), &rates(0.1, 0.1));
        // cdf_l1 = 1 + 0.1 * 0.1 - 0.1 = 0.91.
        assert!((model.cdf_dl1 - 0.91).abs() < 1e-12);
        assert_eq!(model.classify_data(0.05), DataLevel::StoreBuffer);
        assert_eq!(model.classify_data(0.5), DataLevel::L1);
        assert_eq!(model.classify_data(0.95), DataLevel::L2);
    }

    #[test]
    fn test_draw_just_past_l1_threshold_goes_to_l2() {
        let model = MemoryModel::new(MemoryTimings::default(), &rates(0.1, 0.1));
        assert_eq!(model.classify_data(0.909_999), DataLevel::L1);
        assert_eq!(model.classify_data(0.910_001), DataLevel::L2);
    }

    #[test]
    fn test_perfect_hierarchy_serves_at_l1_latency() {
        let rates = MemoryRates {
            store_forward_rate: 0.0,
            dl1_miss_rate: 0.0,
            dtlb1_miss_rate: 0.0,
            ..MemoryRates::default()
        };
        let mut model = MemoryModel::new(MemoryTimings::default(), &rates);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let arrival = model.serve_load(10, &mut rng);
            assert_eq!(arrival, 10 + MemoryTimings::default().l1_latency);
        }
        let (_, l1, l2, l3, mem) = model.data_hits();
        assert_eq!((l1, l2, l3, mem), (100, 0, 0, 0));
    }

    #[test]
    fn test_icache_hit_costs_nothing() {
        let rates = MemoryRates {
            icache_miss_rate: 0.0,
            itlb1_miss_rate: 0.0,
            ..MemoryRates::default()
        };
        let mut model = MemoryModel::new(MemoryTimings::default(), &rates);
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(model.serve_ifetch(42, &mut rng), 42);
    }

    #[test]
    fn test_certain_miss_reaches_memory() {
        let rates = MemoryRates {
            store_forward_rate: 0.0,
            dl1_miss_rate: 1.0,
            l2_miss_rate: 1.0,
            l3_miss_rate: 1.0,
            dtlb1_miss_rate: 0.0,
            ..MemoryRates::default()
        };
        let mut model = MemoryModel::new(MemoryTimings::default(), &rates);
        let mut rng = StdRng::seed_from_u64(7);
        let arrival = model.serve_load(0, &mut rng);
        assert_eq!(arrival, MemoryTimings::default().memory_latency);
    }
}
