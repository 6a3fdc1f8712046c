//! Simulator configuration.
//!
//! It provides:
//! 1. **Structural parameters:** widths and capacities of the front end,
//!    issue queues, memory queue, and retirement buffer.
//! 2. **Timing parameters:** cache/TLB latencies and the branch penalty.
//! 3. **Probability parameters:** miss rates and branch-behavior rates used
//!    to build the memory-hierarchy CDFs.
//!
//! Every field carries a default modeling a three-wide out-of-order core, so
//! a partial JSON file overrides only what it names.

use serde::Deserialize;

use crate::common::error::SimError;
use crate::isa::class::UnitKind;

/// Issue-queue category accepted by a configured queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueKind {
    /// Accepts generic-int instructions.
    GenericInt,
    /// Accepts multiply-int instructions.
    MultiplyInt,
    /// Accepts special-int instructions.
    SpecialInt,
    /// Accepts float instructions.
    Float,
}

/// Cache and TLB latencies, in cycles.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryTimings {
    /// L1 data/instruction cache hit latency.
    pub l1_latency: u64,
    /// L2 hit latency.
    pub l2_latency: u64,
    /// L3 hit latency.
    pub l3_latency: u64,
    /// Main-memory latency.
    pub memory_latency: u64,
    /// Added cost of a first-level TLB miss that hits the second level.
    pub tlb1_miss_latency: u64,
    /// Added cost of a full TLB miss (page walk).
    pub tlb2_miss_latency: u64,
}

impl Default for MemoryTimings {
    fn default() -> Self {
        MemoryTimings {
            l1_latency: defaults::L1_LATENCY,
            l2_latency: defaults::L2_LATENCY,
            l3_latency: defaults::L3_LATENCY,
            memory_latency: defaults::MEMORY_LATENCY,
            tlb1_miss_latency: defaults::TLB1_MISS_LATENCY,
            tlb2_miss_latency: defaults::TLB2_MISS_LATENCY,
        }
    }
}

/// Hit/miss probabilities for the memory hierarchy, all in [0, 1].
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryRates {
    /// Probability a load is satisfied by store-to-load forwarding.
    pub store_forward_rate: f64,
    /// Data L1 miss rate.
    pub dl1_miss_rate: f64,
    /// Instruction cache miss rate.
    pub icache_miss_rate: f64,
    /// L2 miss rate (both sides).
    pub l2_miss_rate: f64,
    /// L3 miss rate (both sides).
    pub l3_miss_rate: f64,
    /// Data first-level TLB miss rate.
    pub dtlb1_miss_rate: f64,
    /// Data second-level TLB miss rate, given a first-level miss.
    pub dtlb2_miss_rate: f64,
    /// Instruction first-level TLB miss rate.
    pub itlb1_miss_rate: f64,
    /// Instruction second-level TLB miss rate, given a first-level miss.
    pub itlb2_miss_rate: f64,
}

impl Default for MemoryRates {
    fn default() -> Self {
        MemoryRates {
            store_forward_rate: defaults::STORE_FORWARD_RATE,
            dl1_miss_rate: defaults::DL1_MISS_RATE,
            icache_miss_rate: defaults::ICACHE_MISS_RATE,
            l2_miss_rate: defaults::L2_MISS_RATE,
            l3_miss_rate: defaults::L3_MISS_RATE,
            dtlb1_miss_rate: defaults::DTLB1_MISS_RATE,
            dtlb2_miss_rate: defaults::DTLB2_MISS_RATE,
            itlb1_miss_rate: defaults::ITLB1_MISS_RATE,
            itlb2_miss_rate: defaults::ITLB2_MISS_RATE,
        }
    }
}

/// Branch behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BranchConfig {
    /// Probability a conditional branch is mispredicted.
    pub mispredict_rate: f64,
    /// Probability a conditional branch is taken.
    pub taken_rate: f64,
    /// Cycles of fetch stall after a misprediction flush.
    pub miss_penalty: u64,
}

impl Default for BranchConfig {
    fn default() -> Self {
        BranchConfig {
            mispredict_rate: defaults::BRANCH_MISPREDICT_RATE,
            taken_rate: defaults::BRANCH_TAKEN_RATE,
            miss_penalty: defaults::BRANCH_MISS_PENALTY,
        }
    }
}

/// Front-end widths.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FrontEndConfig {
    /// Upper bound on instructions entering the decode group per cycle.
    pub instructions_per_cycle: usize,
    /// Instructions per fetch group when no size distribution is loaded.
    pub instructions_per_fetch: usize,
    /// Fetch buffer capacity, in instructions.
    pub fetch_buffer_size: usize,
    /// Macro-op slots filled per decode cycle; also the retirement width.
    pub decode_width: usize,
}

impl Default for FrontEndConfig {
    fn default() -> Self {
        FrontEndConfig {
            instructions_per_cycle: defaults::INSTRUCTIONS_PER_CYCLE,
            instructions_per_fetch: defaults::INSTRUCTIONS_PER_FETCH,
            fetch_buffer_size: defaults::FETCH_BUFFER_SIZE,
            decode_width: defaults::DECODE_WIDTH,
        }
    }
}

/// Memory access queue sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemQueueConfig {
    /// Number of load/store slots.
    pub slots: usize,
    /// Memory operations served per cycle.
    pub ops_per_cycle: u64,
}

impl Default for MemQueueConfig {
    fn default() -> Self {
        MemQueueConfig {
            slots: defaults::MEM_QUEUE_SLOTS,
            ops_per_cycle: defaults::MEM_OPS_PER_CYCLE,
        }
    }
}

/// Retirement buffer sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetireConfig {
    /// Total buffer entries; must be a multiple of `per_cycle`.
    pub slots: usize,
    /// Instructions retired per cycle; must equal the decode width.
    pub per_cycle: usize,
}

impl Default for RetireConfig {
    fn default() -> Self {
        RetireConfig {
            slots: defaults::RETIRE_BUFFER_SLOTS,
            per_cycle: defaults::RETIRE_PER_CYCLE,
        }
    }
}

/// One issue queue and the functional units attached to it.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Display name used in logs and the report.
    pub name: String,
    /// Category of instruction the queue accepts.
    pub kind: QueueKind,
    /// Macro-op slot capacity.
    #[serde(default = "defaults::queue_size")]
    pub size: usize,
    /// Instructions accepted per cycle.
    #[serde(default = "defaults::queue_accept_rate")]
    pub accept_rate: u32,
    /// Unit kinds attached to this queue, one unit instantiated per entry.
    pub units: Vec<UnitSpec>,
}

/// Unit kind spelled the way definition files spell them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitSpec {
    /// Address-generation unit.
    Agu,
    /// Plain integer ALU.
    Alu,
    /// Integer ALU with the multiplier.
    AluMul,
    /// Integer ALU for special operations.
    AluSpecial,
    /// Floating-point adder.
    Fadd,
    /// Floating-point multiplier.
    Fmul,
    /// Floating-point store unit.
    Fstore,
}

impl UnitSpec {
    /// Converts to the internal unit kind.
    pub fn kind(self) -> UnitKind {
        match self {
            UnitSpec::Agu => UnitKind::Agu,
            UnitSpec::Alu => UnitKind::Alu,
            UnitSpec::AluMul => UnitKind::AluMul,
            UnitSpec::AluSpecial => UnitKind::AluSpecial,
            UnitSpec::Fadd => UnitKind::FAdd,
            UnitSpec::Fmul => UnitKind::FMul,
            UnitSpec::Fstore => UnitKind::FStore,
        }
    }
}

/// Top-level simulator configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Cache/TLB latencies.
    pub timings: MemoryTimings,
    /// Hierarchy hit/miss rates.
    pub rates: MemoryRates,
    /// Branch behavior.
    pub branch: BranchConfig,
    /// Front-end widths.
    pub front_end: FrontEndConfig,
    /// Memory access queue.
    pub mem_queue: MemQueueConfig,
    /// Retirement buffer.
    pub retire: RetireConfig,
    /// Issue queues with their functional units.
    pub queues: Vec<QueueConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            timings: MemoryTimings::default(),
            rates: MemoryRates::default(),
            branch: BranchConfig::default(),
            front_end: FrontEndConfig::default(),
            mem_queue: MemQueueConfig::default(),
            retire: RetireConfig::default(),
            queues: defaults::queues(),
        }
    }
}

impl Config {
    /// Parses a configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self, SimError> {
        let config: Config =
            serde_json::from_str(text).map_err(|e| SimError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field consistency.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.retire.per_cycle != self.front_end.decode_width {
            return Err(SimError::Config(format!(
                "retire.per_cycle ({}) must equal front_end.decode_width ({})",
                self.retire.per_cycle, self.front_end.decode_width
            )));
        }
        if self.retire.slots == 0 || self.retire.slots % self.retire.per_cycle != 0 {
            return Err(SimError::Config(format!(
                "retire.slots ({}) must be a nonzero multiple of retire.per_cycle ({})",
                self.retire.slots, self.retire.per_cycle
            )));
        }
        if self.front_end.decode_width == 0 || self.front_end.fetch_buffer_size == 0 {
            return Err(SimError::Config("front-end widths must be nonzero".to_owned()));
        }
        if self.queues.is_empty() {
            return Err(SimError::Config("at least one issue queue is required".to_owned()));
        }
        for q in &self.queues {
            if q.size == 0 || q.units.is_empty() {
                return Err(SimError::Config(format!(
                    "queue {} must have nonzero size and at least one unit",
                    q.name
                )));
            }
        }
        let rates = [
            ("store_forward_rate", self.rates.store_forward_rate),
            ("dl1_miss_rate", self.rates.dl1_miss_rate),
            ("icache_miss_rate", self.rates.icache_miss_rate),
            ("l2_miss_rate", self.rates.l2_miss_rate),
            ("l3_miss_rate", self.rates.l3_miss_rate),
            ("dtlb1_miss_rate", self.rates.dtlb1_miss_rate),
            ("dtlb2_miss_rate", self.rates.dtlb2_miss_rate),
            ("itlb1_miss_rate", self.rates.itlb1_miss_rate),
            ("itlb2_miss_rate", self.rates.itlb2_miss_rate),
            ("branch.mispredict_rate", self.branch.mispredict_rate),
            ("branch.taken_rate", self.branch.taken_rate),
        ];
        for (name, value) in rates {
            if !(0.0..=1.0).contains(&value) {
                return Err(SimError::Config(format!("{name} ({value}) outside [0, 1]")));
            }
        }
        Ok(())
    }
}

/// Default model parameters, shaped after a three-wide out-of-order x86 core
/// with three specialized integer queues and one float queue.
pub mod defaults {
    use super::{QueueConfig, QueueKind, UnitSpec};

    /// L1 hit latency in cycles.
    pub const L1_LATENCY: u64 = 3;
    /// L2 hit latency in cycles.
    pub const L2_LATENCY: u64 = 12;
    /// L3 hit latency in cycles.
    pub const L3_LATENCY: u64 = 38;
    /// Main-memory latency in cycles.
    pub const MEMORY_LATENCY: u64 = 195;
    /// Added latency for a TLB1 miss that hits TLB2.
    pub const TLB1_MISS_LATENCY: u64 = 5;
    /// Added latency for a full TLB miss.
    pub const TLB2_MISS_LATENCY: u64 = 40;

    /// Store-to-load forwarding rate.
    pub const STORE_FORWARD_RATE: f64 = 0.35;
    /// Data L1 miss rate.
    pub const DL1_MISS_RATE: f64 = 0.04;
    /// Instruction cache miss rate.
    pub const ICACHE_MISS_RATE: f64 = 0.005;
    /// L2 miss rate.
    pub const L2_MISS_RATE: f64 = 0.2;
    /// L3 miss rate.
    pub const L3_MISS_RATE: f64 = 0.3;
    /// Data TLB1 miss rate.
    pub const DTLB1_MISS_RATE: f64 = 0.01;
    /// Data TLB2 miss rate, given a TLB1 miss.
    pub const DTLB2_MISS_RATE: f64 = 0.1;
    /// Instruction TLB1 miss rate.
    pub const ITLB1_MISS_RATE: f64 = 0.001;
    /// Instruction TLB2 miss rate, given a TLB1 miss.
    pub const ITLB2_MISS_RATE: f64 = 0.1;

    /// Conditional-branch misprediction rate.
    pub const BRANCH_MISPREDICT_RATE: f64 = 0.05;
    /// Conditional-branch taken rate.
    pub const BRANCH_TAKEN_RATE: f64 = 0.6;
    /// Misprediction flush penalty in cycles.
    pub const BRANCH_MISS_PENALTY: u64 = 11;

    /// Instructions entering the decode group per cycle.
    pub const INSTRUCTIONS_PER_CYCLE: usize = 3;
    /// Instructions per fetch group without a size distribution.
    pub const INSTRUCTIONS_PER_FETCH: usize = 4;
    /// Fetch buffer capacity.
    pub const FETCH_BUFFER_SIZE: usize = 16;
    /// Macro-op slots filled per decode cycle.
    pub const DECODE_WIDTH: usize = 3;

    /// Load/store queue slots.
    pub const MEM_QUEUE_SLOTS: usize = 32;
    /// Memory operations served per cycle.
    pub const MEM_OPS_PER_CYCLE: u64 = 2;

    /// Retirement buffer entries.
    pub const RETIRE_BUFFER_SLOTS: usize = 72;
    /// Instructions retired per cycle.
    pub const RETIRE_PER_CYCLE: usize = 3;

    pub(super) fn queue_size() -> usize {
        8
    }

    pub(super) fn queue_accept_rate() -> u32 {
        3
    }

    /// Default queue/unit topology.
    pub fn queues() -> Vec<QueueConfig> {
        vec![
            QueueConfig {
                name: "int0".to_owned(),
                kind: QueueKind::GenericInt,
                size: 8,
                accept_rate: 3,
                units: vec![UnitSpec::Alu, UnitSpec::Agu],
            },
            QueueConfig {
                name: "int-mul".to_owned(),
                kind: QueueKind::MultiplyInt,
                size: 8,
                accept_rate: 3,
                units: vec![UnitSpec::AluMul, UnitSpec::Agu],
            },
            QueueConfig {
                name: "int-special".to_owned(),
                kind: QueueKind::SpecialInt,
                size: 8,
                accept_rate: 3,
                units: vec![UnitSpec::AluSpecial, UnitSpec::Agu],
            },
            QueueConfig {
                name: "float".to_owned(),
                kind: QueueKind::Float,
                size: 36,
                accept_rate: 3,
                units: vec![UnitSpec::Fadd, UnitSpec::Fmul, UnitSpec::Fstore],
            },
        ]
    }
}
