//! Static per-class instruction descriptors.
//!
//! An [`InstructionClass`] groups every dynamic instruction that shares a
//! mnemonic, simplified operand shape, and operand-size set. It carries the
//! timing and resource parameters read from the definition file, plus the
//! probability data (occurrence, load/store, use-distance CDFs) accumulated
//! from the mix files, plus running counters updated during simulation.

use crate::common::InsnNumber;

/// Number of buckets in a per-source use-distance histogram.
pub const HISTOGRAM_BUCKETS: usize = 512;

/// Maximum number of tracked source operands per instruction.
pub const MAX_SOURCE_OPS: usize = 3;

/// Tolerance when validating that an accumulated CDF reaches 1.0.
pub const CDF_TOLERANCE: f64 = 1e-5;

/// Simplified operand kind. Registers of any file collapse to `Reg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OperandKind {
    /// No operand in this position.
    #[default]
    None,
    /// Register (general-purpose, vector, or flag).
    Reg,
    /// Memory reference.
    Mem,
    /// Immediate value.
    Imm,
    /// Displacement (branch target or pointer literal).
    Disp,
}

impl OperandKind {
    /// Collapses a raw operand spelling from a definition or mix file.
    ///
    /// `reg32`, `xmm`, `mm`, and friends all become `Reg`; anything starting
    /// with `mem` becomes `Mem`. Unknown spellings fall back to `Reg`, the
    /// most permissive kind for matching.
    pub fn simplify(raw: &str) -> Self {
        let lower = raw.to_ascii_lowercase();
        if lower.is_empty() || lower == "none" {
            OperandKind::None
        } else if lower.starts_with("mem") {
            OperandKind::Mem
        } else if lower.starts_with("imm") {
            OperandKind::Imm
        } else if lower.starts_with("disp") || lower.starts_with("ptr") {
            OperandKind::Disp
        } else {
            OperandKind::Reg
        }
    }

    /// Short lowercase name used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            OperandKind::None => "none",
            OperandKind::Reg => "reg",
            OperandKind::Mem => "mem",
            OperandKind::Imm => "imm",
            OperandKind::Disp => "disp",
        }
    }
}

/// Bitmask of operand sizes a class covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpSizeMask(u8);

impl OpSizeMask {
    /// 8-bit operands.
    pub const SIZE8: OpSizeMask = OpSizeMask(1);
    /// 16-bit operands.
    pub const SIZE16: OpSizeMask = OpSizeMask(2);
    /// 32-bit operands.
    pub const SIZE32: OpSizeMask = OpSizeMask(4);
    /// 64-bit operands.
    pub const SIZE64: OpSizeMask = OpSizeMask(8);
    /// 128-bit (vector) operands.
    pub const SIZE128: OpSizeMask = OpSizeMask(16);

    /// Maps a size in bits onto its mask bit. Unknown sizes map to 64-bit.
    pub fn from_bits(bits: u32) -> Self {
        match bits {
            8 => Self::SIZE8,
            16 => Self::SIZE16,
            32 => Self::SIZE32,
            128 => Self::SIZE128,
            _ => Self::SIZE64,
        }
    }

    /// Adds the sizes of `other` to this mask.
    pub fn insert(&mut self, other: OpSizeMask) {
        self.0 |= other.0;
    }

    /// True when every size bit of `other` is present.
    pub fn contains(self, other: OpSizeMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when the mask covers no size at all.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Functional-unit kind a class may execute on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKind {
    /// Address-generation unit.
    Agu,
    /// Plain integer ALU.
    Alu,
    /// Integer ALU with the multiplier attached.
    AluMul,
    /// Integer ALU handling the special (rare) operations.
    AluSpecial,
    /// Floating-point adder.
    FAdd,
    /// Floating-point multiplier.
    FMul,
    /// Floating-point store/convert unit.
    FStore,
}

impl UnitKind {
    fn bit(self) -> u8 {
        match self {
            UnitKind::Agu => 1,
            UnitKind::Alu => 2,
            UnitKind::AluMul => 4,
            UnitKind::AluSpecial => 8,
            UnitKind::FAdd => 16,
            UnitKind::FMul => 32,
            UnitKind::FStore => 64,
        }
    }

    /// Short display name, matching the definition-file spellings.
    pub fn name(self) -> &'static str {
        match self {
            UnitKind::Agu => "AGU",
            UnitKind::Alu => "ALU",
            UnitKind::AluMul => "ALU0",
            UnitKind::AluSpecial => "ALU2",
            UnitKind::FAdd => "FADD",
            UnitKind::FMul => "FMUL",
            UnitKind::FStore => "FSTORE",
        }
    }
}

/// Bitmask of functional-unit kinds a class may execute on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnitMask(u8);

impl UnitMask {
    /// Empty mask.
    pub const EMPTY: UnitMask = UnitMask(0);

    /// Mask containing exactly `kind`.
    pub fn only(kind: UnitKind) -> Self {
        UnitMask(kind.bit())
    }

    /// Adds `kind` to the mask.
    pub fn insert(&mut self, kind: UnitKind) {
        self.0 |= kind.bit();
    }

    /// True when `kind` is in the mask.
    pub fn contains(self, kind: UnitKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// True when no unit kind is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Issue-queue category an instruction class dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Plain integer work (ALU/AGU).
    GenericInt,
    /// Integer multiplies.
    MultiplyInt,
    /// Rare integer operations on the special ALU.
    SpecialInt,
    /// Floating-point and vector work.
    Float,
}

impl Category {
    /// Display name used in reports.
    pub fn name(self) -> &'static str {
        match self {
            Category::GenericInt => "generic-int",
            Category::MultiplyInt => "multiply-int",
            Category::SpecialInt => "special-int",
            Category::Float => "float",
        }
    }
}

/// One per-source-operand use-distance CDF.
///
/// Bucket `i` holds the cumulative probability that a consumer of this
/// operand position sits `i + 1` dynamic instructions behind its producer.
#[derive(Debug, Clone)]
pub struct UseDistanceCdf {
    buckets: Vec<f64>,
}

impl UseDistanceCdf {
    /// Builds a CDF from raw per-distance counts (bucket `i` = distance `i`;
    /// bucket 0 means no tracked dependency).
    pub fn from_counts(counts: &[u64]) -> Self {
        let total: u64 = counts.iter().sum();
        let mut buckets = vec![0.0; HISTOGRAM_BUCKETS.min(counts.len().max(1))];
        if total == 0 {
            // No samples: everything at distance 0, i.e. no constraint.
            if let Some(first) = buckets.first_mut() {
                *first = 1.0;
            }
            return UseDistanceCdf { buckets };
        }
        let mut accum = 0.0;
        for (i, &c) in counts.iter().take(buckets.len()).enumerate() {
            accum += c as f64 / total as f64;
            buckets[i] = accum;
        }
        // Rounding must never leave the last bucket unreachable.
        if let Some(last) = buckets.last_mut() {
            *last = 1.1;
        }
        UseDistanceCdf { buckets }
    }

    /// Samples a distance for probability draw `p` in [0, 1). A sample of 0
    /// means the operand has no tracked producer.
    pub fn sample(&self, p: f64) -> InsnNumber {
        let idx = self.buckets.partition_point(|&b| b < p);
        idx.min(self.buckets.len().saturating_sub(1)) as InsnNumber
    }
}

/// Static descriptor for one instruction class.
#[derive(Debug, Clone)]
pub struct InstructionClass {
    /// Normalized mnemonic.
    pub mnemonic: String,
    /// Simplified operand kinds, in operand order.
    pub operands: [OperandKind; 3],
    /// Operand sizes this class covers.
    pub op_sizes: OpSizeMask,
    /// Issue-queue category.
    pub category: Category,
    /// Functional-unit kinds that can execute the operation.
    pub units: UnitMask,
    /// Execution latency with register operands only.
    pub base_latency: u64,
    /// Execution latency when a memory operand is involved.
    pub mem_latency: u64,
    /// Cycles a functional unit stays occupied per issue.
    pub occupancy: u64,
    /// Macro-op slots consumed at decode (1 = single, 2 = double, 3 = vector path).
    pub decode_cost: u8,
    /// Number of tracked source operands.
    pub source_ops: usize,
    /// Conditional branch flag.
    pub is_cond_branch: bool,
    /// Unconditional branch flag.
    pub is_uncond_branch: bool,
    /// Implicit stack access (PUSH/POP/CALL/RET family); skips address generation.
    pub is_stack_op: bool,

    /// Occurrence probability within the workload mix.
    pub occur_prob: f64,
    /// Probability that a dynamic instance performs a load.
    pub load_prob: f64,
    /// Probability that a dynamic instance performs a store.
    pub store_prob: f64,
    /// Raw occurrence count from the mix file.
    pub occurrences: u64,
    /// Per-source use-distance CDFs, indexed by operand position.
    pub use_distances: Vec<UseDistanceCdf>,

    /// Dynamic instances generated so far.
    pub sim_count: u64,
    /// Sum of sampled dependency distances, for the per-class average.
    pub dep_dist_sum: u64,
}

impl InstructionClass {
    /// Creates a descriptor with timing/resource data and empty statistics.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mnemonic: String,
        operands: [OperandKind; 3],
        op_sizes: OpSizeMask,
        category: Category,
        units: UnitMask,
        base_latency: u64,
        mem_latency: u64,
        occupancy: u64,
        decode_cost: u8,
    ) -> Self {
        let source_ops = operands
            .iter()
            .filter(|o| matches!(o, OperandKind::Reg | OperandKind::Mem))
            .count()
            .min(MAX_SOURCE_OPS);
        let upper = mnemonic.to_ascii_uppercase();
        let is_cond_branch = upper.starts_with('J') && upper != "JMP";
        let is_uncond_branch = upper == "JMP" || upper == "CALL" || upper == "RET";
        let is_stack_op = matches!(upper.as_str(), "PUSH" | "POP" | "CALL" | "RET" | "LEAVE");
        InstructionClass {
            mnemonic,
            operands,
            op_sizes,
            category,
            units,
            base_latency: base_latency.max(1),
            mem_latency,
            occupancy: occupancy.max(1),
            decode_cost: decode_cost.clamp(1, 3),
            source_ops,
            is_cond_branch,
            is_uncond_branch,
            is_stack_op,
            occur_prob: 0.0,
            load_prob: 0.0,
            store_prob: 0.0,
            occurrences: 0,
            use_distances: Vec::new(),
            sim_count: 0,
            dep_dist_sum: 0,
        }
    }

    /// True when any operand position is a memory reference.
    pub fn has_mem_operand(&self) -> bool {
        self.operands.contains(&OperandKind::Mem)
    }

    /// True when the class covers 128-bit operands (wide stores take two
    /// memory-queue slots and two throughput units).
    pub fn is_wide(&self) -> bool {
        self.op_sizes.contains(OpSizeMask::SIZE128)
    }

    /// Execution latency for a dynamic instance, depending on whether it
    /// touches memory.
    pub fn latency(&self, touches_memory: bool) -> u64 {
        if touches_memory && self.mem_latency > 0 {
            self.mem_latency.max(self.base_latency)
        } else {
            self.base_latency
        }
    }

    /// Samples a dependency distance for source operand `source`.
    ///
    /// Classes without a loaded histogram for that position report distance
    /// 0, i.e. the operand carries no tracked dependency.
    pub fn use_distance(&self, source: usize, p: f64) -> InsnNumber {
        match self.use_distances.get(source) {
            Some(cdf) => cdf.sample(p),
            None => 0,
        }
    }

    /// Average sampled dependency distance over the run so far.
    pub fn avg_dep_distance(&self) -> f64 {
        if self.sim_count == 0 {
            0.0
        } else {
            self.dep_dist_sum as f64 / self.sim_count as f64
        }
    }

    /// Comma-joined operand names for diagnostics.
    pub fn operand_names(&self) -> String {
        self.operands
            .iter()
            .filter(|o| !matches!(o, OperandKind::None))
            .map(|o| o.name())
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn class(mnemonic: &str, ops: [OperandKind; 3]) -> InstructionClass {
        InstructionClass::new(
            mnemonic.to_owned(),
            ops,
            OpSizeMask::SIZE64,
            Category::GenericInt,
            UnitMask::only(UnitKind::Alu),
            1,
            4,
            1,
            1,
        )
    }

    #[test]
    fn test_simplify_collapses_register_families() {
        assert_eq!(OperandKind::simplify("reg32"), OperandKind::Reg);
        assert_eq!(OperandKind::simplify("xmm"), OperandKind::Reg);
        assert_eq!(OperandKind::simplify("mem64"), OperandKind::Mem);
        assert_eq!(OperandKind::simplify("imm8"), OperandKind::Imm);
        assert_eq!(OperandKind::simplify("ptr16:32"), OperandKind::Disp);
        assert_eq!(OperandKind::simplify(""), OperandKind::None);
    }

    #[test]
    fn test_branch_and_stack_flags() {
        assert!(class("JCC", [OperandKind::Disp, OperandKind::None, OperandKind::None]).is_cond_branch);
        assert!(class("JMP", [OperandKind::Disp, OperandKind::None, OperandKind::None]).is_uncond_branch);
        let push = class("PUSH", [OperandKind::Reg, OperandKind::None, OperandKind::None]);
        assert!(push.is_stack_op);
        assert!(!push.is_cond_branch);
    }

    #[test]
    fn test_source_ops_counts_reg_and_mem_only() {
        let c = class("ADD", [OperandKind::Reg, OperandKind::Imm, OperandKind::None]);
        assert_eq!(c.source_ops, 1);
        let c = class("ADD", [OperandKind::Reg, OperandKind::Mem, OperandKind::None]);
        assert_eq!(c.source_ops, 2);
    }

    #[test]
    fn test_use_distance_cdf_sampling() {
        // 10% of uses untracked, 65% at distance 1, the rest at distance 3.
        let cdf = UseDistanceCdf::from_counts(&[10, 65, 0, 25]);
        assert_eq!(cdf.sample(0.05), 0);
        assert_eq!(cdf.sample(0.5), 1);
        assert_eq!(cdf.sample(0.8), 3);
        assert_eq!(cdf.sample(0.999_999), 3);
    }

    #[test]
    fn test_empty_histogram_means_no_dependency() {
        let cdf = UseDistanceCdf::from_counts(&[]);
        assert_eq!(cdf.sample(0.9), 0);
    }

    #[test]
    fn test_missing_histogram_means_no_dependency() {
        let c = class("ADD", [OperandKind::Reg, OperandKind::Reg, OperandKind::None]);
        assert_eq!(c.use_distance(0, 0.5), 0);
        assert_eq!(c.use_distance(2, 0.5), 0);
    }

    #[test]
    fn test_latency_prefers_memory_latency_when_touching_memory() {
        let c = class("ADD", [OperandKind::Reg, OperandKind::Mem, OperandKind::None]);
        assert_eq!(c.latency(false), 1);
        assert_eq!(c.latency(true), 4);
    }

    #[test]
    fn test_size_mask_wide_detection() {
        let mut sizes = OpSizeMask::SIZE32;
        sizes.insert(OpSizeMask::SIZE128);
        let mut c = class("MOVAPS", [OperandKind::Reg, OperandKind::Mem, OperandKind::None]);
        c.op_sizes = sizes;
        assert!(c.is_wide());
    }
}
