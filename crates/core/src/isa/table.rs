//! Instruction class table with tiered lookup.
//!
//! The table owns every [`InstructionClass`] in definition-file order and
//! resolves workload records (mix lines, trace lines, use-distance lines)
//! onto classes through three tiers, most to least specific:
//! 1. mnemonic + operand kinds + operand size,
//! 2. mnemonic + operand kinds (any size),
//! 3. mnemonic alone (first class carrying it).
//!
//! Single-operand records that miss are retried with a synthesized second
//! operand, `reg` first and then `imm`, matching how two-operand classes are
//! commonly abbreviated in collected mixes.

use tracing::trace;

use crate::isa::class::{InstructionClass, OpSizeMask, OperandKind};

/// Index of a class within the [`ClassTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub usize);

/// Ordered storage for instruction class descriptors.
#[derive(Debug, Default)]
pub struct ClassTable {
    classes: Vec<InstructionClass>,
}

/// Rewrites condition-code and suffix variants onto the generic spelling the
/// definition files use.
pub fn normalize_mnemonic(raw: &str) -> String {
    let mut m = raw.to_ascii_uppercase();
    for suffix in ["_NEAR", "_XMM"] {
        if let Some(stripped) = m.strip_suffix(suffix) {
            m = stripped.to_owned();
        }
    }
    // JCXZ/JECXZ keep their own classes; they are not plain condition codes.
    if m != "JMP" && m.starts_with('J') && m.len() > 1 && !m.contains("CXZ") {
        return "JCC".to_owned();
    }
    if m.starts_with("CMOV") && m != "CMOVCC" {
        return "CMOVCC".to_owned();
    }
    if m.starts_with("SET") && m.len() > 3 && m != "SETCC" {
        return "SETCC".to_owned();
    }
    if m.starts_with("LOOP") {
        return "LOOPCC".to_owned();
    }
    m
}

impl ClassTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        ClassTable::default()
    }

    /// Appends a class and returns its id.
    pub fn push(&mut self, class: InstructionClass) -> ClassId {
        self.classes.push(class);
        ClassId(self.classes.len() - 1)
    }

    /// Number of classes loaded.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// True when no classes have been loaded.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Immutable access to a class.
    pub fn class(&self, id: ClassId) -> &InstructionClass {
        &self.classes[id.0]
    }

    /// Mutable access to a class.
    pub fn class_mut(&mut self, id: ClassId) -> &mut InstructionClass {
        &mut self.classes[id.0]
    }

    /// Iterates classes in definition order with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (ClassId, &InstructionClass)> {
        self.classes.iter().enumerate().map(|(i, c)| (ClassId(i), c))
    }

    /// Mutable iteration in definition order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ClassId, &mut InstructionClass)> {
        self.classes
            .iter_mut()
            .enumerate()
            .map(|(i, c)| (ClassId(i), c))
    }

    fn find_exact(
        &self,
        mnemonic: &str,
        operands: [OperandKind; 3],
        size: OpSizeMask,
    ) -> Option<ClassId> {
        self.classes
            .iter()
            .position(|c| c.mnemonic == mnemonic && c.operands == operands && c.op_sizes.contains(size))
            .map(ClassId)
    }

    fn find_operands(&self, mnemonic: &str, operands: [OperandKind; 3]) -> Option<ClassId> {
        self.classes
            .iter()
            .position(|c| c.mnemonic == mnemonic && c.operands == operands)
            .map(ClassId)
    }

    fn find_mnemonic(&self, mnemonic: &str) -> Option<ClassId> {
        self.classes
            .iter()
            .position(|c| c.mnemonic == mnemonic)
            .map(ClassId)
    }

    /// Resolves a workload record onto a class, tier by tier.
    ///
    /// `mnemonic` must already be normalized. Returns `None` only when no
    /// class carries the mnemonic at all.
    pub fn lookup(
        &self,
        mnemonic: &str,
        operands: [OperandKind; 3],
        size_bits: u32,
    ) -> Option<ClassId> {
        let size = OpSizeMask::from_bits(size_bits);
        if let Some(id) = self.find_exact(mnemonic, operands, size) {
            return Some(id);
        }
        if let Some(id) = self.find_operands(mnemonic, operands) {
            return Some(id);
        }
        // Single-operand records often abbreviate a two-operand class.
        if operands[1] == OperandKind::None && operands[0] != OperandKind::None {
            for synthesized in [OperandKind::Reg, OperandKind::Imm] {
                let widened = [operands[0], synthesized, OperandKind::None];
                if let Some(id) = self.find_exact(mnemonic, widened, size) {
                    trace!(mnemonic, synthesized = synthesized.name(), "widened operand lookup");
                    return Some(id);
                }
                if let Some(id) = self.find_operands(mnemonic, widened) {
                    return Some(id);
                }
            }
        }
        self.find_mnemonic(mnemonic)
    }
}
