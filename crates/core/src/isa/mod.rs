//! Static instruction-class model.
//!
//! It provides:
//! 1. **Class descriptors:** per-class timing, resource, and probability data
//!    ([`class::InstructionClass`]).
//! 2. **The class table:** ordered storage with mnemonic normalization and the
//!    tiered lookup used by mix, trace, and use-distance loading
//!    ([`table::ClassTable`]).

pub mod class;
pub mod table;
