//! Workload input handling: definition, mix, distance, size, trace, and
//! transition files.

pub mod loader;
