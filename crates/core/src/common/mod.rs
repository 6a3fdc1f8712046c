//! Common types shared by every component of the simulation engine.

/// Error taxonomy for configuration, parsing, and structural violations.
pub mod error;

/// Simulated clock cycle count.
pub type CycleCount = u64;

/// Monotonically increasing dynamic-instruction number (1-based).
pub type InsnNumber = u64;
