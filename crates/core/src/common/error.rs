//! Error definitions for the simulation engine.
//!
//! The variants map onto the failure classes the engine distinguishes:
//! 1. **Configuration errors:** unusable model parameters; fatal at initialization.
//! 2. **Parse errors:** malformed definition/mix/trace/distribution files; fatal.
//! 3. **Lookup misses:** a workload record names an unknown instruction class;
//!    recoverable (the caller logs and skips the record).
//! 4. **Capacity violations:** dispatch against a full structure without a prior
//!    capacity check; a programming-invariant violation, defensive only.

use thiserror::Error;

/// Errors produced while building or driving the simulation.
#[derive(Debug, Error)]
pub enum SimError {
    /// A required configuration parameter is missing or inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// A line in an input file could not be parsed.
    #[error("{file}:{line}: {msg}")]
    Parse {
        /// Path of the offending file.
        file: String,
        /// 1-based line number.
        line: usize,
        /// What went wrong.
        msg: String,
    },

    /// No instruction class matched a (mnemonic, operand, size) combination.
    ///
    /// Fatal while loading the definition-derived mix; recoverable (skip with
    /// a diagnostic) while accumulating optional use-distance statistics.
    #[error("no instruction class for {mnemonic} {operands} ({op_size}-bit)")]
    ClassNotFound {
        /// Normalized mnemonic that was searched.
        mnemonic: String,
        /// Comma-joined simplified operand kinds.
        operands: String,
        /// Operand size in bits.
        op_size: u32,
    },

    /// A probability table did not accumulate to ~1.0.
    #[error("probability CDF sums to {0}, expected ~1.0")]
    BadCdf(f64),

    /// Dispatch was attempted against a full structure.
    ///
    /// Callers must check `can_accept`/`is_full` first; reaching this variant
    /// indicates a driver bug, not a simulation condition.
    #[error("{0} dispatched beyond capacity")]
    CapacityExceeded(&'static str),

    /// Failure reading an input file.
    #[error("cannot read {path}: {source}")]
    Io {
        /// Path that failed to open or read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
