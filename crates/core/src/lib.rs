//! A Monte-Carlo, statistically-driven model of an out-of-order superscalar
//! core.
//!
//! No programs run here. The simulator draws a synthetic instruction stream
//! from measured workload statistics (instruction mix, dependency distances,
//! cache hit rates, branch behavior) and pushes it through a cycle-stepped
//! pipeline model to estimate CPI and resource pressure.
//!
//! It provides:
//! 1. **A static instruction model:** class descriptors with timing,
//!    resource, and probability data ([`isa`]).
//! 2. **Pipeline structures:** issue queues, functional units, a memory
//!    access queue, a retirement buffer, and a dependency tracker
//!    ([`core`]).
//! 3. **A statistical memory hierarchy:** CDF-threshold classification of
//!    every access instead of caches with state ([`core::memory`]).
//! 4. **Sequence sources:** mix sampling, Markov-chain generation, and
//!    trace replay ([`core::sequence`]).
//! 5. **Workload file loading:** definitions, mixes, distance histograms,
//!    size distributions, traces, and transition tables ([`sim::loader`]).
//!
//! The typical flow:
//!
//! ```no_run
//! use std::path::Path;
//! use mcsim_core::config::Config;
//! use mcsim_core::core::engine::Simulator;
//! use mcsim_core::core::sequence::{MixCdf, SequenceSource};
//! use mcsim_core::sim::loader;
//!
//! # fn main() -> Result<(), mcsim_core::common::error::SimError> {
//! let mut table = loader::load_definitions(Path::new("instructions.def"))?;
//! loader::load_mix(Path::new("workload.imix"), &mut table)?;
//! let source = SequenceSource::Mix(MixCdf::from_table(&table)?);
//! let mut sim = Simulator::new(&Config::default(), table, source, 42)?;
//! sim.run(1_000_000)?;
//! sim.print_report();
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod config;
pub mod core;
pub mod isa;
pub mod sim;
pub mod stats;
