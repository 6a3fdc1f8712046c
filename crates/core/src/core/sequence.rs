//! Synthetic instruction sequence generation.
//!
//! Three interchangeable sources produce the class of each generated
//! instruction:
//! 1. **Mix sampling:** one draw against the workload-mix CDF, independent
//!    per instruction.
//! 2. **Markov chain:** the next class is drawn from a distribution
//!    conditioned on the last N classes, falling back to the plain mix when
//!    a history has no recorded successors.
//! 3. **Trace replay:** classes (with memory flags and fixed per-operand
//!    dependency distances) come from a recorded trace, optionally looped.

use std::collections::HashMap;

use rand::Rng;
use tracing::debug;

use crate::common::InsnNumber;
use crate::common::error::SimError;
use crate::isa::class::CDF_TOLERANCE;
use crate::isa::table::{ClassId, ClassTable};

/// Workload-mix CDF over instruction classes.
#[derive(Debug, Clone)]
pub struct MixCdf {
    thresholds: Vec<f64>,
    classes: Vec<ClassId>,
}

impl MixCdf {
    /// Builds the CDF from the per-class occurrence probabilities in `table`.
    ///
    /// Classes with zero probability are excluded. Fails when the total
    /// probability mass is not ~1.0.
    pub fn from_table(table: &ClassTable) -> Result<Self, SimError> {
        let entries = table
            .iter()
            .filter(|(_, c)| c.occur_prob > 0.0)
            .map(|(id, c)| (id, c.occur_prob));
        Self::from_entries(entries)
    }

    /// Builds the CDF from explicit (class, probability) pairs.
    pub fn from_entries(
        entries: impl IntoIterator<Item = (ClassId, f64)>,
    ) -> Result<Self, SimError> {
        let mut thresholds = Vec::new();
        let mut classes = Vec::new();
        let mut accum = 0.0;
        for (id, prob) in entries {
            accum += prob;
            thresholds.push(accum);
            classes.push(id);
        }
        if classes.is_empty() || (accum - 1.0).abs() > CDF_TOLERANCE {
            return Err(SimError::BadCdf(accum));
        }
        // A draw can never land past the last class, whatever rounding did.
        if let Some(last) = thresholds.last_mut() {
            *last = 1.1;
        }
        Ok(MixCdf { thresholds, classes })
    }

    /// Samples a class for draw `p` in [0, 1).
    pub fn sample(&self, p: f64) -> ClassId {
        let idx = self.thresholds.partition_point(|&t| t < p);
        self.classes[idx.min(self.classes.len() - 1)]
    }
}

/// CDF over discrete sizes (instruction bytes or fetch-group counts).
#[derive(Debug, Clone)]
pub struct SizeCdf {
    thresholds: Vec<f64>,
    values: Vec<u64>,
}

impl SizeCdf {
    /// Builds a CDF from (value, frequency) pairs.
    pub fn from_counts(pairs: &[(u64, u64)]) -> Result<Self, SimError> {
        let total: u64 = pairs.iter().map(|(_, f)| f).sum();
        if total == 0 {
            return Err(SimError::BadCdf(0.0));
        }
        let mut thresholds = Vec::with_capacity(pairs.len());
        let mut values = Vec::with_capacity(pairs.len());
        let mut accum = 0.0;
        for &(value, freq) in pairs {
            accum += freq as f64 / total as f64;
            thresholds.push(accum);
            values.push(value);
        }
        if let Some(last) = thresholds.last_mut() {
            *last = 1.1;
        }
        Ok(SizeCdf { thresholds, values })
    }

    /// Samples a size for draw `p` in [0, 1).
    pub fn sample(&self, p: f64) -> u64 {
        let idx = self.thresholds.partition_point(|&t| t < p);
        self.values[idx.min(self.values.len() - 1)]
    }
}

/// Order-N Markov chain over instruction classes.
#[derive(Debug)]
pub struct MarkovModel {
    order: usize,
    transitions: HashMap<Vec<ClassId>, MixCdf>,
    history: Vec<ClassId>,
    fallbacks: u64,
}

impl MarkovModel {
    /// Creates a chain of the given order from history -> successor CDFs.
    pub fn new(order: usize, transitions: HashMap<Vec<ClassId>, MixCdf>) -> Self {
        MarkovModel {
            order: order.max(1),
            transitions,
            history: Vec::new(),
            fallbacks: 0,
        }
    }

    /// History length the chain conditions on.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Times the chain fell back to the plain mix.
    pub fn fallbacks(&self) -> u64 {
        self.fallbacks
    }

    /// Draws the next class, conditioned on recent history when possible.
    pub fn next<R: Rng>(&mut self, rng: &mut R, fallback: &MixCdf) -> ClassId {
        let class = if self.history.len() == self.order {
            match self.transitions.get(&self.history) {
                Some(cdf) => cdf.sample(rng.gen()),
                None => {
                    self.fallbacks += 1;
                    fallback.sample(rng.gen())
                }
            }
        } else {
            fallback.sample(rng.gen())
        };
        if self.history.len() == self.order {
            self.history.remove(0);
        }
        self.history.push(class);
        class
    }

}

/// One recorded trace instruction.
#[derive(Debug, Clone)]
pub struct TraceRecord {
    /// Resolved instruction class.
    pub class: ClassId,
    /// The instruction performs a load.
    pub load: bool,
    /// The instruction performs a store.
    pub store: bool,
    /// Fixed per-source dependency distances.
    pub distances: Vec<InsnNumber>,
}

/// Replays a parsed trace, optionally looping forever.
#[derive(Debug)]
pub struct TraceReader {
    records: Vec<TraceRecord>,
    pos: usize,
    repeat: bool,
}

impl TraceReader {
    /// Wraps parsed records. `repeat` loops the trace instead of ending the
    /// simulation at its last record.
    pub fn new(records: Vec<TraceRecord>, repeat: bool) -> Self {
        TraceReader { records, pos: 0, repeat }
    }

    /// Records in the trace.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the trace holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Next record, or `None` when a non-looping trace is exhausted.
    pub fn next_record(&mut self) -> Option<TraceRecord> {
        if self.pos == self.records.len() {
            if !self.repeat || self.records.is_empty() {
                return None;
            }
            debug!(len = self.records.len(), "trace wrapped");
            self.pos = 0;
        }
        let record = self.records[self.pos].clone();
        self.pos += 1;
        Some(record)
    }
}

/// The configured instruction source.
#[derive(Debug)]
pub enum SequenceSource {
    /// Independent draws from the workload mix.
    Mix(MixCdf),
    /// History-conditioned draws, with the mix as fallback.
    Markov {
        /// The chain itself.
        chain: MarkovModel,
        /// Fallback mix for unseen histories.
        mix: MixCdf,
    },
    /// Replay of a recorded trace.
    Trace(TraceReader),
}

impl SequenceSource {
    /// Draws the next instruction, or `None` when an exhausted trace ends
    /// the run.
    pub fn next<R: Rng>(&mut self, rng: &mut R) -> Option<TraceRecord> {
        match self {
            SequenceSource::Mix(cdf) => Some(TraceRecord {
                class: cdf.sample(rng.gen()),
                load: false,
                store: false,
                distances: Vec::new(),
            }),
            SequenceSource::Markov { chain, mix } => Some(TraceRecord {
                class: chain.next(rng, mix),
                load: false,
                store: false,
                distances: Vec::new(),
            }),
            SequenceSource::Trace(reader) => reader.next_record(),
        }
    }

    /// True for trace replay, where memory flags and distances are fixed by
    /// the record rather than sampled.
    pub fn is_trace(&self) -> bool {
        matches!(self, SequenceSource::Trace(_))
    }
}
