//! Functional execution units.
//!
//! A unit models occupancy only: it is busy through an inclusive cycle and
//! free afterwards. The occupied-cycle counter and the last cycle the unit
//! was updated feed the duty-cycle report at the end of a run.

use crate::common::CycleCount;
use crate::isa::class::UnitKind;

/// One functional unit attached to an issue queue.
#[derive(Debug)]
pub struct ExecUnit {
    /// Kind of work the unit performs.
    pub kind: UnitKind,
    /// Display name, unique within the simulator.
    pub name: String,
    /// Index of the owning issue queue.
    pub queue: usize,

    busy_until: CycleCount,
    occupied_cycles: u64,
    last_cycle: CycleCount,
}

impl ExecUnit {
    /// Creates an idle unit.
    pub fn new(kind: UnitKind, name: String, queue: usize) -> Self {
        ExecUnit {
            kind,
            name,
            queue,
            busy_until: 0,
            occupied_cycles: 0,
            last_cycle: 0,
        }
    }

    /// True when the unit can accept work at `cycle`.
    pub fn is_available(&self, cycle: CycleCount) -> bool {
        self.busy_until < cycle
    }

    /// Occupies the unit for `cycles` starting at `at` (inclusive window).
    pub fn occupy(&mut self, at: CycleCount, cycles: u64) {
        let cycles = cycles.max(1);
        self.busy_until = at + cycles - 1;
        self.occupied_cycles += cycles;
        self.last_cycle = self.last_cycle.max(at);
    }

    /// Per-cycle bookkeeping. Occupancy expires by comparison against
    /// `busy_until`; this records the last cycle the unit existed for, which
    /// is the duty-cycle denominator.
    pub fn update_status(&mut self, cycle: CycleCount) {
        self.last_cycle = self.last_cycle.max(cycle);
    }

    /// Clears any occupancy on a pipeline flush.
    pub fn flush(&mut self) {
        self.busy_until = 0;
    }

    /// Fraction of cycles seen so far that the unit spent occupied.
    pub fn duty_cycle(&self) -> f64 {
        if self.last_cycle == 0 {
            0.0
        } else {
            (self.occupied_cycles as f64 / self.last_cycle as f64).min(1.0)
        }
    }

    /// Total cycles spent occupied.
    pub fn occupied_cycles(&self) -> u64 {
        self.occupied_cycles
    }
}
