//! Run-level statistics.

/// Counters accumulated over a simulation run.
///
/// Structure-local counters (queue occupancy, memory-level hits, unit duty
/// cycles) live on their structures; this struct holds the instruction-flow
/// totals the driver maintains.
#[derive(Debug, Default, Clone)]
pub struct SimStats {
    /// Cycles simulated.
    pub cycles: u64,
    /// Instructions generated by the sequence source.
    pub generated: u64,
    /// Instructions dispatched into the retirement buffer.
    pub dispatched: u64,
    /// Instructions retired in order.
    pub retired: u64,
    /// Dispatched instructions squashed by flushes or the watchdog.
    pub canceled: u64,
    /// Subset of `canceled` force-canceled by the stuck-instruction watchdog.
    pub watchdog_canceled: u64,
    /// Generated instructions discarded from the fetch buffer by a flush.
    pub squashed_frontend: u64,
    /// Cycles the fetch stage could not produce a new group.
    pub fetch_stalls: u64,
    /// Conditional branches generated.
    pub branches: u64,
    /// Conditional branches resolved taken.
    pub taken_branches: u64,
    /// Conditional branches resolved mispredicted.
    pub mispredicted_branches: u64,
    /// Full pipeline flushes performed.
    pub flushes: u64,
}

impl SimStats {
    /// Cycles per retired instruction; the headline estimate of a run.
    pub fn cpi(&self) -> f64 {
        if self.retired == 0 {
            0.0
        } else {
            self.cycles as f64 / self.retired as f64
        }
    }

    /// Retired instructions per cycle.
    pub fn ipc(&self) -> f64 {
        if self.cycles == 0 {
            0.0
        } else {
            self.retired as f64 / self.cycles as f64
        }
    }

    /// Prints the instruction-flow block of the final report.
    pub fn print(&self) {
        println!("--- instruction flow ---");
        println!("  cycles:                {:>14}", self.cycles);
        println!("  generated:             {:>14}", self.generated);
        println!("  dispatched:            {:>14}", self.dispatched);
        println!("  retired:               {:>14}", self.retired);
        println!("  canceled:              {:>14}", self.canceled);
        println!("    by watchdog:         {:>14}", self.watchdog_canceled);
        println!("  squashed in front end: {:>14}", self.squashed_frontend);
        println!("  fetch stalls:          {:>14}", self.fetch_stalls);
        println!("  branches:              {:>14}", self.branches);
        println!("    taken:               {:>14}", self.taken_branches);
        println!("    mispredicted:        {:>14}", self.mispredicted_branches);
        println!("  pipeline flushes:      {:>14}", self.flushes);
        println!("  CPI:                   {:>14.4}", self.cpi());
        println!("  IPC:                   {:>14.4}", self.ipc());
    }
}
