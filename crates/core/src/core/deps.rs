//! Register dependency tracking.
//!
//! Each in-flight instruction with tracked source operands owns one
//! [`DepRecord`] naming the dynamic-instruction numbers of its producers
//! (consumer number minus a sampled use distance). Readiness propagates from
//! two sources:
//! 1. a **watermark**: the highest instruction number already retired or
//!    canceled; every producer at or below it is ready, and
//! 2. a **completed set**: instruction numbers that finished executing but
//!    have not retired yet, so consumers can wake up out of order.
//!
//! The watermark only advances on the retirement/cancel path, which also
//! prunes the completed set, so neither structure grows with the run length.

use std::collections::HashSet;

use crate::common::InsnNumber;
use crate::isa::class::MAX_SOURCE_OPS;

/// Handle to a dependency record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepId(usize);

/// Producers one consumer waits on. A producer entry of 0 is satisfied.
#[derive(Debug, Clone)]
struct DepRecord {
    consumer: InsnNumber,
    producers: [InsnNumber; MAX_SOURCE_OPS],
    outstanding: u8,
}

/// Arena of dependency records plus the global readiness state.
#[derive(Debug, Default)]
pub struct DependencyTracker {
    records: Vec<Option<DepRecord>>,
    free: Vec<usize>,
    completed: HashSet<InsnNumber>,
    watermark: InsnNumber,
}

impl DependencyTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        DependencyTracker::default()
    }

    /// Number of live records.
    pub fn live(&self) -> usize {
        self.records.len() - self.free.len()
    }

    /// Highest instruction number known retired or canceled.
    pub fn watermark(&self) -> InsnNumber {
        self.watermark
    }

    /// Creates a record for `consumer` from per-source dependency distances.
    ///
    /// A distance of 0, or one reaching at or before instruction 0, counts as
    /// already satisfied. Returns `None` when nothing remains outstanding, in
    /// which case the consumer is ready immediately and no record is stored.
    pub fn create(&mut self, consumer: InsnNumber, distances: &[InsnNumber]) -> Option<DepId> {
        let mut producers = [0; MAX_SOURCE_OPS];
        let mut outstanding = 0u8;
        for (slot, &dist) in producers.iter_mut().zip(distances.iter()) {
            if dist == 0 || dist >= consumer {
                continue;
            }
            let producer = consumer - dist;
            if producer <= self.watermark || self.completed.contains(&producer) {
                continue;
            }
            *slot = producer;
            outstanding += 1;
        }
        if outstanding == 0 {
            return None;
        }
        let record = DepRecord {
            consumer,
            producers,
            outstanding,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.records[idx] = Some(record);
                idx
            }
            None => {
                self.records.push(Some(record));
                self.records.len() - 1
            }
        };
        Some(DepId(idx))
    }

    /// Records that instruction `n` finished executing.
    pub fn note_completed(&mut self, n: InsnNumber) {
        if n > self.watermark {
            self.completed.insert(n);
        }
    }

    /// Advances the watermark when instruction `n` retires or is canceled,
    /// and prunes completed entries the watermark now covers.
    pub fn note_finished(&mut self, n: InsnNumber) {
        if n > self.watermark {
            self.watermark = n;
            let mark = self.watermark;
            self.completed.retain(|&c| c > mark);
        } else {
            self.completed.remove(&n);
        }
    }

    /// Re-evaluates a record against the current readiness state.
    ///
    /// Ready producers are cleared in place so later polls stay cheap.
    /// Returns true when every producer is satisfied. A stale or absent
    /// record polls as ready.
    pub fn poll(&mut self, id: DepId) -> bool {
        let Some(record) = self.records.get_mut(id.0).and_then(Option::as_mut) else {
            return true;
        };
        for producer in &mut record.producers {
            if *producer == 0 {
                continue;
            }
            if *producer <= self.watermark || self.completed.contains(producer) {
                *producer = 0;
                record.outstanding -= 1;
            }
        }
        record.outstanding == 0
    }

    /// Outstanding producer count for diagnostics.
    pub fn outstanding(&self, id: DepId) -> u8 {
        self.records
            .get(id.0)
            .and_then(Option::as_ref)
            .map_or(0, |r| r.outstanding)
    }

    /// Consumer number a record belongs to, for diagnostics.
    pub fn consumer(&self, id: DepId) -> Option<InsnNumber> {
        self.records.get(id.0).and_then(Option::as_ref).map(|r| r.consumer)
    }

    /// Frees a record when its consumer retires or is canceled.
    pub fn release(&mut self, id: DepId) {
        if let Some(slot) = self.records.get_mut(id.0) {
            if slot.take().is_some() {
                self.free.push(id.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_distance_zero_and_out_of_range_are_satisfied() {
        let mut deps = DependencyTracker::new();
        // Instruction 3 depending 5 back reaches before the stream start.
        assert!(deps.create(3, &[0, 5]).is_none());
        assert_eq!(deps.live(), 0);
    }

    #[test]
    fn test_completion_wakes_consumer_before_retirement() {
        let mut deps = DependencyTracker::new();
        let id = deps.create(10, &[2]).unwrap_or_else(|| panic!("record expected"));
        assert!(!deps.poll(id));
        deps.note_completed(8);
        assert!(deps.poll(id));
        assert_eq!(deps.watermark(), 0);
    }

    #[test]
    fn test_watermark_satisfies_older_producers() {
        let mut deps = DependencyTracker::new();
        let id = deps.create(10, &[3, 4]).unwrap_or_else(|| panic!("record expected"));
        assert_eq!(deps.outstanding(id), 2);
        deps.note_finished(6);
        assert!(deps.poll(id));
    }

    #[test]
    fn test_watermark_prunes_completed_set() {
        let mut deps = DependencyTracker::new();
        deps.note_completed(4);
        deps.note_completed(9);
        deps.note_finished(5);
        // Producer 4 (12-8) is covered by the watermark, 9 (12-3) by the
        // completed set, so nothing is outstanding at creation.
        assert!(deps.create(12, &[8, 3]).is_none());
    }

    #[test]
    fn test_release_recycles_record_slots() {
        let mut deps = DependencyTracker::new();
        let a = deps.create(10, &[2]).unwrap_or_else(|| panic!("record expected"));
        deps.release(a);
        assert_eq!(deps.live(), 0);
        let b = deps.create(11, &[2]).unwrap_or_else(|| panic!("record expected"));
        assert_eq!(deps.live(), 1);
        // Slot reuse keeps the arena from growing.
        assert_eq!(a, b);
    }

    #[test]
    fn test_stale_record_polls_ready() {
        let mut deps = DependencyTracker::new();
        let a = deps.create(10, &[2]).unwrap_or_else(|| panic!("record expected"));
        deps.release(a);
        assert!(deps.poll(a));
    }
}
