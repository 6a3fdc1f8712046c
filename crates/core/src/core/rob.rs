//! In-order retirement buffer.
//!
//! A circular buffer of macro-op slots filled at decode. Retirement works in
//! lines of the retirement width: the next line retires only when every slot
//! in it is a padding hole, a canceled instruction, or a completed
//! instruction dispatched in the same cycle as the line's oldest entry. A
//! completed mispredicted branch retires, then squashes everything younger
//! and signals a full pipeline flush to the driver.
//!
//! The decode stage pads every dispatch group out to the retirement width
//! with holes, so occupancy is always a whole number of lines.

use tracing::{debug, trace};

use crate::common::error::SimError;
use crate::common::{CycleCount, InsnNumber};
use crate::core::deps::DependencyTracker;
use crate::core::token::{TokenId, TokenPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// Padding inserted at decode to keep lines aligned.
    Hole,
    /// A dispatched instruction.
    Insn(TokenId),
}

/// What one retirement update accomplished.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetireOutcome {
    /// Instructions retired this cycle.
    pub retired: u64,
    /// Instructions squashed this cycle (watchdog leftovers or a flush).
    pub canceled: u64,
    /// A mispredicted branch retired; the driver must flush the pipeline.
    pub flush: bool,
}

/// Circular retirement buffer.
#[derive(Debug)]
pub struct RetireBuffer {
    slots: Vec<Option<Slot>>,
    head: usize,
    tail: usize,
    count: usize,
    width: usize,
    full_stalls: u64,
    last_retired: Option<InsnNumber>,
}

impl RetireBuffer {
    /// Creates a buffer of `capacity` slots retiring `width` per cycle.
    /// `capacity` must be a multiple of `width` (checked by config
    /// validation).
    pub fn new(capacity: usize, width: usize) -> Self {
        RetireBuffer {
            slots: vec![None; capacity],
            head: 0,
            tail: 0,
            count: 0,
            width: width.max(1),
            full_stalls: 0,
            last_retired: None,
        }
    }

    /// Number of the most recently retired instruction. Retirement is in
    /// program order, so this only ever increases.
    pub fn last_retired(&self) -> Option<InsnNumber> {
        self.last_retired
    }

    /// Occupied slots, holes included.
    pub fn len(&self) -> usize {
        self.count
    }

    /// True when nothing is in flight past decode.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Free slots remaining.
    pub fn free_slots(&self) -> usize {
        self.slots.len() - self.count
    }

    /// Records a decode stall caused by a full buffer.
    pub fn note_full_stall(&mut self) {
        self.full_stalls += 1;
    }

    /// Total decode stalls recorded against this buffer.
    pub fn full_stalls(&self) -> u64 {
        self.full_stalls
    }

    fn push(&mut self, slot: Slot) -> Result<(), SimError> {
        if self.count == self.slots.len() {
            return Err(SimError::CapacityExceeded("retirement buffer"));
        }
        self.slots[self.tail] = Some(slot);
        self.tail = (self.tail + 1) % self.slots.len();
        self.count += 1;
        Ok(())
    }

    /// Appends a dispatched instruction at the tail.
    pub fn dispatch(&mut self, token: TokenId) -> Result<(), SimError> {
        self.push(Slot::Insn(token))
    }

    /// Appends a padding hole at the tail.
    pub fn dispatch_hole(&mut self) -> Result<(), SimError> {
        self.push(Slot::Hole)
    }

    /// Attempts to retire the next line at `cycle`.
    ///
    /// Retired instructions are marked on their tokens and their dependency
    /// records released; the owning issue queue deletes the pool entries.
    /// Canceled leftovers (from the watchdog) are reaped here, pool entry
    /// included, since no queue still holds them.
    pub fn update(
        &mut self,
        cycle: CycleCount,
        pool: &mut TokenPool,
        deps: &mut DependencyTracker,
    ) -> RetireOutcome {
        let mut outcome = RetireOutcome::default();
        if self.count < self.width {
            return outcome;
        }

        // Qualify the line: all holes/canceled, or completed in one group.
        let mut line_cycle: Option<CycleCount> = None;
        for i in 0..self.width {
            let idx = (self.head + i) % self.slots.len();
            match self.slots[idx] {
                Some(Slot::Hole) | None => {}
                Some(Slot::Insn(tok)) => {
                    let Some(token) = pool.get(tok) else { continue };
                    if token.canceled {
                        continue;
                    }
                    if !token.completed {
                        return outcome;
                    }
                    match line_cycle {
                        None => line_cycle = Some(token.issue_cycle),
                        Some(c) if c != token.issue_cycle => return outcome,
                        Some(_) => {}
                    }
                }
            }
        }
        // A line of nothing but holes and canceled leftovers still drains,
        // otherwise watchdog victims would wedge the buffer.

        // Walk the line.
        let mut mispredict = false;
        for _ in 0..self.width {
            let idx = self.head;
            let slot = self.slots[idx].take();
            self.head = (self.head + 1) % self.slots.len();
            self.count -= 1;
            let Some(Slot::Insn(tok)) = slot else { continue };
            let Some(token) = pool.get_mut(tok) else { continue };
            if token.canceled {
                deps.note_finished(token.number);
                if let Some(dep) = token.dep {
                    deps.release(dep);
                }
                outcome.canceled += 1;
                pool.remove(tok);
                continue;
            }
            token.retired = true;
            let number = token.number;
            self.last_retired = Some(number);
            let dep = token.dep;
            let bad_branch = token.mispredicted;
            deps.note_finished(number);
            if let Some(dep) = dep {
                deps.release(dep);
            }
            outcome.retired += 1;
            trace!(insn = number, cycle, "retired");
            if bad_branch {
                mispredict = true;
                break;
            }
        }

        if mispredict {
            debug!(cycle, squashed = self.count, "mispredicted branch retired, squashing buffer");
            outcome.flush = true;
            outcome.canceled += self.squash_all(pool, deps);
        }
        outcome
    }

    /// Cancels every remaining instruction and empties the buffer. Pool
    /// entries stay live; the issue queues and the driver delete them during
    /// the flush. Returns the number of instructions canceled.
    pub fn squash_all(&mut self, pool: &mut TokenPool, deps: &mut DependencyTracker) -> u64 {
        let mut canceled = 0;
        while self.count > 0 {
            let slot = self.slots[self.head].take();
            self.head = (self.head + 1) % self.slots.len();
            self.count -= 1;
            let Some(Slot::Insn(tok)) = slot else { continue };
            let Some(token) = pool.get_mut(tok) else { continue };
            if !token.is_finished() {
                token.cancel();
                deps.note_finished(token.number);
                if let Some(dep) = token.dep {
                    deps.release(dep);
                }
                canceled += 1;
            }
        }
        self.head = 0;
        self.tail = 0;
        canceled
    }
}
