//! Category-specialized issue queues.
//!
//! A queue holds dispatched instructions in macro-op slots until a compatible
//! functional unit executes them. It provides:
//! 1. **Dispatch:** contiguous-slot placement, gated by category, free space,
//!    and a per-cycle accept rate.
//! 2. **Scheduling:** a front-to-back scan assigning waiting instructions to
//!    free units, oldest first, with at most one unit-compatibility attempt
//!    per instruction per cycle.
//! 3. **Cleanup and repack:** finished instructions leave their slots and the
//!    remainder compacts toward the front, preserving order.
//!
//! A watchdog force-cancels any instruction still waiting long after
//! dispatch, so one unsatisfiable dependency cannot wedge the whole model.

use tracing::{trace, warn};

use crate::common::CycleCount;
use crate::config::QueueKind;
use crate::core::deps::DependencyTracker;
use crate::core::token::{TokenId, TokenPool, ADDRESS_GEN_LATENCY};
use crate::core::unit::ExecUnit;
use crate::common::error::SimError;
use crate::isa::class::{Category, UnitKind};
use crate::isa::table::ClassTable;

/// Cycles an instruction may sit in a queue before the watchdog cancels it.
pub const STUCK_THRESHOLD: u64 = 3000;

/// Per-schedule results the driver folds into its statistics.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScheduleOutcome {
    /// Instructions force-canceled by the watchdog this cycle.
    pub watchdog_canceled: u64,
}

/// One issue queue and its slot array.
#[derive(Debug)]
pub struct IssueQueue {
    /// Display name.
    pub name: String,
    /// Instruction category this queue accepts.
    pub kind: QueueKind,
    /// Indices of the units (in the simulator's unit table) attached here.
    pub units: Vec<usize>,

    slots: Vec<Option<TokenId>>,
    occupied: usize,
    accept_rate: u32,
    accepted: u32,
    accept_cycle: CycleCount,

    full_stalls: u64,
    occupancy_sum: u64,
    occupancy_samples: u64,
}

impl IssueQueue {
    /// Creates an empty queue with `size` macro-op slots.
    pub fn new(name: String, kind: QueueKind, size: usize, accept_rate: u32, units: Vec<usize>) -> Self {
        IssueQueue {
            name,
            kind,
            units,
            slots: vec![None; size],
            occupied: 0,
            accept_rate: accept_rate.max(1),
            accepted: 0,
            accept_cycle: 0,
            full_stalls: 0,
            occupancy_sum: 0,
            occupancy_samples: 0,
        }
    }

    /// Occupied macro-op slots.
    pub fn len(&self) -> usize {
        self.occupied
    }

    /// True when no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    /// True when this queue's category accepts `category`.
    pub fn accepts_category(&self, category: Category) -> bool {
        matches!(
            (self.kind, category),
            (QueueKind::GenericInt, Category::GenericInt)
                | (QueueKind::MultiplyInt, Category::MultiplyInt)
                | (QueueKind::SpecialInt, Category::SpecialInt)
                | (QueueKind::Float, Category::Float)
        )
    }

    /// True when the per-cycle accept rate has been exhausted at `cycle`.
    pub fn accept_quota_reached(&self, cycle: CycleCount) -> bool {
        self.accept_cycle == cycle && self.accepted >= self.accept_rate
    }

    /// True when a run of `cost` contiguous free slots exists at the tail.
    ///
    /// Slots are compacted after every schedule, so the free region is always
    /// the tail of the array.
    pub fn can_accept(&self, cost: usize) -> bool {
        self.slots.len() - self.occupied >= cost
    }

    /// Records a dispatch failure caused by lack of space or quota.
    pub fn note_full_stall(&mut self) {
        self.full_stalls += 1;
    }

    /// Total dispatch failures recorded.
    pub fn full_stalls(&self) -> u64 {
        self.full_stalls
    }

    /// Mean occupied slots over all schedule samples.
    pub fn avg_occupancy(&self) -> f64 {
        if self.occupancy_samples == 0 {
            0.0
        } else {
            self.occupancy_sum as f64 / self.occupancy_samples as f64
        }
    }

    /// Places `token` into `cost` contiguous slots and charges the accept
    /// quota for `cycle`. Callers must check acceptance first.
    pub fn dispatch(&mut self, token: TokenId, cost: usize, cycle: CycleCount) -> Result<(), SimError> {
        if !self.can_accept(cost) {
            return Err(SimError::CapacityExceeded("issue queue"));
        }
        for slot in self.slots.iter_mut().skip(self.occupied).take(cost) {
            *slot = Some(token);
        }
        self.occupied += cost;
        if self.accept_cycle != cycle {
            self.accept_cycle = cycle;
            self.accepted = 0;
        }
        self.accepted += 1;
        Ok(())
    }

    fn clear_token(&mut self, token: TokenId) {
        for slot in &mut self.slots {
            if *slot == Some(token) {
                *slot = None;
                self.occupied -= 1;
            }
        }
    }

    fn repack(&mut self) {
        let mut write = 0;
        for read in 0..self.slots.len() {
            if let Some(tok) = self.slots[read] {
                self.slots[read] = None;
                self.slots[write] = Some(tok);
                write += 1;
            }
        }
    }

    /// One scheduling pass: cleanup, execution progress, watchdog, unit
    /// assignment, repack.
    ///
    /// `sample_occupancy` is set on the first pass of a cycle only, so the
    /// second wakeup pass does not double-count the occupancy statistics.
    pub fn schedule(
        &mut self,
        cycle: CycleCount,
        sample_occupancy: bool,
        pool: &mut TokenPool,
        deps: &mut DependencyTracker,
        table: &ClassTable,
        units: &mut [ExecUnit],
    ) -> ScheduleOutcome {
        let mut outcome = ScheduleOutcome::default();
        if sample_occupancy {
            self.occupancy_sum += self.occupied as u64;
            self.occupancy_samples += 1;
        }

        // Cleanup and execution progress.
        let mut seen = None;
        for idx in 0..self.slots.len() {
            let Some(tok) = self.slots[idx] else { continue };
            if seen == Some(tok) {
                continue;
            }
            seen = Some(tok);
            let Some(token) = pool.get_mut(tok) else {
                self.clear_token(tok);
                continue;
            };
            if token.retired {
                self.clear_token(tok);
                pool.remove(tok);
                continue;
            }
            if token.canceled {
                // Pool entry stays for the retirement buffer to reap.
                self.clear_token(tok);
                continue;
            }
            if token.update_execution(cycle) {
                continue;
            }
            if token.completed {
                deps.note_completed(token.number);
                continue;
            }
            if token.issue_cycle > 0 && cycle.saturating_sub(token.issue_cycle) > STUCK_THRESHOLD {
                warn!(
                    queue = %self.name,
                    insn = token.number,
                    class = %table.class(token.class).mnemonic,
                    waited = cycle - token.issue_cycle,
                    "watchdog canceling stuck instruction"
                );
                token.cancel();
                outcome.watchdog_canceled += 1;
                self.clear_token(tok);
            }
        }

        // Unit assignment, oldest instruction first per free unit.
        for ui in 0..self.units.len() {
            let unit_idx = self.units[ui];
            if !units[unit_idx].is_available(cycle) {
                continue;
            }
            let unit_kind = units[unit_idx].kind;
            let mut seen = None;
            for idx in 0..self.slots.len() {
                let Some(tok) = self.slots[idx] else { continue };
                if seen == Some(tok) {
                    continue;
                }
                seen = Some(tok);
                let Some(token) = pool.get_mut(tok) else { continue };
                if token.is_finished() || token.completed || token.is_executing() {
                    continue;
                }
                if token.needs_address && !token.address_generated {
                    if unit_kind == UnitKind::Agu {
                        units[unit_idx].occupy(cycle, ADDRESS_GEN_LATENCY);
                        token.start_address_generation(cycle);
                        trace!(queue = %self.name, insn = token.number, "address generation started");
                        break;
                    }
                    continue;
                }
                if token.has_load && !token.load_satisfied {
                    continue;
                }
                if let Some(dep) = token.dep {
                    if !deps.poll(dep) {
                        continue;
                    }
                }
                if token.matched_cycle == cycle {
                    continue;
                }
                token.matched_cycle = cycle;
                let class = table.class(token.class);
                if class.units.contains(unit_kind) {
                    units[unit_idx].occupy(cycle, class.occupancy);
                    token.start_execution(cycle, class);
                    trace!(
                        queue = %self.name,
                        unit = %units[unit_idx].name,
                        insn = token.number,
                        "execution started"
                    );
                    break;
                }
            }
        }

        self.repack();
        outcome
    }

    /// Removes every resident instruction on a pipeline flush, deleting the
    /// pool entries. Callers have already marked the tokens canceled.
    pub fn flush(&mut self, pool: &mut TokenPool) {
        let mut seen = None;
        for slot in &mut self.slots {
            if let Some(tok) = slot.take() {
                if seen != Some(tok) {
                    seen = Some(tok);
                    pool.remove(tok);
                }
            }
        }
        self.occupied = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::token::Token;
    use crate::isa::class::{InstructionClass, OpSizeMask, OperandKind, UnitMask};
    use crate::isa::table::ClassId;
    use pretty_assertions::assert_eq;

    fn alu_class() -> InstructionClass {
        InstructionClass::new(
            "ADD".to_owned(),
            [OperandKind::Reg, OperandKind::Reg, OperandKind::None],
            OpSizeMask::SIZE64,
            Category::GenericInt,
            UnitMask::only(UnitKind::Alu),
            1,
            0,
            1,
            1,
        )
    }

    fn fixture() -> (ClassTable, TokenPool, DependencyTracker, Vec<ExecUnit>, IssueQueue) {
        let mut table = ClassTable::new();
        table.push(alu_class());
        let units = vec![ExecUnit::new(UnitKind::Alu, "alu0".to_owned(), 0)];
        let queue = IssueQueue::new("int0".to_owned(), QueueKind::GenericInt, 8, 2, vec![0]);
        (table, TokenPool::new(), DependencyTracker::new(), units, queue)
    }

    fn dispatch_insn(
        pool: &mut TokenPool,
        queue: &mut IssueQueue,
        number: u64,
        cycle: u64,
    ) -> TokenId {
        let mut tok = Token::new(ClassId(0), number, cycle);
        tok.issue_cycle = cycle;
        let id = pool.insert(tok);
        queue
            .dispatch(id, 1, cycle)
            .unwrap_or_else(|e| panic!("dispatch failed: {e}"));
        id
    }

    #[test]
    fn test_accept_rate_limits_per_cycle_dispatch() {
        let (_, mut pool, _, _, mut queue) = fixture();
        dispatch_insn(&mut pool, &mut queue, 1, 0);
        dispatch_insn(&mut pool, &mut queue, 2, 0);
        assert!(queue.accept_quota_reached(0));
        assert!(!queue.accept_quota_reached(1));
    }

    #[test]
    fn test_single_unit_serializes_ready_instructions() {
        let (table, mut pool, mut deps, mut units, mut queue) = fixture();
        let ids: Vec<_> = (1..=3)
            .map(|n| dispatch_insn(&mut pool, &mut queue, n, 0))
            .collect();

        queue.schedule(1, true, &mut pool, &mut deps, &table, &mut units);
        assert!(pool.get(ids[0]).is_some_and(Token::is_executing));
        assert!(!pool.get(ids[1]).is_some_and(Token::is_executing));

        queue.schedule(2, true, &mut pool, &mut deps, &table, &mut units);
        assert!(pool.get(ids[0]).is_some_and(|t| t.completed));
        assert!(pool.get(ids[1]).is_some_and(Token::is_executing));
    }

    #[test]
    fn test_dependent_instruction_waits_for_completion() {
        let (table, mut pool, mut deps, mut units, mut queue) = fixture();
        let producer = dispatch_insn(&mut pool, &mut queue, 1, 0);
        let consumer = dispatch_insn(&mut pool, &mut queue, 2, 0);
        let dep = deps.create(2, &[1]).unwrap_or_else(|| panic!("record expected"));
        pool.get_mut(consumer)
            .unwrap_or_else(|| panic!("live token"))
            .dep = Some(dep);

        queue.schedule(1, true, &mut pool, &mut deps, &table, &mut units);
        // Unit taken by the producer; consumer also not ready.
        assert!(!pool.get(consumer).is_some_and(Token::is_executing));

        queue.schedule(2, true, &mut pool, &mut deps, &table, &mut units);
        // Producer completes at cycle 2, waking the consumer the same pass.
        assert!(pool.get(producer).is_some_and(|t| t.completed));
        assert!(pool.get(consumer).is_some_and(Token::is_executing));
    }

    #[test]
    fn test_retired_instructions_leave_and_slots_repack() {
        let (table, mut pool, mut deps, mut units, mut queue) = fixture();
        let a = dispatch_insn(&mut pool, &mut queue, 1, 0);
        let b = dispatch_insn(&mut pool, &mut queue, 2, 0);
        pool.get_mut(a).unwrap_or_else(|| panic!("live token")).retired = true;
        queue.schedule(1, true, &mut pool, &mut deps, &table, &mut units);
        assert!(pool.get(a).is_none());
        assert_eq!(queue.len(), 1);
        assert!(pool.get(b).is_some());
    }

    #[test]
    fn test_watchdog_cancels_stuck_instruction() {
        let (table, mut pool, mut deps, mut units, mut queue) = fixture();
        let id = dispatch_insn(&mut pool, &mut queue, 2, 1);
        let dep = deps.create(2, &[1]).unwrap_or_else(|| panic!("record expected"));
        pool.get_mut(id).unwrap_or_else(|| panic!("live token")).dep = Some(dep);

        let late = 1 + STUCK_THRESHOLD + 1;
        let outcome = queue.schedule(late, true, &mut pool, &mut deps, &table, &mut units);
        assert_eq!(outcome.watchdog_canceled, 1);
        assert!(queue.is_empty());
        // Pool entry survives for the retirement buffer to reap.
        assert!(pool.get(id).is_some_and(|t| t.canceled));
    }

    #[test]
    fn test_multi_slot_dispatch_needs_contiguous_space() {
        let (_, mut pool, _, _, mut queue) = fixture();
        for n in 1..=6 {
            dispatch_insn(&mut pool, &mut queue, n, 0);
        }
        assert!(queue.can_accept(2));
        assert!(!queue.can_accept(3));
        let wide = pool.insert(Token::new(ClassId(0), 7, 0));
        assert!(queue.dispatch(wide, 3, 0).is_err());
    }
}
