//! Memory access queue.
//!
//! Every load and store leg of an in-flight instruction holds a slot from
//! dispatch until the memory model satisfies it. It provides:
//! 1. **Admission:** an instruction enters only if all of its legs fit at
//!    once; a 128-bit store leg takes two slots.
//! 2. **Service:** up to a configured number of operations per cycle. Stores
//!    are served strictly in slot order and the first store without a
//!    generated address blocks every younger store; loads are served out of
//!    order as the remaining budget allows. A wide store consumes two units
//!    of the per-cycle budget.
//! 3. **Delivery:** a load slot whose arrival cycle has passed marks its
//!    instruction load-satisfied and frees the slot; store slots free at
//!    service time, since stores complete into the store buffer.

use tracing::trace;

use crate::common::CycleCount;
use crate::core::memory::MemoryModel;
use crate::core::token::{TokenId, TokenPool};
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegKind {
    Load,
    Store { wide: bool },
}

#[derive(Debug, Clone, Copy)]
struct Leg {
    token: TokenId,
    kind: LegKind,
    /// 0 = unserved; otherwise the cycle a load's data arrives.
    arrival: CycleCount,
}

/// Fixed-capacity load/store queue.
#[derive(Debug)]
pub struct MemQueue {
    slots: Vec<Option<Leg>>,
    occupied: usize,
    ops_per_cycle: u64,
    full_stalls: u64,
}

impl MemQueue {
    /// Creates an empty queue with `slots` leg slots.
    pub fn new(slots: usize, ops_per_cycle: u64) -> Self {
        MemQueue {
            slots: vec![None; slots],
            occupied: 0,
            ops_per_cycle: ops_per_cycle.max(1),
            full_stalls: 0,
        }
    }

    /// Occupied slots, counting both slots of a wide store.
    pub fn len(&self) -> usize {
        self.occupied
    }

    /// True when no leg is pending.
    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    /// Admission failures recorded.
    pub fn full_stalls(&self) -> u64 {
        self.full_stalls
    }

    /// Slots an instruction with these legs needs.
    pub fn slots_needed(load: bool, store: bool, wide_store: bool) -> usize {
        usize::from(load) + if store { if wide_store { 2 } else { 1 } } else { 0 }
    }

    /// Admits every memory leg of `token` at once, or none.
    ///
    /// Returns false (and records a full stall) when fewer free slots remain
    /// than the instruction needs.
    pub fn add(&mut self, token: TokenId, load: bool, store: bool, wide_store: bool) -> bool {
        let needed = Self::slots_needed(load, store, wide_store);
        if needed == 0 {
            return true;
        }
        if self.slots.len() - self.occupied < needed {
            self.full_stalls += 1;
            return false;
        }
        if load {
            self.place(Leg { token, kind: LegKind::Load, arrival: 0 });
        }
        if store {
            let leg = Leg { token, kind: LegKind::Store { wide: wide_store }, arrival: 0 };
            self.place(leg);
            if wide_store {
                self.place(leg);
            }
        }
        true
    }

    fn place(&mut self, leg: Leg) {
        for slot in &mut self.slots {
            if slot.is_none() {
                *slot = Some(leg);
                self.occupied += 1;
                return;
            }
        }
    }

    fn release(&mut self, idx: usize) {
        if self.slots[idx].take().is_some() {
            self.occupied -= 1;
        }
    }

    /// One queue update: release squashed legs, deliver arrivals, serve new
    /// operations within the per-cycle budget, repack.
    pub fn update<R: Rng>(
        &mut self,
        cycle: CycleCount,
        pool: &mut TokenPool,
        memory: &mut MemoryModel,
        rng: &mut R,
    ) {
        // Release and deliver.
        for idx in 0..self.slots.len() {
            let Some(leg) = self.slots[idx] else { continue };
            if pool.get(leg.token).is_some_and(|t| t.canceled) {
                self.release(idx);
                continue;
            }
            if leg.kind == LegKind::Load && leg.arrival != 0 && leg.arrival <= cycle {
                if let Some(token) = pool.get_mut(leg.token) {
                    token.load_satisfied = true;
                    trace!(insn = token.number, "load satisfied");
                }
                self.release(idx);
            }
        }

        // Serve. Stores first, in order; the first address-pending store
        // blocks the rest. Loads fill whatever budget remains.
        let mut budget = self.ops_per_cycle;
        for idx in 0..self.slots.len() {
            if budget == 0 {
                break;
            }
            let Some(leg) = self.slots[idx] else { continue };
            let LegKind::Store { wide } = leg.kind else { continue };
            // A retired instruction's address was necessarily generated.
            let ready = pool.get(leg.token).map_or(true, |t| t.address_generated);
            if !ready {
                break;
            }
            let cost = if wide { 2 } else { 1 };
            if budget < cost {
                break;
            }
            let _ = memory.serve_store(cycle, rng);
            budget -= cost;
            self.release(idx);
            if wide {
                if let Some(twin) = self.twin_of(idx, leg.token) {
                    self.release(twin);
                }
            }
        }
        for idx in 0..self.slots.len() {
            if budget == 0 {
                break;
            }
            let Some(leg) = self.slots[idx] else { continue };
            if leg.kind != LegKind::Load || leg.arrival != 0 {
                continue;
            }
            let ready = pool.get(leg.token).map_or(true, |t| t.address_generated);
            if !ready {
                continue;
            }
            let arrival = memory.serve_load(cycle, rng).max(cycle + 1);
            if let Some(slot) = self.slots[idx].as_mut() {
                slot.arrival = arrival;
            }
            budget -= 1;
        }

        self.repack();
    }

    fn twin_of(&self, idx: usize, token: TokenId) -> Option<usize> {
        self.slots.iter().enumerate().position(|(i, s)| {
            i != idx
                && s.is_some_and(|l| l.token == token && matches!(l.kind, LegKind::Store { .. }))
        })
    }

    fn repack(&mut self) {
        let mut write = 0;
        for read in 0..self.slots.len() {
            if let Some(leg) = self.slots[read].take() {
                self.slots[write] = Some(leg);
                write += 1;
            }
        }
    }

    /// Drops every pending leg on a pipeline flush.
    pub fn flush(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.occupied = 0;
    }
}
