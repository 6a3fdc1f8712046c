//! Dynamic instruction state.
//!
//! A [`Token`] is one synthetic dynamic instruction flowing through the
//! pipeline model. It carries no program semantics, only the lifecycle state
//! the timing model needs: its class, instruction number, memory-behavior
//! flags, execution window, and terminal flags.
//!
//! Tokens live in the [`TokenPool`] arena and every structure that holds an
//! instruction (fetch buffer, issue queues, memory queue, retirement buffer)
//! stores [`TokenId`] handles. The issue queue that executes a token is the
//! sole deleter; everything else only marks state on it.

use crate::common::{CycleCount, InsnNumber};
use crate::core::deps::DepId;
use crate::isa::class::InstructionClass;
use crate::isa::table::ClassId;

/// Cycles an address-generation step occupies its unit.
pub const ADDRESS_GEN_LATENCY: u64 = 1;

/// Handle into the [`TokenPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenId(pub usize);

/// One in-flight dynamic instruction.
#[derive(Debug, Clone)]
pub struct Token {
    /// Instruction class index.
    pub class: ClassId,
    /// Global dynamic-instruction number, 1-based.
    pub number: InsnNumber,
    /// Cycle the token was generated.
    pub created_cycle: CycleCount,
    /// Cycle the token was dispatched into the retirement buffer; also the
    /// line tag checked at retirement. Zero until dispatch.
    pub issue_cycle: CycleCount,
    /// Dependency record, if the token has tracked source operands.
    pub dep: Option<DepId>,

    /// This dynamic instance performs a load.
    pub has_load: bool,
    /// This dynamic instance performs a store.
    pub has_store: bool,
    /// The store side is 128 bits wide (two memory-queue slots).
    pub wide_store: bool,
    /// The token needs an address-generation step before executing.
    pub needs_address: bool,
    /// The address-generation step has finished (or was never needed).
    pub address_generated: bool,
    /// The load side has been satisfied by the memory model.
    pub load_satisfied: bool,
    /// A conditional branch resolved as taken.
    pub taken_branch: bool,
    /// A conditional branch resolved as mispredicted.
    pub mispredicted: bool,

    exec_start: CycleCount,
    exec_end: CycleCount,
    agu_step: bool,
    /// Cycle a unit-compatibility match was last attempted; a scheduler pass
    /// tries at most one unit per instruction per cycle.
    pub matched_cycle: CycleCount,

    /// Execution finished.
    pub completed: bool,
    /// Retired in order.
    pub retired: bool,
    /// Squashed by a flush or the stuck-instruction watchdog.
    pub canceled: bool,
}

impl Token {
    /// Creates a token for `class` with all memory flags cleared.
    pub fn new(class: ClassId, number: InsnNumber, cycle: CycleCount) -> Self {
        Token {
            class,
            number,
            created_cycle: cycle,
            issue_cycle: 0,
            dep: None,
            has_load: false,
            has_store: false,
            wide_store: false,
            needs_address: false,
            address_generated: true,
            load_satisfied: false,
            taken_branch: false,
            mispredicted: false,
            exec_start: 0,
            exec_end: 0,
            agu_step: false,
            matched_cycle: 0,
            completed: false,
            retired: false,
            canceled: false,
        }
    }

    /// Applies memory behavior after the load/store decision.
    ///
    /// Stack operations generate their address implicitly and floating-point
    /// memory operands are assumed address-ready at creation, so only the
    /// remaining integer memory references need an explicit AGU step.
    pub fn set_memory_behavior(&mut self, class: &InstructionClass, load: bool, store: bool) {
        self.has_load = load;
        self.has_store = store;
        self.wide_store = store && class.is_wide();
        let explicit_address = (load || store)
            && !class.is_stack_op
            && !matches!(class.category, crate::isa::class::Category::Float);
        self.needs_address = explicit_address;
        self.address_generated = !explicit_address;
    }

    /// True while an execution or address-generation window is open.
    pub fn is_executing(&self) -> bool {
        self.exec_end != 0
    }

    /// True when the token no longer occupies pipeline resources.
    pub fn is_finished(&self) -> bool {
        self.retired || self.canceled
    }

    /// Opens an address-generation window ending after [`ADDRESS_GEN_LATENCY`].
    pub fn start_address_generation(&mut self, cycle: CycleCount) {
        self.exec_start = cycle;
        self.exec_end = cycle + ADDRESS_GEN_LATENCY - 1;
        self.agu_step = true;
    }

    /// Opens the execution window for the full operation latency.
    pub fn start_execution(&mut self, cycle: CycleCount, class: &InstructionClass) {
        let latency = class.latency(self.has_load || self.has_store);
        self.exec_start = cycle;
        self.exec_end = cycle + latency - 1;
        self.agu_step = false;
    }

    /// Advances the execution window at `cycle`.
    ///
    /// When an address-generation window closes the token returns to the
    /// waiting state with its address marked generated; when an execution
    /// window closes the token becomes completed. Returns true while a
    /// window is still open.
    pub fn update_execution(&mut self, cycle: CycleCount) -> bool {
        if self.exec_end == 0 {
            return false;
        }
        if cycle <= self.exec_end {
            return true;
        }
        if self.agu_step {
            self.address_generated = true;
            self.agu_step = false;
            self.exec_start = 0;
            self.exec_end = 0;
            false
        } else {
            self.completed = true;
            self.exec_start = 0;
            self.exec_end = 0;
            false
        }
    }

    /// Marks the token canceled and closes any open window.
    pub fn cancel(&mut self) {
        self.canceled = true;
        self.exec_start = 0;
        self.exec_end = 0;
        self.agu_step = false;
    }
}

/// Arena of in-flight tokens with stable ids and O(1) reuse.
#[derive(Debug, Default)]
pub struct TokenPool {
    slots: Vec<Option<Token>>,
    free: Vec<usize>,
}

impl TokenPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        TokenPool::default()
    }

    /// Number of live tokens.
    pub fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// True when no token is in flight.
    pub fn is_empty(&self) -> bool {
        self.live() == 0
    }

    /// Inserts a token and returns its handle.
    pub fn insert(&mut self, token: Token) -> TokenId {
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(token);
            TokenId(idx)
        } else {
            self.slots.push(Some(token));
            TokenId(self.slots.len() - 1)
        }
    }

    /// Looks up a live token. `None` for stale handles.
    pub fn get(&self, id: TokenId) -> Option<&Token> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    /// Mutable lookup. `None` for stale handles.
    pub fn get_mut(&mut self, id: TokenId) -> Option<&mut Token> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Removes a token, returning it if it was live.
    pub fn remove(&mut self, id: TokenId) -> Option<Token> {
        let token = self.slots.get_mut(id.0).and_then(Option::take);
        if token.is_some() {
            self.free.push(id.0);
        }
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::class::{Category, InstructionClass, OpSizeMask, OperandKind, UnitKind, UnitMask};
    use pretty_assertions::assert_eq;

    fn int_class() -> InstructionClass {
        InstructionClass::new(
            "ADD".to_owned(),
            [OperandKind::Reg, OperandKind::Mem, OperandKind::None],
            OpSizeMask::SIZE64,
            Category::GenericInt,
            UnitMask::only(UnitKind::Alu),
            1,
            4,
            1,
            1,
        )
    }

    #[test]
    fn test_address_generation_window_round_trip() {
        let mut tok = Token::new(ClassId(0), 1, 0);
        tok.set_memory_behavior(&int_class(), true, false);
        assert!(tok.needs_address);
        assert!(!tok.address_generated);

        tok.start_address_generation(5);
        assert!(tok.update_execution(5));
        assert!(!tok.update_execution(6));
        assert!(tok.address_generated);
        assert!(!tok.completed);
    }

    #[test]
    fn test_execution_window_completes_with_memory_latency() {
        let class = int_class();
        let mut tok = Token::new(ClassId(0), 1, 0);
        tok.set_memory_behavior(&class, true, false);
        tok.start_execution(10, &class);
        // mem latency 4: busy cycles 10..=13.
        assert!(tok.update_execution(13));
        assert!(!tok.update_execution(14));
        assert!(tok.completed);
    }

    #[test]
    fn test_stack_op_skips_address_generation() {
        let mut class = int_class();
        class.mnemonic = "PUSH".to_owned();
        class.is_stack_op = true;
        let mut tok = Token::new(ClassId(0), 1, 0);
        tok.set_memory_behavior(&class, false, true);
        assert!(!tok.needs_address);
        assert!(tok.address_generated);
    }

    #[test]
    fn test_float_memory_operand_is_address_ready() {
        let mut class = int_class();
        class.category = Category::Float;
        let mut tok = Token::new(ClassId(0), 1, 0);
        tok.set_memory_behavior(&class, true, false);
        assert!(tok.address_generated);
    }

    #[test]
    fn test_pool_reuses_freed_slots() {
        let mut pool = TokenPool::new();
        let a = pool.insert(Token::new(ClassId(0), 1, 0));
        let b = pool.insert(Token::new(ClassId(0), 2, 0));
        assert_eq!(pool.live(), 2);
        pool.remove(a);
        let c = pool.insert(Token::new(ClassId(0), 3, 0));
        assert_eq!(c, a);
        assert_eq!(pool.live(), 2);
        assert!(pool.get(b).is_some());
        // Stale handle after removal.
        pool.remove(b);
        assert!(pool.get(b).is_none());
    }
}
