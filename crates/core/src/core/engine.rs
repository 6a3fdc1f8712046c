//! The cycle-stepped simulation driver.
//!
//! [`Simulator`] owns every pipeline structure and advances them one cycle
//! at a time in a fixed order:
//! 1. retirement buffer update (and pipeline flush on a misprediction),
//! 2. functional-unit status update,
//! 3. issue-queue scheduling, two passes so an instruction completing in an
//!    earlier queue can wake a consumer in a later one within the cycle,
//! 4. memory-queue update,
//! 5. dispatch of the pending decode group into the issue queues,
//! 6. decode of the next group out of the fetch buffer, padded into the
//!    retirement buffer,
//! 7. fetch of a new group from the sequence source.
//!
//! The order makes each structure observe the state its upstream neighbor
//! left at the end of the previous cycle, which is what keeps the model
//! cycle-accurate without an explicit two-phase clock.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::common::error::SimError;
use crate::common::{CycleCount, InsnNumber};
use crate::config::{BranchConfig, Config};
use crate::core::deps::DependencyTracker;
use crate::core::lsq::MemQueue;
use crate::core::memory::MemoryModel;
use crate::core::queue::IssueQueue;
use crate::core::rob::RetireBuffer;
use crate::core::sequence::{SequenceSource, SizeCdf, TraceRecord};
use crate::core::token::{Token, TokenId, TokenPool};
use crate::core::unit::ExecUnit;
use crate::isa::table::ClassTable;
use crate::stats::SimStats;

/// Bytes fetched per cycle from the instruction stream.
const FETCH_WINDOW_BYTES: u64 = 32;

/// Cycle interval between progress log lines.
const PROGRESS_INTERVAL: u64 = 100_000;

/// Cycle interval between convergence checks.
pub const CONVERGENCE_INTERVAL: u64 = 500_000;

/// CPI delta below which consecutive convergence checks stop the run.
pub const CONVERGENCE_TOLERANCE: f64 = 0.01;

/// The complete pipeline model.
pub struct Simulator {
    table: ClassTable,
    pool: TokenPool,
    deps: DependencyTracker,
    units: Vec<ExecUnit>,
    queues: Vec<IssueQueue>,
    lsq: MemQueue,
    rob: RetireBuffer,
    memory: MemoryModel,
    source: SequenceSource,
    rng: StdRng,

    cycle: CycleCount,
    next_number: InsnNumber,
    next_fetch_ready: CycleCount,
    fetch_buffer: VecDeque<TokenId>,
    decode_group: VecDeque<TokenId>,

    fetch_capacity: usize,
    decode_width: usize,
    insns_per_cycle: usize,
    insns_per_fetch: usize,
    branch: BranchConfig,
    isize_cdf: Option<SizeCdf>,
    fsize_cdf: Option<SizeCdf>,

    source_done: bool,
    stats: SimStats,
}

impl Simulator {
    /// Builds a simulator from a validated configuration, a loaded class
    /// table, and an instruction source.
    pub fn new(
        config: &Config,
        table: ClassTable,
        source: SequenceSource,
        seed: u64,
    ) -> Result<Self, SimError> {
        config.validate()?;
        if table.is_empty() {
            return Err(SimError::Config("instruction class table is empty".to_owned()));
        }
        let mut units = Vec::new();
        let mut queues = Vec::new();
        for (qi, qc) in config.queues.iter().enumerate() {
            let mut attached = Vec::new();
            for (ui, spec) in qc.units.iter().enumerate() {
                let kind = spec.kind();
                let name = format!("{}/{}{}", qc.name, kind.name().to_ascii_lowercase(), ui);
                attached.push(units.len());
                units.push(ExecUnit::new(kind, name, qi));
            }
            queues.push(IssueQueue::new(
                qc.name.clone(),
                qc.kind,
                qc.size,
                qc.accept_rate,
                attached,
            ));
        }
        Ok(Simulator {
            table,
            pool: TokenPool::new(),
            deps: DependencyTracker::new(),
            units,
            queues,
            lsq: MemQueue::new(config.mem_queue.slots, config.mem_queue.ops_per_cycle),
            rob: RetireBuffer::new(config.retire.slots, config.retire.per_cycle),
            memory: MemoryModel::new(config.timings.clone(), &config.rates),
            source,
            rng: StdRng::seed_from_u64(seed),
            cycle: 0,
            next_number: 1,
            next_fetch_ready: 0,
            fetch_buffer: VecDeque::new(),
            decode_group: VecDeque::new(),
            fetch_capacity: config.front_end.fetch_buffer_size,
            decode_width: config.front_end.decode_width,
            insns_per_cycle: config.front_end.instructions_per_cycle.max(1),
            insns_per_fetch: config.front_end.instructions_per_fetch.max(1),
            branch: config.branch.clone(),
            isize_cdf: None,
            fsize_cdf: None,
            source_done: false,
            stats: SimStats::default(),
        })
    }

    /// Installs an instruction-size distribution; fetch groups then pack
    /// sampled instruction sizes into the fetch window.
    pub fn set_instruction_sizes(&mut self, cdf: SizeCdf) {
        self.isize_cdf = Some(cdf);
    }

    /// Installs a fetch-group-size distribution, overriding the
    /// instruction-size packing.
    pub fn set_fetch_sizes(&mut self, cdf: SizeCdf) {
        self.fsize_cdf = Some(cdf);
    }

    /// Current cycle.
    pub fn cycle(&self) -> CycleCount {
        self.cycle
    }

    /// Run statistics so far.
    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    /// The loaded class table, with its per-class run counters.
    pub fn table(&self) -> &ClassTable {
        &self.table
    }

    /// The memory hierarchy model, for its hit counters.
    pub fn memory(&self) -> &MemoryModel {
        &self.memory
    }

    /// Number of the most recently retired instruction, if any.
    pub fn last_retired(&self) -> Option<InsnNumber> {
        self.rob.last_retired()
    }

    /// True when every pipeline structure is empty.
    pub fn is_drained(&self) -> bool {
        self.pool.is_empty()
            && self.rob.is_empty()
            && self.lsq.is_empty()
            && self.fetch_buffer.is_empty()
            && self.decode_group.is_empty()
            && self.queues.iter().all(IssueQueue::is_empty)
    }

    /// Advances one cycle. Returns false once an exhausted trace has fully
    /// drained, i.e. the run is over.
    pub fn step(&mut self) -> Result<bool, SimError> {
        self.cycle += 1;
        let cycle = self.cycle;
        self.stats.cycles = cycle;

        let outcome = self.rob.update(cycle, &mut self.pool, &mut self.deps);
        self.stats.retired += outcome.retired;
        self.stats.canceled += outcome.canceled;
        if outcome.flush {
            self.flush_pipeline(cycle);
        }

        for unit in &mut self.units {
            unit.update_status(cycle);
        }

        for pass in 0..2 {
            for queue in &mut self.queues {
                let out = queue.schedule(
                    cycle,
                    pass == 0,
                    &mut self.pool,
                    &mut self.deps,
                    &self.table,
                    &mut self.units,
                );
                self.stats.watchdog_canceled += out.watchdog_canceled;
            }
        }

        self.lsq.update(cycle, &mut self.pool, &mut self.memory, &mut self.rng);

        self.dispatch_to_queues(cycle)?;
        self.decode(cycle)?;
        self.fetch(cycle);

        Ok(!(self.source_done && self.is_drained()))
    }

    /// Runs for at most `max_cycles`, logging progress periodically.
    pub fn run(&mut self, max_cycles: u64) -> Result<(), SimError> {
        let end = self.cycle + max_cycles;
        while self.cycle < end {
            if !self.step()? {
                break;
            }
            if self.cycle % PROGRESS_INTERVAL == 0 {
                info!(cycle = self.cycle, cpi = format!("{:.4}", self.stats.cpi()), "progress");
            }
        }
        Ok(())
    }

    /// Runs until the CPI estimate moves less than [`CONVERGENCE_TOLERANCE`]
    /// between consecutive checks, or `max_cycles` elapse.
    pub fn run_to_convergence(&mut self, max_cycles: u64) -> Result<(), SimError> {
        let end = self.cycle + max_cycles;
        let mut last_cpi = f64::NAN;
        while self.cycle < end {
            if !self.step()? {
                break;
            }
            if self.cycle % PROGRESS_INTERVAL == 0 {
                info!(cycle = self.cycle, cpi = format!("{:.4}", self.stats.cpi()), "progress");
            }
            if self.cycle % CONVERGENCE_INTERVAL == 0 {
                let cpi = self.stats.cpi();
                if (cpi - last_cpi).abs() < CONVERGENCE_TOLERANCE {
                    info!(cycle = self.cycle, cpi = format!("{cpi:.4}"), "CPI converged");
                    break;
                }
                last_cpi = cpi;
            }
        }
        Ok(())
    }

    /// Stops generating new instructions and cycles until the pipeline is
    /// empty or `limit` extra cycles elapse.
    pub fn drain(&mut self, limit: u64) -> Result<(), SimError> {
        self.source_done = true;
        let end = self.cycle + limit;
        while !self.is_drained() && self.cycle < end {
            self.step()?;
        }
        Ok(())
    }

    fn flush_pipeline(&mut self, cycle: CycleCount) {
        debug!(cycle, "flushing pipeline");
        for queue in &mut self.queues {
            queue.flush(&mut self.pool);
        }
        for unit in &mut self.units {
            unit.flush();
        }
        self.lsq.flush();
        // Decode-group instructions were already squashed in the retirement
        // buffer; only their pool entries remain.
        for tok in self.decode_group.drain(..) {
            self.pool.remove(tok);
        }
        // Fetch-buffer instructions were never dispatched.
        for tok in self.fetch_buffer.drain(..) {
            if let Some(token) = self.pool.get_mut(tok) {
                let number = token.number;
                let dep = token.dep;
                self.deps.note_finished(number);
                if let Some(dep) = dep {
                    self.deps.release(dep);
                }
                self.stats.squashed_frontend += 1;
            }
            self.pool.remove(tok);
        }
        self.next_fetch_ready = cycle + self.branch.miss_penalty;
        self.stats.flushes += 1;
    }

    fn dispatch_to_queues(&mut self, cycle: CycleCount) -> Result<(), SimError> {
        while let Some(&tok) = self.decode_group.front() {
            let Some(token) = self.pool.get(tok) else {
                self.decode_group.pop_front();
                continue;
            };
            if token.is_finished() {
                self.decode_group.pop_front();
                continue;
            }
            let class = self.table.class(token.class);
            let cost = class.decode_cost as usize;
            let category = class.category;
            let (load, store, wide) = (token.has_load, token.has_store, token.wide_store);

            let candidate = self.queues.iter().position(|q| q.accepts_category(category));
            let Some(first_match) = candidate else {
                return Err(SimError::Config(format!(
                    "no issue queue accepts {} instructions",
                    category.name()
                )));
            };
            let chosen = self.queues.iter().position(|q| {
                q.accepts_category(category) && !q.accept_quota_reached(cycle) && q.can_accept(cost)
            });
            let Some(qi) = chosen else {
                self.queues[first_match].note_full_stall();
                self.stats.fetch_stalls += 1;
                break;
            };
            if !self.lsq.add(tok, load, store, wide) {
                self.stats.fetch_stalls += 1;
                break;
            }
            self.queues[qi].dispatch(tok, cost, cycle)?;
            self.decode_group.pop_front();
        }
        Ok(())
    }

    fn decode(&mut self, cycle: CycleCount) -> Result<(), SimError> {
        if !self.decode_group.is_empty() || self.fetch_buffer.is_empty() {
            return Ok(());
        }
        if self.rob.free_slots() < self.decode_width {
            self.rob.note_full_stall();
            return Ok(());
        }

        let mut taken = Vec::new();
        let mut mops = 0usize;
        while let Some(&tok) = self.fetch_buffer.front() {
            if taken.len() >= self.insns_per_cycle || taken.len() >= self.decode_width {
                break;
            }
            let Some(token) = self.pool.get(tok) else {
                self.fetch_buffer.pop_front();
                continue;
            };
            let cost = self.table.class(token.class).decode_cost as usize;
            // The vector path decodes alone; anything else packs by cost.
            if mops > 0 && (cost == 3 || mops + cost > self.decode_width) {
                break;
            }
            mops += cost;
            taken.push(tok);
            self.fetch_buffer.pop_front();
            if cost == 3 {
                break;
            }
        }
        if taken.is_empty() {
            return Ok(());
        }

        for &tok in &taken {
            if let Some(token) = self.pool.get_mut(tok) {
                token.issue_cycle = cycle;
            }
            self.rob.dispatch(tok)?;
            self.stats.dispatched += 1;
        }
        for _ in taken.len()..self.decode_width {
            self.rob.dispatch_hole()?;
        }
        self.decode_group.extend(taken);
        Ok(())
    }

    fn fetch(&mut self, cycle: CycleCount) {
        if self.source_done {
            return;
        }
        if !self.fetch_buffer.is_empty() {
            return;
        }
        if cycle < self.next_fetch_ready {
            // Gated on the instruction side (I-fetch latency or a branch
            // penalty window).
            self.stats.fetch_stalls += 1;
            return;
        }
        self.next_fetch_ready = self.memory.serve_ifetch(cycle + 1, &mut self.rng);

        let group = self.fetch_group_size().clamp(1, self.fetch_capacity);
        for _ in 0..group {
            let Some(record) = self.source.next(&mut self.rng) else {
                self.source_done = true;
                info!(generated = self.stats.generated, "instruction source exhausted");
                break;
            };
            let (tok, stop_fetch) = self.create_token(&record, cycle);
            self.fetch_buffer.push_back(tok);
            if stop_fetch {
                break;
            }
        }
    }

    fn fetch_group_size(&mut self) -> usize {
        if let Some(cdf) = &self.fsize_cdf {
            return cdf.sample(self.rng.gen()).max(1) as usize;
        }
        if let Some(cdf) = &self.isize_cdf {
            let mut bytes = 0u64;
            let mut count = 0usize;
            while bytes < FETCH_WINDOW_BYTES {
                let size = cdf.sample(self.rng.gen()).max(1);
                if count > 0 && bytes + size > FETCH_WINDOW_BYTES {
                    break;
                }
                bytes += size;
                count += 1;
            }
            return count;
        }
        self.insns_per_fetch
    }

    fn create_token(&mut self, record: &TraceRecord, cycle: CycleCount) -> (TokenId, bool) {
        let number = self.next_number;
        self.next_number += 1;

        let class = self.table.class(record.class);
        let mut token = Token::new(record.class, number, cycle);
        let (load, store) = if self.source.is_trace() {
            (record.load, record.store)
        } else {
            (
                self.rng.gen::<f64>() < class.load_prob,
                self.rng.gen::<f64>() < class.store_prob,
            )
        };
        token.set_memory_behavior(class, load, store);

        if class.is_cond_branch {
            self.stats.branches += 1;
            token.taken_branch = self.rng.gen::<f64>() < self.branch.taken_rate;
            token.mispredicted = self.rng.gen::<f64>() < self.branch.mispredict_rate;
            if token.taken_branch {
                self.stats.taken_branches += 1;
            }
            if token.mispredicted {
                self.stats.mispredicted_branches += 1;
            }
        }
        let stop_fetch = class.is_uncond_branch
            || (class.is_cond_branch && token.taken_branch && !token.mispredicted);

        let distances: Vec<InsnNumber> = if self.source.is_trace() {
            record.distances.clone()
        } else {
            (0..class.source_ops)
                .map(|i| class.use_distance(i, self.rng.gen()))
                .collect()
        };
        token.dep = self.deps.create(number, &distances);

        let class = self.table.class_mut(record.class);
        class.sim_count += 1;
        class.dep_dist_sum += distances.iter().sum::<u64>();

        self.stats.generated += 1;
        (self.pool.insert(token), stop_fetch)
    }

    /// Prints the full end-of-run report.
    pub fn print_report(&self) {
        self.stats.print();

        println!("--- issue queues ---");
        for queue in &self.queues {
            println!(
                "  {:<12} avg occupancy {:>7.2}  full stalls {:>10}",
                queue.name,
                queue.avg_occupancy(),
                queue.full_stalls()
            );
        }
        println!("  mem queue    full stalls {:>10}", self.lsq.full_stalls());
        println!("  retire buf   full stalls {:>10}", self.rob.full_stalls());

        println!("--- functional units ---");
        for unit in &self.units {
            println!(
                "  {:<20} occupied {:>12}  duty {:>6.2}%",
                unit.name,
                unit.occupied_cycles(),
                unit.duty_cycle() * 100.0
            );
        }

        let (stb, dl1, dl2, dl3, dmem) = self.memory.data_hits();
        let (ic, il2, il3, imem) = self.memory.fetch_hits();
        let (dtlb1, dtlb2, itlb1, itlb2) = self.memory.tlb_misses();
        println!("--- memory hierarchy ---");
        println!("  data:  stb {stb}  l1 {dl1}  l2 {dl2}  l3 {dl3}  mem {dmem}  stores {}", self.memory.stores());
        println!("  fetch: ic {ic}  l2 {il2}  l3 {il3}  mem {imem}");
        println!("  tlb misses: dtlb1 {dtlb1}  dtlb2 {dtlb2}  itlb1 {itlb1}  itlb2 {itlb2}");
    }

    /// Prints the static workload mix as loaded, before any simulation.
    pub fn print_static_mix(&self) {
        println!("--- static mix ---");
        for (_, class) in self.table.iter().filter(|(_, c)| c.occur_prob > 0.0) {
            println!(
                "  {:<12} {:<14} p {:>8.5}  load {:>5.3}  store {:>5.3}",
                class.mnemonic,
                class.operand_names(),
                class.occur_prob,
                class.load_prob,
                class.store_prob
            );
        }
    }

    /// Prints the per-class comparison of workload probability against the
    /// simulated stream, with the average sampled dependency distance.
    pub fn print_class_mix(&self) {
        println!("--- simulated mix ---");
        let total = self.stats.generated.max(1);
        let mut rows: Vec<_> = self
            .table
            .iter()
            .filter(|(_, c)| c.sim_count > 0)
            .map(|(_, c)| c)
            .collect();
        rows.sort_by(|a, b| b.sim_count.cmp(&a.sim_count));
        for class in rows {
            println!(
                "  {:<12} {:<14} count {:>12}  sim {:>8.5}  workload {:>8.5}  avg dep dist {:>6.2}",
                class.mnemonic,
                class.operand_names(),
                class.sim_count,
                class.sim_count as f64 / total as f64,
                class.occur_prob,
                class.avg_dep_distance()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QueueConfig, QueueKind, UnitSpec};
    use crate::core::sequence::MixCdf;
    use crate::isa::class::{
        Category, InstructionClass, OpSizeMask, OperandKind, UnitKind, UnitMask,
    };
    use crate::isa::table::ClassId;
    use pretty_assertions::assert_eq;

    fn alu_only_table() -> ClassTable {
        let mut table = ClassTable::new();
        let mut units = UnitMask::only(UnitKind::Alu);
        units.insert(UnitKind::AluMul);
        units.insert(UnitKind::AluSpecial);
        let mut class = InstructionClass::new(
            "ADD".to_owned(),
            [OperandKind::Reg, OperandKind::Reg, OperandKind::None],
            OpSizeMask::SIZE64,
            Category::GenericInt,
            units,
            1,
            0,
            1,
            1,
        );
        class.occur_prob = 1.0;
        table.push(class);
        table
    }

    fn mix_source(table: &ClassTable) -> SequenceSource {
        SequenceSource::Mix(
            MixCdf::from_table(table).unwrap_or_else(|e| panic!("bad cdf: {e}")),
        )
    }

    #[test]
    fn test_pure_alu_stream_retires_everything() {
        let table = alu_only_table();
        let source = mix_source(&table);
        let mut sim = Simulator::new(&Config::default(), table, source, 42)
            .unwrap_or_else(|e| panic!("construction failed: {e}"));
        sim.run(2_000).unwrap_or_else(|e| panic!("run failed: {e}"));
        sim.drain(500).unwrap_or_else(|e| panic!("drain failed: {e}"));

        let stats = sim.stats();
        assert!(stats.retired > 0);
        assert!(sim.is_drained());
        // Everything dispatched was either retired or canceled.
        assert_eq!(stats.dispatched, stats.retired + stats.canceled);
        // No branches in the class table, so no flush ever happened.
        assert_eq!(stats.flushes, 0);
        assert_eq!(stats.canceled, 0);
    }

    #[test]
    fn test_backlogged_fetch_buffer_is_not_a_fetch_stall() {
        let table = alu_only_table();
        let source = mix_source(&table);
        let mut config = Config::default();
        // A perfect instruction side never gates fetch, and three ALUs on a
        // deep queue keep dispatch from ever blocking, so no cycle counts as
        // a fetch stall even while the fetch buffer holds undecoded
        // instructions.
        config.rates.icache_miss_rate = 0.0;
        config.rates.itlb1_miss_rate = 0.0;
        config.queues = vec![QueueConfig {
            name: "int0".to_owned(),
            kind: QueueKind::GenericInt,
            size: 64,
            accept_rate: 3,
            units: vec![UnitSpec::Alu, UnitSpec::Alu, UnitSpec::Alu],
        }];
        let mut sim = Simulator::new(&config, table, source, 42)
            .unwrap_or_else(|e| panic!("construction failed: {e}"));
        sim.run(2_000).unwrap_or_else(|e| panic!("run failed: {e}"));

        assert!(sim.stats().retired > 0);
        assert_eq!(sim.stats().fetch_stalls, 0);
    }

    #[test]
    fn test_trace_source_ends_the_run() {
        let table = alu_only_table();
        let records = (0..10)
            .map(|_| TraceRecord {
                class: ClassId(0),
                load: false,
                store: false,
                distances: vec![1],
            })
            .collect();
        let source =
            SequenceSource::Trace(crate::core::sequence::TraceReader::new(records, false));
        let mut sim = Simulator::new(&Config::default(), table, source, 7)
            .unwrap_or_else(|e| panic!("construction failed: {e}"));

        let mut running = true;
        let mut guard = 0;
        while running {
            running = sim.step().unwrap_or_else(|e| panic!("step failed: {e}"));
            guard += 1;
            assert!(guard < 10_000, "trace run did not terminate");
        }
        assert_eq!(sim.stats().generated, 10);
        assert_eq!(sim.stats().retired, 10);
        assert!(sim.is_drained());
    }

    #[test]
    fn test_mispredicted_branches_cause_flushes() {
        let mut table = ClassTable::new();
        let mut add = InstructionClass::new(
            "ADD".to_owned(),
            [OperandKind::Reg, OperandKind::Reg, OperandKind::None],
            OpSizeMask::SIZE64,
            Category::GenericInt,
            UnitMask::only(UnitKind::Alu),
            1,
            0,
            1,
            1,
        );
        add.occur_prob = 0.8;
        table.push(add);
        let mut jcc = InstructionClass::new(
            "JCC".to_owned(),
            [OperandKind::Disp, OperandKind::None, OperandKind::None],
            OpSizeMask::SIZE64,
            Category::GenericInt,
            UnitMask::only(UnitKind::Alu),
            1,
            0,
            1,
            1,
        );
        jcc.occur_prob = 0.2;
        table.push(jcc);

        let mut config = Config::default();
        config.branch.mispredict_rate = 0.5;
        let source = mix_source(&table);
        let mut sim = Simulator::new(&config, table, source, 11)
            .unwrap_or_else(|e| panic!("construction failed: {e}"));
        sim.run(5_000).unwrap_or_else(|e| panic!("run failed: {e}"));
        sim.drain(500).unwrap_or_else(|e| panic!("drain failed: {e}"));

        let stats = sim.stats();
        assert!(stats.flushes > 0);
        assert!(stats.canceled > 0);
        assert_eq!(stats.dispatched, stats.retired + stats.canceled);
        assert!(sim.is_drained());
    }
}
