//! End-to-end pipeline behavior across the whole simulator.

use mcsim_core::config::{Config, QueueConfig, QueueKind, UnitSpec};
use mcsim_core::core::engine::Simulator;
use mcsim_core::core::sequence::{MixCdf, SequenceSource, TraceReader, TraceRecord};
use mcsim_core::isa::class::{
    Category, InstructionClass, OpSizeMask, OperandKind, UnitKind, UnitMask,
};
use mcsim_core::isa::table::{ClassId, ClassTable};
use proptest::prelude::*;

fn class(
    mnemonic: &str,
    operands: [OperandKind; 3],
    category: Category,
    units: UnitMask,
    prob: f64,
) -> InstructionClass {
    let mut c = InstructionClass::new(
        mnemonic.to_owned(),
        operands,
        OpSizeMask::SIZE64,
        category,
        units,
        1,
        4,
        1,
        1,
    );
    c.occur_prob = prob;
    c
}

fn workload_table() -> ClassTable {
    let mut table = ClassTable::new();
    let mut alu = UnitMask::only(UnitKind::Alu);
    alu.insert(UnitKind::AluMul);
    alu.insert(UnitKind::AluSpecial);
    table.push(class(
        "ADD",
        [OperandKind::Reg, OperandKind::Reg, OperandKind::None],
        Category::GenericInt,
        alu,
        0.55,
    ));
    let mut load = class(
        "MOV",
        [OperandKind::Reg, OperandKind::Mem, OperandKind::None],
        Category::GenericInt,
        alu,
        0.2,
    );
    load.load_prob = 1.0;
    table.push(load);
    let mut store = class(
        "MOVST",
        [OperandKind::Mem, OperandKind::Reg, OperandKind::None],
        Category::GenericInt,
        alu,
        0.1,
    );
    store.store_prob = 1.0;
    table.push(store);
    table.push(class(
        "MUL",
        [OperandKind::Reg, OperandKind::Reg, OperandKind::None],
        Category::MultiplyInt,
        UnitMask::only(UnitKind::AluMul),
        0.05,
    ));
    table.push(class(
        "JCC",
        [OperandKind::Disp, OperandKind::None, OperandKind::None],
        Category::GenericInt,
        alu,
        0.1,
    ));
    table
}

fn mix_source(table: &ClassTable) -> SequenceSource {
    SequenceSource::Mix(MixCdf::from_table(table).expect("valid mix"))
}

#[test]
fn accept_rate_and_single_unit_serialize_a_burst() {
    // One narrow queue: two accepts per cycle, one ALU.
    let mut config = Config::default();
    config.queues = vec![QueueConfig {
        name: "int0".to_owned(),
        kind: QueueKind::GenericInt,
        size: 8,
        accept_rate: 2,
        units: vec![UnitSpec::Alu, UnitSpec::Agu],
    }];

    let mut table = ClassTable::new();
    table.push(class(
        "ADD",
        [OperandKind::Imm, OperandKind::None, OperandKind::None],
        Category::GenericInt,
        UnitMask::only(UnitKind::Alu),
        1.0,
    ));
    let records = (0..3)
        .map(|_| TraceRecord {
            class: ClassId(0),
            load: false,
            store: false,
            distances: Vec::new(),
        })
        .collect();
    let source = SequenceSource::Trace(TraceReader::new(records, false));

    let mut sim = Simulator::new(&config, table, source, 1).expect("construction");
    let mut guard = 0;
    while sim.step().expect("step") {
        guard += 1;
        assert!(guard < 1_000, "burst did not drain");
    }
    let stats = sim.stats();
    assert_eq!(stats.generated, 3);
    assert_eq!(stats.retired, 3);
    assert_eq!(stats.canceled, 0);
    assert!(sim.is_drained());
}

#[test]
fn mispredict_flush_leaves_no_residue() {
    let mut config = Config::default();
    config.branch.mispredict_rate = 0.3;
    config.branch.taken_rate = 0.5;

    let table = workload_table();
    let source = mix_source(&table);
    let mut sim = Simulator::new(&config, table, source, 99).expect("construction");
    sim.run(20_000).expect("run");
    sim.drain(2_000).expect("drain");

    let stats = sim.stats();
    assert!(stats.flushes > 0, "workload never flushed");
    assert!(sim.is_drained(), "pipeline kept residue after drain");
    assert_eq!(stats.dispatched, stats.retired + stats.canceled);
    // Every generated instruction is accounted for somewhere.
    assert_eq!(
        stats.generated,
        stats.dispatched + stats.squashed_frontend
    );
}

#[test]
fn retirement_follows_dispatch_order() {
    let mut config = Config::default();
    config.branch.mispredict_rate = 0.3;
    config.branch.taken_rate = 0.5;

    let table = workload_table();
    let source = mix_source(&table);
    let mut sim = Simulator::new(&config, table, source, 17).expect("construction");

    // Retirement numbers observed step by step never go backwards, flushes
    // included.
    let mut last = None;
    for _ in 0..20_000 {
        sim.step().expect("step");
        let seen = sim.last_retired();
        if let (Some(prev), Some(now)) = (last, seen) {
            assert!(now >= prev, "instruction {now} retired after {prev}");
        }
        if seen.is_some() {
            last = seen;
        }
    }
    assert!(sim.stats().flushes > 0, "workload never flushed");
    assert!(last.is_some(), "nothing retired");
}

#[test]
fn memory_traffic_reaches_the_hierarchy() {
    let table = workload_table();
    let source = mix_source(&table);
    let mut sim = Simulator::new(&Config::default(), table, source, 5).expect("construction");
    sim.run(20_000).expect("run");
    sim.drain(2_000).expect("drain");

    let (stb, l1, l2, l3, mem) = sim.memory().data_hits();
    assert!(stb + l1 + l2 + l3 + mem > 0, "loads never reached the memory model");
    assert!(sim.memory().stores() > 0, "stores never reached the memory model");
    let (ic, il2, il3, imem) = sim.memory().fetch_hits();
    assert!(ic + il2 + il3 + imem > 0, "fetch never touched the memory model");
}

#[test]
fn per_class_counts_match_the_generated_total() {
    let table = workload_table();
    let source = mix_source(&table);
    let mut sim = Simulator::new(&Config::default(), table, source, 21).expect("construction");
    sim.run(10_000).expect("run");

    let total: u64 = sim.table().iter().map(|(_, c)| c.sim_count).sum();
    assert_eq!(total, sim.stats().generated);
    // The dominant class should dominate the generated stream too.
    let (_, add) = sim
        .table()
        .iter()
        .find(|(_, c)| c.mnemonic == "ADD")
        .expect("ADD class");
    assert!(add.sim_count * 2 > sim.stats().generated);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Whatever the seed and run length, draining accounts for every
    /// dispatched instruction as retired or canceled.
    #[test]
    fn conservation_after_drain(seed in 0u64..1_000, cycles in 500u64..5_000) {
        let mut config = Config::default();
        config.branch.mispredict_rate = 0.1;
        let table = workload_table();
        let source = mix_source(&table);
        let mut sim = Simulator::new(&config, table, source, seed).expect("construction");
        sim.run(cycles).expect("run");
        sim.drain(5_000).expect("drain");

        let stats = sim.stats();
        prop_assert!(sim.is_drained());
        prop_assert_eq!(stats.dispatched, stats.retired + stats.canceled);
        prop_assert_eq!(stats.generated, stats.dispatched + stats.squashed_frontend);
    }
}
