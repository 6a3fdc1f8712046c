//! Parsers for the workload input files.
//!
//! All files are whitespace-separated text with `#` comments. The formats:
//!
//! * **Definitions** (one class per expanded operand combination):
//!   `MNEMONIC operands sizes decode units base_lat mem_lat occupancy`,
//!   e.g. `ADD reg/mem,reg/imm 16/32/64 single ALU0|ALU1|ALU2 1 4 1`.
//!   Operand positions are comma-separated and `/` lists alternatives; the
//!   line expands to the Cartesian product of its alternatives.
//! * **Mix:** `MNEMONIC operands size count`, with an optional trailing
//!   `TOTAL n` line overriding the summed count.
//! * **Use distances:** `MNEMONIC operands size source distance count`.
//! * **Sizes** (instruction bytes or fetch counts): `value count`.
//! * **Trace:** `MNEMONIC operands size memflags distances`, where
//!   `memflags` is `-`, `L`, `S`, or `LS` and `distances` is a
//!   comma-separated list (or `-`).
//! * **Transitions:** `m1 .. mN -> next probability` for an order-N chain.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::common::error::SimError;
use crate::core::sequence::{MarkovModel, MixCdf, SizeCdf, TraceRecord, TraceReader};
use crate::isa::class::{
    Category, InstructionClass, OpSizeMask, OperandKind, UnitKind, UnitMask, UseDistanceCdf,
    HISTOGRAM_BUCKETS,
};
use crate::isa::table::{normalize_mnemonic, ClassId, ClassTable};

fn read_lines(path: &Path) -> Result<Vec<(usize, String)>, SimError> {
    let text = fs::read_to_string(path).map_err(|source| SimError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.split('#').next().unwrap_or("").trim().to_owned()))
        .filter(|(_, l)| !l.is_empty())
        .collect())
}

fn parse_error(path: &Path, line: usize, msg: impl Into<String>) -> SimError {
    SimError::Parse {
        file: path.display().to_string(),
        line,
        msg: msg.into(),
    }
}

/// Expands an operand field into every combination of its alternatives.
fn expand_operands(field: &str) -> Vec<[OperandKind; 3]> {
    if field == "-" || field.eq_ignore_ascii_case("none") {
        return vec![[OperandKind::None; 3]];
    }
    let positions: Vec<Vec<OperandKind>> = field
        .split(',')
        .take(3)
        .map(|pos| pos.split('/').map(OperandKind::simplify).collect())
        .collect();
    let mut combos = vec![[OperandKind::None; 3]];
    for (i, alternatives) in positions.iter().enumerate() {
        let mut next = Vec::with_capacity(combos.len() * alternatives.len());
        for combo in &combos {
            for &alt in alternatives {
                let mut c = *combo;
                c[i] = alt;
                next.push(c);
            }
        }
        combos = next;
    }
    combos.dedup();
    combos
}

/// First combination of an operand field, for files that name one shape.
fn single_operands(field: &str) -> [OperandKind; 3] {
    expand_operands(field)
        .into_iter()
        .next()
        .unwrap_or([OperandKind::None; 3])
}

fn parse_sizes(field: &str, path: &Path, line: usize) -> Result<OpSizeMask, SimError> {
    let mut mask = OpSizeMask::default();
    for part in field.split('/') {
        let bits: u32 = part
            .parse()
            .map_err(|_| parse_error(path, line, format!("bad operand size `{part}`")))?;
        mask.insert(OpSizeMask::from_bits(bits));
    }
    Ok(mask)
}

fn parse_units(field: &str, path: &Path, line: usize) -> Result<(UnitMask, Category), SimError> {
    let mut mask = UnitMask::EMPTY;
    let mut float = false;
    let mut mul = false;
    let mut special = false;
    let mut plain = false;
    for name in field.split(['|', ',']) {
        let kind = match name.to_ascii_uppercase().as_str() {
            "AGU" => UnitKind::Agu,
            "ALU" | "ALU1" => {
                plain = true;
                UnitKind::Alu
            }
            "ALU0" => {
                mul = true;
                UnitKind::AluMul
            }
            "ALU2" => {
                special = true;
                UnitKind::AluSpecial
            }
            "FADD" => {
                float = true;
                UnitKind::FAdd
            }
            "FMUL" => {
                float = true;
                UnitKind::FMul
            }
            "FSTORE" => {
                float = true;
                UnitKind::FStore
            }
            other => return Err(parse_error(path, line, format!("unknown unit `{other}`"))),
        };
        mask.insert(kind);
    }
    let category = if float {
        Category::Float
    } else if mul && !plain {
        Category::MultiplyInt
    } else if special && !plain {
        Category::SpecialInt
    } else {
        Category::GenericInt
    };
    Ok((mask, category))
}

fn parse_decode(field: &str, path: &Path, line: usize) -> Result<u8, SimError> {
    match field.to_ascii_lowercase().as_str() {
        "single" => Ok(1),
        "double" => Ok(2),
        "vector" => Ok(3),
        other => Err(parse_error(path, line, format!("unknown decode path `{other}`"))),
    }
}

fn parse_occupancy(field: &str, path: &Path, line: usize) -> Result<u64, SimError> {
    if let Some((num, den)) = field.split_once('/') {
        let num: u64 = num
            .parse()
            .map_err(|_| parse_error(path, line, format!("bad occupancy `{field}`")))?;
        let den: u64 = den
            .parse()
            .map_err(|_| parse_error(path, line, format!("bad occupancy `{field}`")))?;
        if den == 0 {
            return Err(parse_error(path, line, "zero occupancy denominator"));
        }
        Ok(num.div_ceil(den).max(1))
    } else {
        field
            .parse()
            .map_err(|_| parse_error(path, line, format!("bad occupancy `{field}`")))
    }
}

/// Loads the instruction definition file into a fresh class table.
pub fn load_definitions(path: &Path) -> Result<ClassTable, SimError> {
    let mut table = ClassTable::new();
    for (line, text) in read_lines(path)? {
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() != 8 {
            return Err(parse_error(path, line, format!("expected 8 fields, got {}", fields.len())));
        }
        let mnemonic = normalize_mnemonic(fields[0]);
        let sizes = parse_sizes(fields[2], path, line)?;
        let decode_cost = parse_decode(fields[3], path, line)?;
        let (units, category) = parse_units(fields[4], path, line)?;
        let base: u64 = fields[5]
            .parse()
            .map_err(|_| parse_error(path, line, format!("bad base latency `{}`", fields[5])))?;
        let mem: u64 = fields[6]
            .parse()
            .map_err(|_| parse_error(path, line, format!("bad memory latency `{}`", fields[6])))?;
        let occupancy = parse_occupancy(fields[7], path, line)?;
        for operands in expand_operands(fields[1]) {
            table.push(InstructionClass::new(
                mnemonic.clone(),
                operands,
                sizes,
                category,
                units,
                base,
                mem,
                occupancy,
                decode_cost,
            ));
        }
    }
    if table.is_empty() {
        return Err(parse_error(path, 0, "no instruction classes defined"));
    }
    info!(classes = table.len(), file = %path.display(), "loaded instruction definitions");
    Ok(table)
}

/// Per-class accumulation while reading a mix file.
#[derive(Default)]
struct MixAccum {
    occurs: u64,
    loads: u64,
    stores: u64,
}

fn mix_memory_behavior(mnemonic: &str, operands: [OperandKind; 3]) -> (bool, bool) {
    if mnemonic == "POP" || mnemonic == "RET" || mnemonic == "LEAVE" {
        return (true, false);
    }
    if mnemonic == "PUSH" || mnemonic == "CALL" {
        return (false, true);
    }
    let dest_mem = operands[0] == OperandKind::Mem;
    let src_mem = operands[1] == OperandKind::Mem || operands[2] == OperandKind::Mem;
    // A memory destination is written, and read as well unless it is a
    // plain move.
    let load = src_mem || (dest_mem && mnemonic != "MOV");
    (load, dest_mem)
}

/// Loads a workload mix file, filling occurrence and load/store
/// probabilities on the matched classes.
pub fn load_mix(path: &Path, table: &mut ClassTable) -> Result<(), SimError> {
    let mut accums: HashMap<ClassId, MixAccum> = HashMap::new();
    let mut summed: u64 = 0;
    let mut declared_total: Option<u64> = None;
    for (line, text) in read_lines(path)? {
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields[0].eq_ignore_ascii_case("TOTAL") {
            let total = fields
                .get(1)
                .and_then(|f| f.parse().ok())
                .ok_or_else(|| parse_error(path, line, "bad TOTAL line"))?;
            declared_total = Some(total);
            continue;
        }
        if fields.len() != 4 {
            return Err(parse_error(path, line, format!("expected 4 fields, got {}", fields.len())));
        }
        let mnemonic = normalize_mnemonic(fields[0]);
        let operands = single_operands(fields[1]);
        let size: u32 = fields[2]
            .parse()
            .map_err(|_| parse_error(path, line, format!("bad size `{}`", fields[2])))?;
        let count: u64 = fields[3]
            .parse()
            .map_err(|_| parse_error(path, line, format!("bad count `{}`", fields[3])))?;
        let Some(id) = table.lookup(&mnemonic, operands, size) else {
            return Err(SimError::ClassNotFound {
                mnemonic,
                operands: operands.iter().map(|o| o.name()).collect::<Vec<_>>().join(","),
                op_size: size,
            });
        };
        let (load, store) = mix_memory_behavior(&mnemonic, operands);
        let accum = accums.entry(id).or_default();
        accum.occurs += count;
        if load {
            accum.loads += count;
        }
        if store {
            accum.stores += count;
        }
        summed += count;
    }
    let total = declared_total.unwrap_or(summed);
    if total == 0 {
        return Err(parse_error(path, 0, "mix file holds no occurrences"));
    }
    for (id, accum) in accums {
        let class = table.class_mut(id);
        class.occurrences += accum.occurs;
        class.occur_prob = class.occurrences as f64 / total as f64;
        class.load_prob = accum.loads as f64 / accum.occurs.max(1) as f64;
        class.store_prob = accum.stores as f64 / accum.occurs.max(1) as f64;
    }
    info!(total, file = %path.display(), "loaded workload mix");
    Ok(())
}

/// Loads per-source use-distance histograms. Distance 0 counts the uses with
/// no tracked producer. Records naming unknown classes are skipped with a
/// diagnostic.
pub fn load_use_distances(path: &Path, table: &mut ClassTable) -> Result<(), SimError> {
    let mut counts: HashMap<(ClassId, usize), Vec<u64>> = HashMap::new();
    let mut skipped = 0u64;
    for (line, text) in read_lines(path)? {
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(parse_error(path, line, format!("expected 6 fields, got {}", fields.len())));
        }
        let mnemonic = normalize_mnemonic(fields[0]);
        let operands = single_operands(fields[1]);
        let size: u32 = fields[2]
            .parse()
            .map_err(|_| parse_error(path, line, format!("bad size `{}`", fields[2])))?;
        let source: usize = fields[3]
            .parse()
            .map_err(|_| parse_error(path, line, format!("bad source index `{}`", fields[3])))?;
        let distance: usize = fields[4]
            .parse()
            .map_err(|_| parse_error(path, line, format!("bad distance `{}`", fields[4])))?;
        let count: u64 = fields[5]
            .parse()
            .map_err(|_| parse_error(path, line, format!("bad count `{}`", fields[5])))?;
        let Some(id) = table.lookup(&mnemonic, operands, size) else {
            warn!(%mnemonic, line, "use-distance record for unknown class, skipping");
            skipped += 1;
            continue;
        };
        // Distance 0 records keep their mass; they sample as "no producer".
        let bucket = distance.min(HISTOGRAM_BUCKETS - 1);
        let hist = counts
            .entry((id, source))
            .or_insert_with(|| vec![0; HISTOGRAM_BUCKETS]);
        hist[bucket] += count;
    }
    for ((id, source), hist) in counts {
        let class = table.class_mut(id);
        if class.use_distances.len() <= source {
            class
                .use_distances
                .resize_with(source + 1, || UseDistanceCdf::from_counts(&[]));
        }
        class.use_distances[source] = UseDistanceCdf::from_counts(&hist);
    }
    if skipped > 0 {
        debug!(skipped, "use-distance records skipped");
    }
    Ok(())
}

/// Loads a `value count` size distribution.
pub fn load_sizes(path: &Path) -> Result<SizeCdf, SimError> {
    let mut pairs = Vec::new();
    for (line, text) in read_lines(path)? {
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() != 2 {
            return Err(parse_error(path, line, format!("expected 2 fields, got {}", fields.len())));
        }
        let value: u64 = fields[0]
            .parse()
            .map_err(|_| parse_error(path, line, format!("bad size `{}`", fields[0])))?;
        let count: u64 = fields[1]
            .parse()
            .map_err(|_| parse_error(path, line, format!("bad count `{}`", fields[1])))?;
        pairs.push((value, count));
    }
    SizeCdf::from_counts(&pairs)
}

/// Loads a recorded instruction trace. Unknown classes are fatal, since a
/// replay with holes would skew the timing it exists to reproduce.
pub fn load_trace(path: &Path, table: &ClassTable, repeat: bool) -> Result<TraceReader, SimError> {
    let mut records = Vec::new();
    for (line, text) in read_lines(path)? {
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(parse_error(path, line, format!("expected 5 fields, got {}", fields.len())));
        }
        let mnemonic = normalize_mnemonic(fields[0]);
        let operands = single_operands(fields[1]);
        let size: u32 = fields[2]
            .parse()
            .map_err(|_| parse_error(path, line, format!("bad size `{}`", fields[2])))?;
        let Some(class) = table.lookup(&mnemonic, operands, size) else {
            return Err(SimError::ClassNotFound {
                mnemonic,
                operands: operands.iter().map(|o| o.name()).collect::<Vec<_>>().join(","),
                op_size: size,
            });
        };
        let flags = fields[3].to_ascii_uppercase();
        let (load, store) = match flags.as_str() {
            "-" => (false, false),
            "L" => (true, false),
            "S" => (false, true),
            "LS" | "SL" => (true, true),
            other => return Err(parse_error(path, line, format!("bad memory flags `{other}`"))),
        };
        let distances = if fields[4] == "-" {
            Vec::new()
        } else {
            fields[4]
                .split(',')
                .map(|d| {
                    d.parse().map_err(|_| {
                        parse_error(path, line, format!("bad dependency distance `{d}`"))
                    })
                })
                .collect::<Result<Vec<u64>, SimError>>()?
        };
        records.push(TraceRecord { class, load, store, distances });
    }
    info!(records = records.len(), file = %path.display(), "loaded trace");
    Ok(TraceReader::new(records, repeat))
}

/// Loads an order-N transition file into a Markov chain.
pub fn load_transitions(
    path: &Path,
    table: &ClassTable,
    order: usize,
) -> Result<MarkovModel, SimError> {
    let mut raw: HashMap<Vec<ClassId>, Vec<(ClassId, f64)>> = HashMap::new();
    for (line, text) in read_lines(path)? {
        let fields: Vec<&str> = text.split_whitespace().collect();
        let Some(arrow) = fields.iter().position(|&f| f == "->") else {
            return Err(parse_error(path, line, "missing `->` separator"));
        };
        if arrow != order || fields.len() != order + 3 {
            return Err(parse_error(
                path,
                line,
                format!("expected {order} history mnemonics, a successor, and a probability"),
            ));
        }
        let resolve = |raw: &str| -> Result<ClassId, SimError> {
            let mnemonic = normalize_mnemonic(raw);
            table
                .lookup(&mnemonic, [OperandKind::None; 3], 64)
                .ok_or(SimError::ClassNotFound {
                    mnemonic,
                    operands: "any".to_owned(),
                    op_size: 64,
                })
        };
        let history = fields[..arrow]
            .iter()
            .map(|f| resolve(f))
            .collect::<Result<Vec<_>, _>>()?;
        let successor = resolve(fields[arrow + 1])?;
        let prob: f64 = fields[arrow + 2]
            .parse()
            .map_err(|_| parse_error(path, line, format!("bad probability `{}`", fields[arrow + 2])))?;
        raw.entry(history).or_default().push((successor, prob));
    }
    let mut transitions = HashMap::with_capacity(raw.len());
    for (history, successors) in raw {
        transitions.insert(history, MixCdf::from_entries(successors)?);
    }
    info!(histories = transitions.len(), order, file = %path.display(), "loaded transition table");
    Ok(MarkovModel::new(order, transitions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("mcsim-loader-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{name}-{}", std::process::id()));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    const DEFS: &str = "\
# mnemonic operands sizes decode units base mem occupancy
ADD   reg/mem,reg/imm 16/32/64 single ALU|ALU0|ALU2 1 4 1
MUL   reg,reg         32/64    double ALU0          3 7 2
MOVAPS reg,mem        128      vector FADD|FMUL     1 5 1
JCC   disp            64       single ALU           1 0 1
";

    #[test]
    fn test_definitions_expand_operand_combinations() {
        let path = write_temp("defs", DEFS);
        let table = load_definitions(&path).unwrap();
        // ADD expands 2x2 = 4 combos, plus MUL, MOVAPS, JCC.
        assert_eq!(table.len(), 7);
        let id = table
            .lookup("ADD", [OperandKind::Mem, OperandKind::Imm, OperandKind::None], 32)
            .unwrap();
        assert_eq!(table.class(id).mem_latency, 4);
        let mul = table
            .lookup("MUL", [OperandKind::Reg, OperandKind::Reg, OperandKind::None], 64)
            .unwrap();
        assert_eq!(table.class(mul).category, Category::MultiplyInt);
        assert_eq!(table.class(mul).decode_cost, 2);
        let mov = table
            .lookup("MOVAPS", [OperandKind::Reg, OperandKind::Mem, OperandKind::None], 128)
            .unwrap();
        assert_eq!(table.class(mov).category, Category::Float);
        assert!(table.class(mov).is_wide());
    }

    #[test]
    fn test_mix_fills_probabilities() {
        let defs = write_temp("defs2", DEFS);
        let mut table = load_definitions(&defs).unwrap();
        let mix = write_temp(
            "mix",
            "\
ADD reg,reg 64 60
ADD mem,reg 64 20
JNE disp 64 20
TOTAL 100
",
        );
        load_mix(&mix, &mut table).unwrap();
        let add = table
            .lookup("ADD", [OperandKind::Reg, OperandKind::Reg, OperandKind::None], 64)
            .unwrap();
        assert!((table.class(add).occur_prob - 0.6).abs() < 1e-12);
        let add_mem = table
            .lookup("ADD", [OperandKind::Mem, OperandKind::Reg, OperandKind::None], 64)
            .unwrap();
        // Memory destination on a non-MOV: read and written.
        assert!((table.class(add_mem).load_prob - 1.0).abs() < 1e-12);
        assert!((table.class(add_mem).store_prob - 1.0).abs() < 1e-12);
        // JNE normalizes onto JCC.
        let jcc = table
            .lookup("JCC", [OperandKind::Disp, OperandKind::None, OperandKind::None], 64)
            .unwrap();
        assert!((table.class(jcc).occur_prob - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_mix_unknown_mnemonic_is_fatal() {
        let defs = write_temp("defs3", DEFS);
        let mut table = load_definitions(&defs).unwrap();
        let mix = write_temp("badmix", "FNORD reg,reg 64 10\n");
        assert!(matches!(
            load_mix(&mix, &mut table),
            Err(SimError::ClassNotFound { .. })
        ));
    }

    #[test]
    fn test_use_distances_build_cdfs_and_skip_unknown() {
        let defs = write_temp("defs4", DEFS);
        let mut table = load_definitions(&defs).unwrap();
        let dist = write_temp(
            "dist",
            "\
ADD reg,reg 64 0 1 75
ADD reg,reg 64 0 3 25
FNORD reg,reg 64 0 1 10
",
        );
        load_use_distances(&dist, &mut table).unwrap();
        let add = table
            .lookup("ADD", [OperandKind::Reg, OperandKind::Reg, OperandKind::None], 64)
            .unwrap();
        assert_eq!(table.class(add).use_distance(0, 0.5), 1);
        assert_eq!(table.class(add).use_distance(0, 0.9), 3);
    }

    #[test]
    fn test_use_distance_zero_records_keep_their_mass() {
        let defs = write_temp("defs4b", DEFS);
        let mut table = load_definitions(&defs).unwrap();
        let dist = write_temp(
            "dist0",
            "\
ADD reg,reg 64 0 0 60
ADD reg,reg 64 0 2 40
",
        );
        load_use_distances(&dist, &mut table).unwrap();
        let add = table
            .lookup("ADD", [OperandKind::Reg, OperandKind::Reg, OperandKind::None], 64)
            .unwrap();
        // 60% of samples carry no producer at all, the rest sit at distance 2.
        assert_eq!(table.class(add).use_distance(0, 0.5), 0);
        assert_eq!(table.class(add).use_distance(0, 0.7), 2);
    }

    #[test]
    fn test_trace_parses_flags_and_distances() {
        let defs = write_temp("defs5", DEFS);
        let table = load_definitions(&defs).unwrap();
        let trace = write_temp(
            "trace",
            "\
ADD reg,mem 64 L 1,3
MUL reg,reg 64 - -
",
        );
        let mut reader = load_trace(&trace, &table, false).unwrap();
        let first = reader.next_record().unwrap();
        assert!(first.load);
        assert!(!first.store);
        assert_eq!(first.distances, vec![1, 3]);
        let second = reader.next_record().unwrap();
        assert!(second.distances.is_empty());
        assert!(reader.next_record().is_none());
    }

    #[test]
    fn test_transitions_build_an_order_two_chain() {
        let defs = write_temp("defs6", DEFS);
        let table = load_definitions(&defs).unwrap();
        let trans = write_temp(
            "trans",
            "\
ADD ADD -> MUL 0.5
ADD ADD -> ADD 0.5
",
        );
        let chain = load_transitions(&trans, &table, 2).unwrap();
        assert_eq!(chain.order(), 2);
    }

    #[test]
    fn test_malformed_lines_report_position() {
        let path = write_temp("baddefs", "ADD reg,reg 64 single ALU 1\n");
        match load_definitions(&path) {
            Err(SimError::Parse { line, .. }) => assert_eq!(line, 1),
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
