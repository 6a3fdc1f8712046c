//! Command-line front end for the Monte-Carlo core simulator.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mcsim_core::common::error::SimError;
use mcsim_core::config::Config;
use mcsim_core::core::engine::Simulator;
use mcsim_core::core::sequence::{MixCdf, SequenceSource};
use mcsim_core::sim::loader;

/// Monte-Carlo out-of-order core simulator.
///
/// Draws a synthetic instruction stream from workload statistics and
/// estimates CPI from a cycle-stepped pipeline model.
#[derive(Debug, Parser)]
#[command(name = "mcsim", version, about)]
struct Args {
    /// Instruction definition file.
    #[arg(long, value_name = "FILE")]
    defs: PathBuf,

    /// Workload instruction-mix file.
    #[arg(long, value_name = "FILE")]
    mix: PathBuf,

    /// Per-source use-distance histogram file.
    #[arg(long, value_name = "FILE")]
    distances: Option<PathBuf>,

    /// JSON configuration file; defaults model a three-wide core.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Replay this trace instead of sampling the mix.
    #[arg(long, value_name = "FILE", conflicts_with = "markov")]
    trace: Option<PathBuf>,

    /// Loop the trace instead of stopping at its end.
    #[arg(long, requires = "trace")]
    repeat_trace: bool,

    /// Generate from this Markov transition file instead of plain sampling.
    #[arg(long, value_name = "FILE")]
    markov: Option<PathBuf>,

    /// History length of the Markov chain.
    #[arg(long, default_value_t = 3, value_name = "N")]
    markov_order: usize,

    /// Instruction-size distribution for fetch-window packing.
    #[arg(long, value_name = "FILE")]
    isize_file: Option<PathBuf>,

    /// Fetch-group-size distribution; overrides --isize-file.
    #[arg(long, value_name = "FILE")]
    fsize_file: Option<PathBuf>,

    /// Print the static workload mix after loading.
    #[arg(long)]
    simix: bool,

    /// Print the per-class simulated mix in the final report.
    #[arg(long)]
    imix: bool,

    /// Cycles to simulate.
    #[arg(long, default_value_t = 10_000_000, value_name = "CYCLES")]
    cycles: u64,

    /// Stop early once the CPI estimate converges.
    #[arg(long)]
    converge: bool,

    /// Seed for the random number generator.
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn build(args: &Args) -> Result<Simulator, SimError> {
    let config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|source| SimError::Io {
                path: path.display().to_string(),
                source,
            })?;
            Config::from_json(&text)?
        }
        None => Config::default(),
    };

    let mut table = loader::load_definitions(&args.defs)?;
    loader::load_mix(&args.mix, &mut table)?;
    if let Some(path) = &args.distances {
        loader::load_use_distances(path, &mut table)?;
    }

    let source = if let Some(path) = &args.trace {
        SequenceSource::Trace(loader::load_trace(path, &table, args.repeat_trace)?)
    } else {
        let mix = MixCdf::from_table(&table)?;
        match &args.markov {
            Some(path) => SequenceSource::Markov {
                chain: loader::load_transitions(path, &table, args.markov_order)?,
                mix,
            },
            None => SequenceSource::Mix(mix),
        }
    };

    let mut sim = Simulator::new(&config, table, source, args.seed)?;
    if let Some(path) = &args.fsize_file {
        sim.set_fetch_sizes(loader::load_sizes(path)?);
    } else if let Some(path) = &args.isize_file {
        sim.set_instruction_sizes(loader::load_sizes(path)?);
    }
    Ok(sim)
}

fn run(args: &Args) -> Result<(), SimError> {
    let mut sim = build(args)?;
    if args.simix {
        sim.print_static_mix();
    }
    info!(cycles = args.cycles, seed = args.seed, "starting simulation");
    if args.converge {
        sim.run_to_convergence(args.cycles)?;
    } else {
        sim.run(args.cycles)?;
    }
    info!(
        cycles = sim.cycle(),
        retired = sim.stats().retired,
        cpi = format!("{:.4}", sim.stats().cpi()),
        "simulation finished"
    );
    sim.print_report();
    if args.imix {
        sim.print_class_mix();
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
