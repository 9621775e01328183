//! Command-line front end for the memory-hierarchy simulator.
//!
//! Parses a trace path plus warmup/measured instruction counts and an
//! optional JSON config file, runs the simulator to completion, and prints
//! the requested statistics sections. Exits 0 on a clean run, 1 on any
//! [`memsim_core::SimError`].

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use memsim_core::config::{self, Config};
use memsim_core::trace::TraceFormat;
use memsim_core::Simulator;

/// Binary trace schema, named explicitly when a trace's filename doesn't
/// hint at its format (see [`TraceFormat::sniff`]).
#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Champsim,
    Memsim,
}

impl From<Format> for TraceFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::Champsim => TraceFormat::Champsim,
            Format::Memsim => TraceFormat::Memsim,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "memsim",
    author,
    version,
    about = "Trace-driven, cycle-accurate simulator of a multi-core CPU memory hierarchy"
)]
struct Cli {
    /// Trace file to replay (optionally `.gz`/`.xz` compressed).
    trace: PathBuf,

    /// Instructions executed before statistics collection begins.
    #[arg(short, long)]
    warmup: Option<u64>,

    /// Instructions executed (after warmup) whose statistics are reported.
    #[arg(short = 's', long = "sim")]
    measured: Option<u64>,

    /// JSON configuration file; unset fields fall back to built-in defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Trace format, when the filename doesn't hint at it.
    #[arg(long)]
    format: Option<Format>,

    /// Comma-separated statistics sections to print (summary,core,cache,dram).
    #[arg(long, value_delimiter = ',')]
    sections: Vec<String>,

    /// Increase log verbosity (can be repeated). Overridden by `RUST_LOG`.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_config(cli: &Cli) -> Result<Config, memsim_core::SimError> {
    let mut cfg = match &cli.config {
        Some(path) => config::load(path)?,
        None => Config::default(),
    };
    if let Some(w) = cli.warmup {
        cfg.general.warmup_instructions = w;
    }
    if let Some(s) = cli.measured {
        cfg.general.measured_instructions = s;
    }
    Ok(cfg)
}

fn run(cli: Cli) -> Result<(), memsim_core::SimError> {
    let config = build_config(&cli)?;
    let format = cli.format.map(TraceFormat::from);
    let sim = Simulator::new(config, &cli.trace, format)?;
    let stats = sim.run()?;
    stats.print_sections(&cli.sections);
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "simulation aborted");
            ExitCode::FAILURE
        }
    }
}
