//! `oosim` — run the timing simulator over a recorded instruction trace.
//!
//! Loads a JSON machine configuration (or the built-in default), replays a
//! JSON Mop trace through the in-process trace feeder, and prints the
//! statistics report at the end. Exits 0 on normal termination, 1 on any
//! failure (configuration error, deadlock, I/O).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use oosim_core::oracle::feeder::TraceFeeder;
use oosim_core::{Config, Simulator};

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "oosim", about = "x86 out-of-order core timing simulator")]
struct Args {
    /// JSON instruction trace to replay.
    trace: PathBuf,

    /// JSON machine configuration (defaults to the built-in machine).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop after this many core cycles (overrides the config).
    #[arg(long)]
    max_cycles: Option<u64>,

    /// Stop after this many committed instructions per core.
    #[arg(long)]
    max_insts: Option<u64>,

    /// Write statistics to this file instead of stderr.
    #[arg(long)]
    stats_file: Option<String>,

    /// Print only these statistics sections.
    #[arg(long)]
    sections: Vec<String>,
}

fn run(args: &Args) -> Result<(), String> {
    let mut config: Config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("reading {}: {e}", path.display()))?;
            serde_json::from_str(&text).map_err(|e| format!("parsing {}: {e}", path.display()))?
        }
        None => Config::default(),
    };
    if let Some(n) = args.max_cycles {
        config.general.max_cycles = n;
    }
    if let Some(n) = args.max_insts {
        config.general.max_insts = n;
    }
    if let Some(path) = &args.stats_file {
        config.general.stats_file = Some(path.clone());
    }

    let trace_text = std::fs::read_to_string(&args.trace)
        .map_err(|e| format!("reading {}: {e}", args.trace.display()))?;
    let feeder = TraceFeeder::from_json(&trace_text, config.general.num_cores.max(1))
        .map_err(|e| format!("parsing {}: {e}", args.trace.display()))?;
    tracing::info!(mops = feeder.stream_len(), "trace loaded");

    let mut sim =
        Simulator::new(config, Box::new(feeder)).map_err(|e| format!("building machine: {e}"))?;
    let stats = sim.run().map_err(|e| format!("simulation failed: {e}"))?;

    if args.sections.is_empty() {
        sim.write_stats().map_err(|e| format!("writing stats: {e}"))
    } else {
        stats
            .print_sections(&mut std::io::stderr(), &args.sections)
            .map_err(|e| format!("writing stats: {e}"))
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("oosim: {message}");
            ExitCode::FAILURE
        }
    }
}
