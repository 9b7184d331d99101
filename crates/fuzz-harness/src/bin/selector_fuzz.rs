//! Selector Fuzz Runner CLI
//!
//! Usage:
//!   selector-fuzz run [--cases N] [--seed S] [--output FORMAT]
//!   selector-fuzz list
//!   selector-fuzz report <json-file> [--output FORMAT]
//!
//! Examples:
//!   selector-fuzz run                         # Run all targets with defaults
//!   selector-fuzz run --cases 10000 --seed 7  # Reproducible larger run
//!   selector-fuzz run --output json > r.json  # Save for later
//!   selector-fuzz report results.json         # Re-render a saved JSON report

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fuzz_harness::generators::{itinerary, leg_sizes, offer_stream, quota_config, scenario};
use fuzz_harness::invariants::{check_enumerator, check_offer_stream, check_search};
use fuzz_harness::prelude::Strategy;
use fuzz_harness::reports::FuzzReport;
use fuzz_harness::runner::{FuzzConfig, FuzzRunner};
use proptest::strategy::Just;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "selector-fuzz", about = "Randomized invariant checks for the itinerary selector")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every fuzz target
    Run {
        /// Cases per target
        #[arg(long, default_value_t = 1_000)]
        cases: u64,
        /// Random seed (0 = fixed default)
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, default_value_t = 3)]
        max_legs: usize,
        #[arg(long, default_value_t = 6)]
        max_options: usize,
        #[arg(long, default_value_t = 10)]
        max_requested: usize,
        #[arg(long, value_enum, default_value_t = Format::Markdown)]
        output: Format,
    },
    /// List available fuzz targets
    List,
    /// Re-render a JSON report
    Report {
        path: PathBuf,
        #[arg(long, value_enum, default_value_t = Format::Markdown)]
        output: Format,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Format {
    Json,
    Markdown,
}

const TARGETS: [(&str, &str); 3] = [
    ("enumerator_complete", "Every tuple of the grid emitted exactly once"),
    ("engine_offer_stream", "Cap, statistics inverse and monotone fare cutoff under raw offers"),
    ("search_invariants", "Full driver runs with pricing failures, invalidation and reconciliation"),
];

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

fn run() -> Result<bool> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Command::Run {
            cases,
            seed,
            max_legs,
            max_options,
            max_requested,
            output,
        } => {
            let config = FuzzConfig::new()
                .cases(cases)
                .seed(seed)
                .shape(max_legs, max_options)
                .max_requested(max_requested);
            let report = run_targets(config);
            print_report(&report, output)?;
            Ok(report.all_passed())
        }
        Command::List => {
            println!("Available fuzz targets:");
            println!();
            for (name, description) in TARGETS {
                println!("  {:<22} {}", name, description);
            }
            Ok(true)
        }
        Command::Report { path, output } => {
            let json = fs::read_to_string(&path).with_context(|| format!("reading {:?}", path))?;
            let report: FuzzReport =
                serde_json::from_str(&json).with_context(|| format!("parsing {:?}", path))?;
            print_report(&report, output)?;
            Ok(report.all_passed())
        }
    }
}

fn run_targets(config: FuzzConfig) -> FuzzReport {
    let (legs, options, requested) = (config.max_legs, config.max_options, config.max_requested);
    info!("Running {} targets with {} cases each", TARGETS.len(), config.cases);

    let mut runner = FuzzRunner::new(config.clone());

    runner.run_strategy(TARGETS[0].0, leg_sizes(legs, options), |sizes| check_enumerator(sizes));

    let stream = (itinerary(legs, options), quota_config(requested)).prop_flat_map(|(itin, config)| {
        let sizes = itin.leg_sizes();
        (Just(itin), Just(config), offer_stream(sizes, 60))
    });
    runner.run_strategy(TARGETS[1].0, stream, |(itin, config, offers)| {
        check_offer_stream(itin, config, offers)
    });

    runner.run_strategy(TARGETS[2].0, scenario(legs, options, requested), check_search);

    FuzzReport::new(runner.into_results(), &config)
}

fn print_report(report: &FuzzReport, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", report.to_json()?),
        Format::Markdown => println!("{}", report.to_markdown()),
    }
    Ok(())
}
