//! Itinerary Selection CLI
//!
//! Selects a diverse set of priced itinerary combinations from a scenario.
//!
//! Usage:
//!   select-itineraries --scenario data/scenario.json \
//!                      --output data/selected_itineraries.json \
//!                      --requested 20

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Parser;
use itinerary_selector::loader;
use itinerary_selector::{Bucket, SearchDriver, SearchOutcome};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(
    name = "select-itineraries",
    about = "Select a diverse set of priced itinerary combinations"
)]
struct Args {
    /// Path to scenario JSON file
    #[arg(short, long, default_value = "data/scenario.json")]
    scenario: PathBuf,

    /// Output JSON file
    #[arg(short, long, default_value = "data/selected_itineraries.json")]
    output: PathBuf,

    /// Override the requested solution count
    #[arg(short = 'n', long)]
    requested: Option<usize>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    generated_at: DateTime<Utc>,
    scenario: &'a PathBuf,
    #[serde(flatten)]
    outcome: &'a SearchOutcome,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; RUST_LOG wins when set
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("{}", "=".repeat(60));
    info!("Itinerary Combination Selector");
    info!("{}", "=".repeat(60));

    let mut scenario = loader::load_scenario(&args.scenario)?;
    if let Some(requested) = args.requested {
        scenario.config = scenario.config.with_requested(requested);
    }
    if scenario.skipped_options + scenario.skipped_fares > 0 {
        warn!(
            "Scenario had {} malformed options and {} malformed fares",
            scenario.skipped_options, scenario.skipped_fares
        );
    }

    let mut driver = SearchDriver::new(scenario.itinerary, scenario.config, scenario.pricer)?;
    let outcome = driver.run()?;

    info!("\nCheapest selections:");
    for entry in outcome.accepted.iter().take(10) {
        info!(
            "  {:>10.2} | {:>5} min | {} | {:?}",
            entry.price(),
            entry.priced.duration,
            entry.bucket.map(Bucket::letter).unwrap_or('-'),
            entry.sops()
        );
    }

    // Write output
    info!("\nWriting output to {:?}", args.output);
    let report = Report {
        generated_at: Utc::now(),
        scenario: &args.scenario,
        outcome: &outcome,
    };
    let file = File::create(&args.output)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, &report)?;

    // Summary
    info!("\n{}", "=".repeat(60));
    info!("SUMMARY");
    info!("{}", "=".repeat(60));
    info!("Final state: {:?}", outcome.state);
    info!("Total selected: {}", outcome.accepted.len());
    for bucket in Bucket::ALL {
        info!("  {:?}: {}", bucket, outcome.stats.buckets[bucket.index()]);
    }
    if let Some(cutoff) = outcome.fare_cutoff {
        info!("Fare cutoff: {:.2}", cutoff);
    }
    info!(
        "Priced {} of {} enumerated ({} validated, {} pricing failures, {} options invalidated)",
        outcome.counters.priced,
        outcome.counters.enumerated,
        outcome.counters.validated,
        outcome.counters.pricing_failures,
        outcome.counters.invalidated_options
    );

    Ok(())
}
