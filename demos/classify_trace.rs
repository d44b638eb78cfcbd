//! Example: classify every pulse in one recorded trace
//!
//! Runs a single detection engine over a `time_ms,volts` trace and prints each
//! resolved pulse with its verdict, then the reports the node would have sent.
//!
//! Usage:
//!   cargo run --release --example classify_trace -- --file node1.csv
//!
//! Only rejected pulses, custom thresholds:
//!   cargo run --release --example classify_trace -- \
//!       --file node1.csv --config network.json --rejected-only

use clap::Parser;
use pulsenet::nodes::trace_source::parse_trace;
use pulsenet::{DetectionEngine, NetworkConfig, NodeId};
use std::fs::File;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to trace file
    #[arg(short, long)]
    file: String,

    /// Node identifier used in the report lines
    #[arg(short, long, default_value = "Nodo_1")]
    node: String,

    /// JSON network configuration
    #[arg(short, long)]
    config: Option<String>,

    /// Print only pulses that were rejected
    #[arg(long)]
    rejected_only: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => NetworkConfig::from_json_file(path)?,
        None => NetworkConfig::default(),
    };
    config.validate()?;

    let samples = parse_trace(File::open(&args.file)?)?;
    info!("{}: {} samples", args.file, samples.len());

    let mut engine = DetectionEngine::new(
        NodeId::new(args.node.as_str()),
        config.detector.clone(),
        config.reporter.clone(),
    );

    let mut pulses = 0usize;
    let mut reports = Vec::new();
    for sample in &samples {
        let outcome = engine.advance(sample.time_ms, sample.volts);
        if let Some(verdict) = outcome.verdict() {
            pulses += 1;
            if !(args.rejected_only && verdict.is_valid()) {
                let reasons: Vec<String> =
                    verdict.rejections.iter().map(|r| r.to_string()).collect();
                println!(
                    "{:>10} ms  amp={:.3} V  dur={:>3} ms  {}",
                    verdict.start_ms,
                    verdict.amplitude_v,
                    verdict.duration_ms,
                    if reasons.is_empty() {
                        "VALID".to_string()
                    } else {
                        reasons.join(", ")
                    }
                );
            }
        }
        if let Some(report) = outcome.report {
            reports.push((sample.time_ms, report));
        }
    }

    println!();
    for (time_ms, report) in &reports {
        println!("{:>10} ms  {}", time_ms, report);
    }
    println!(
        "{} pulses, {} valid, {} reports, {} unreported",
        pulses,
        engine.total(),
        reports.len(),
        engine.period_count()
    );

    Ok(())
}
