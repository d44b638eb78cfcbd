//! Example: complete two-node network
//!
//! Two signal sources feed two sensing nodes, both nodes report to one collector,
//! and the collector's hourly activity is written as status lines.
//!
//! Synthetic signals (default):
//!   cargo run --release --example two_node_network -- --minutes 125
//!
//! Recorded traces, CSV output:
//!   cargo run --release --example two_node_network -- \
//!       --trace1 node1.csv --trace2 node2.csv \
//!       --format csv --output activity.csv

use clap::Parser;
use pulsenet::{
    Collector, ManualClock, NetworkConfig, NodeExit, NodeId, Pipeline, ProcessNode, SensingNode,
    StatusFormat, StatusWriter, SyntheticConfig, SyntheticSource, TraceSource,
};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON network configuration (defaults for every missing field)
    #[arg(short, long)]
    config: Option<String>,

    /// Trace for the first node instead of a synthetic signal
    #[arg(long)]
    trace1: Option<String>,

    /// Trace for the second node instead of a synthetic signal
    #[arg(long)]
    trace2: Option<String>,

    /// Length of synthetic signals in minutes
    #[arg(short, long, default_value = "125")]
    minutes: u32,

    /// Seed of the first synthetic signal; the second uses seed + 1
    #[arg(long, default_value = "1")]
    seed: u64,

    /// Mean time between synthetic dips (ms)
    #[arg(long, default_value = "4000")]
    mean_interval_ms: f64,

    /// Share of synthetic dips that are discharges
    #[arg(long, default_value = "0.05")]
    discharge_fraction: f64,

    /// Collector publish period in minutes (overrides the config file)
    #[arg(long)]
    publish_minutes: Option<u32>,

    /// Output format: status, json or csv
    #[arg(short, long, default_value = "status")]
    format: StatusFormat,

    /// Output file (stdout if omitted)
    #[arg(short, long)]
    output: Option<String>,

    /// Give up after this many seconds of wall time
    #[arg(long)]
    timeout_s: Option<u64>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => NetworkConfig::from_json_file(path)?,
        None => NetworkConfig::default(),
    };
    if let Some(minutes) = args.publish_minutes {
        config.collector.publish_period_ms = minutes.saturating_mul(60_000);
    }
    config.validate()?;

    let roster: Vec<NodeId> = config.collector.roster.iter().map(NodeId::new).collect();
    if roster.len() != 2 {
        return Err(format!("expected two roster nodes, got {}", roster.len()).into());
    }

    info!("=== Two-node network ===");
    info!(
        "Nodes: {}, {}; publish every {} ms",
        roster[0], roster[1], config.collector.publish_period_ms
    );

    // Sources push simulated time forward; the collector reads it
    let clock = ManualClock::new(0);
    let mut pipeline = Pipeline::new();

    pipeline.add_process(
        "collector",
        Collector::with_clock(config.collector.clone(), roster.len(), clock.clone()),
    )?;

    let traces = [&args.trace1, &args.trace2];
    let mut stats = Vec::new();
    for (i, (node, trace)) in roster.iter().zip(traces).enumerate() {
        let source_name = format!("source{}", i + 1);
        match trace {
            Some(path) => {
                info!("{}: replaying {}", node, path);
                let source = TraceSource::from_path(path)?
                    .with_name(source_name.clone())
                    .with_clock(clock.clone());
                pipeline.add_process(source_name.clone(), source)?;
            }
            None => {
                let synthetic = SyntheticConfig {
                    seed: args.seed + i as u64,
                    duration_ms: args.minutes.saturating_mul(60_000),
                    mean_interval_ms: args.mean_interval_ms,
                    discharge_fraction: args.discharge_fraction,
                    ..SyntheticConfig::default()
                };
                info!("{}: synthetic signal, seed {}", node, synthetic.seed);
                let source = SyntheticSource::new(synthetic)?
                    .with_name(source_name.clone())
                    .with_clock(clock.clone());
                pipeline.add_process(source_name.clone(), source)?;
            }
        }

        let sensing = SensingNode::new(node.clone(), &config);
        let sensing_name = sensing.name().to_string();
        stats.push((node.clone(), sensing.stats()));
        pipeline.add_process(sensing_name.clone(), sensing)?;
        pipeline.connect(&source_name, "samples", &sensing_name, "samples")?;
        pipeline.connect(&sensing_name, "link", "collector", &format!("link{}", i))?;
    }

    let writer = match &args.output {
        Some(path) => {
            info!("Writing {:?} to {}", args.format, path);
            StatusWriter::create(path, args.format)?
        }
        None => StatusWriter::stdout(args.format),
    };
    pipeline.add_process("status", writer)?;
    pipeline.connect("collector", "activity", "status", "activity")?;

    info!("Building pipeline...");
    let scheduler = pipeline.build()?;

    info!("Running...");
    let summary = match args.timeout_s {
        Some(secs) => scheduler.wait_or_stop_after(Duration::from_secs(secs)),
        None => scheduler.wait(),
    };

    for (node, stats) in &stats {
        info!(
            "{}: {} samples, {} pulses, {} valid, {} reports",
            node,
            stats.samples(),
            stats.pulses(),
            stats.accepted(),
            stats.reports()
        );
    }
    for (name, exit) in &summary.exits {
        match exit {
            NodeExit::Finished { produced } => info!("{}: finished ({} items)", name, produced),
            other => warn!("{}: {:?}", name, other),
        }
    }

    if !summary.is_clean() {
        return Err(format!("nodes failed: {}", summary.failed().join(", ")).into());
    }
    info!("Done!");
    Ok(())
}
