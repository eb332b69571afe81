//! Polaris CLI
//!
//! Parse a recorded signals file and estimate the emitter position.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use polaris_core::locator::{ClusterStrategy, EmitterLocator, SearchStrategy};
use polaris_core::params::Params;
use polaris_core::signal_json;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ClusterStrategyArg {
    /// Seed-parallel combinatorial subset search
    Combinatorial,
    /// Legacy contiguous tour split
    Contiguous,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SearchStrategyArg {
    /// Quadrant-expanding tiled grid walk
    Grid,
    /// Hill descent from AoA ray intersections
    Gradient,
}

/// Estimate a stationary emitter position from located RSSI samples.
#[derive(Parser, Debug)]
#[command(name = "polaris")]
#[command(about = "Estimate a stationary emitter position from located RSSI samples", long_about = None)]
struct Args {
    /// Path to the signals JSON file
    #[arg(short = 's', long)]
    signals_file: PathBuf,

    /// Cluster discovery strategy
    #[arg(long, value_enum, default_value_t = ClusterStrategyArg::Combinatorial)]
    cluster_strategy: ClusterStrategyArg,

    /// Position search strategy
    #[arg(long, value_enum, default_value_t = SearchStrategyArg::Grid)]
    search_strategy: SearchStrategyArg,

    /// Position search grid step in meters
    #[arg(short, long, default_value_t = 0.5)]
    precision: f64,

    /// Position search timeout in seconds (non-positive disables it)
    #[arg(short, long, default_value_t = 60.0)]
    timeout: f64,

    /// Log filter (trace/debug/info/warn/error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Algorithm parameter as NAME=VALUE (repeatable); dashes in NAME are
    /// treated as underscores
    #[arg(short = 'P', long = "param", value_name = "NAME=VALUE")]
    params: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&args.log_level))
        .init();

    let mut params = Params::new();
    for entry in &args.params {
        let Some((name, value)) = entry.split_once('=') else {
            bail!("invalid --param {entry:?}, expected NAME=VALUE");
        };
        params
            .set_from_str(&name.replace('-', "_"), value)
            .with_context(|| format!("invalid parameter value in --param {entry}"))?;
    }

    let samples = signal_json::parse_signals_file(&args.signals_file)
        .with_context(|| format!("failed to parse {}", args.signals_file.display()))?;
    if samples.is_empty() {
        bail!("no usable samples in {}", args.signals_file.display());
    }
    info!("loaded {} samples from {}", samples.len(), args.signals_file.display());

    let frame = samples[0].frame;
    let mut locator = EmitterLocator::with_params(frame, params);
    locator.set_cluster_strategy(match args.cluster_strategy {
        ClusterStrategyArg::Combinatorial => ClusterStrategy::Combinatorial,
        ClusterStrategyArg::Contiguous => ClusterStrategy::ContiguousSplit,
    });
    locator.set_search_strategy(match args.search_strategy {
        SearchStrategyArg::Grid => SearchStrategy::GridWalk,
        SearchStrategyArg::Gradient => SearchStrategy::GradientDescent,
    });

    for sample in samples {
        locator.add_sample(sample)?;
    }

    let timeout = (args.timeout > 0.0).then(|| Duration::from_secs_f64(args.timeout));
    let estimate = locator.locate(args.precision, timeout)?;

    let telemetry = &estimate.telemetry;
    info!(
        "{} clusters, {} combinations explored in {:.2} ms, {} timed-out seeds",
        telemetry.cluster_count,
        telemetry.combinations_explored,
        telemetry.clustering_time_ms,
        telemetry.timed_out_seeds
    );

    println!(
        "Calculated Position: Latitude = {:.10}, Longitude = {:.10}",
        estimate.latitude, estimate.longitude
    );
    Ok(())
}
