#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use pagecore_runtime::Supervisor;
use pagecore_types::RuntimeConfig;
use std::path::PathBuf;
use tracing::info;

/// Block paging/caching runtime over a single swap image.
///
/// Runs in the foreground until INT/TERM, then flushes the cache and
/// reports final statistics.
#[derive(Parser)]
#[command(name = "pagecore", version, about)]
struct Cli {
    /// Path to the swap image (must exist, opened read-write).
    #[arg(long)]
    image: Option<PathBuf>,

    /// Number of worker threads.
    #[arg(long)]
    cores: Option<u32>,

    /// Per-worker segment size in MiB.
    #[arg(long)]
    segment_mb: Option<u64>,

    /// Ring-log capacity in MiB.
    #[arg(long)]
    cache_mb: Option<u64>,

    /// Resident-page ceiling for the shared cache.
    #[arg(long)]
    max_cache_entries: Option<usize>,

    /// Print final statistics as JSON on shutdown.
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn into_config(self) -> (RuntimeConfig, bool) {
        let mut config = RuntimeConfig::default();
        if let Some(image) = self.image {
            config.image_path = image;
        }
        if let Some(cores) = self.cores {
            config.cores = cores;
        }
        if let Some(segment_mb) = self.segment_mb {
            config.segment_mb = segment_mb;
        }
        if let Some(cache_mb) = self.cache_mb {
            config.cache_mb = cache_mb;
        }
        if let Some(max_cache_entries) = self.max_cache_entries {
            config.max_cache_entries = max_cache_entries;
        }
        (config, self.json)
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run(Cli::parse()) {
        tracing::error!(event = "startup_failed", error = %format!("{err:#}"));
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let (config, json) = cli.into_config();

    let supervisor = Supervisor::open(config).context("failed to start the paging runtime")?;
    supervisor
        .register_signals()
        .context("failed to install signal handlers")?;

    info!(event = "runtime_ready", "pagecore running; INT/TERM to stop");
    supervisor.wait();

    let stats = supervisor.shutdown();
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        let iterations: u64 = stats.workers.iter().map(|w| w.iterations).sum();
        let compressed: u64 = stats.workers.iter().map(|w| w.compressed_bytes).sum();
        info!(
            event = "final_stats",
            iterations,
            compressed_bytes = compressed,
            cache_hits = stats.cache.hits,
            cache_misses = stats.cache.misses,
            cache_hit_ratio = stats.cache.hit_ratio(),
            evictions = stats.cache.evictions,
            migrations = stats.scheduler.migrations,
            ring_appends = stats.ring.appends,
            shutdown_writebacks = stats.shutdown_writebacks
        );
    }
    Ok(())
}
