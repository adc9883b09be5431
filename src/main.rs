//! CLI entry point for the road speed estimator.
//!
//! Provides subcommands for running the full pipeline over a bounding box,
//! re-aggregating an existing cache, and previewing the section grid.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use road_speeds::aggregate::{AggregationConfig, ReductionPolicy};
use road_speeds::cache::CacheStore;
use road_speeds::geo::tiler::DEFAULT_SECTION_ZOOM;
use road_speeds::geo::{BoundingBox, tile_bbox};
use road_speeds::output::print_json;
use road_speeds::pipeline::{
    Driver, MapMatchingConfig, PipelineConfig, RetryPolicy, TraceProviderConfig, aggregate_cached,
};
use road_speeds::publish::publish_results;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "road_speeds")]
#[command(about = "Estimate road speeds per region from crowd-sourced GPS traces", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct AggregationArgs {
    /// Percentile used to reduce speeds (default: median)
    #[arg(long)]
    percentile: Option<f64>,

    /// Emit a separate suburban context instead of folding it into urban
    #[arg(long, default_value_t = false)]
    suburban: bool,

    /// Skip the country-level and world-level entries
    #[arg(long, default_value_t = false)]
    no_rollups: bool,

    /// Optional: S3 bucket to upload the results to (e.g., "my-bucket")
    #[arg(long)]
    s3_bucket: Option<String>,

    /// Key prefix for uploaded results
    #[arg(long, default_value = "")]
    s3_prefix: String,
}

impl AggregationArgs {
    fn config(&self) -> AggregationConfig {
        AggregationConfig {
            policy: ReductionPolicy::from_percentile(self.percentile),
            suburban: self.suburban,
            rollups: !self.no_rollups,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, filter, match and aggregate traces for a bounding box
    Run {
        /// min_lon,min_lat,max_lon,max_lat
        #[arg(long, allow_hyphen_values = true)]
        bbox: BoundingBox,

        /// Trace provider config: inline JSON or a path to a JSON file
        #[arg(long)]
        trace_config: String,

        /// Map-matching config: inline JSON or a path to a JSON file
        #[arg(long)]
        map_matching_config: String,

        /// Maximum number of sections processed at once (default: CPU count)
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Directory holding the cache and results
        #[arg(short = 'd', long, default_value = "output")]
        output_dir: PathBuf,

        /// Zoom level of the section grid
        #[arg(long, default_value_t = DEFAULT_SECTION_ZOOM)]
        zoom: u8,

        /// Minimum fraction of a trace that must match the road network
        #[arg(long, default_value_t = 0.75)]
        match_ratio_threshold: f64,

        /// Attempts per collaborator call before a section is marked failed
        #[arg(long, default_value_t = 3)]
        max_attempts: u32,

        #[command(flatten)]
        aggregation: AggregationArgs,
    },
    /// Rebuild speeds.json from the cached observations only
    Aggregate {
        /// Directory holding the cache and results
        #[arg(short = 'd', long, default_value = "output")]
        output_dir: PathBuf,

        #[command(flatten)]
        aggregation: AggregationArgs,
    },
    /// List the sections a bounding box decomposes into
    Sections {
        /// min_lon,min_lat,max_lon,max_lat
        #[arg(long, allow_hyphen_values = true)]
        bbox: BoundingBox,

        /// Zoom level of the section grid
        #[arg(long, default_value_t = DEFAULT_SECTION_ZOOM)]
        zoom: u8,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/road_speeds.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("road_speeds.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive(LevelFilter::INFO.into()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive(LevelFilter::DEBUG.into()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            bbox,
            trace_config,
            map_matching_config,
            concurrency,
            output_dir,
            zoom,
            match_ratio_threshold,
            max_attempts,
            aggregation,
        } => {
            let mut config = PipelineConfig::new(output_dir);
            config.zoom = zoom;
            if let Some(concurrency) = concurrency {
                config.concurrency = concurrency;
            }
            config.match_filter.match_ratio_threshold = match_ratio_threshold;
            config.retry = RetryPolicy {
                max_attempts,
                ..RetryPolicy::default()
            };
            config.aggregation = aggregation.config();
            config.validate()?;

            // Validate everything before any network call.
            let trace_config = TraceProviderConfig::load(&trace_config)?;
            let map_matching_config = MapMatchingConfig::load(&map_matching_config)?;
            let provider = trace_config.build().context("building trace provider")?;
            let matcher = map_matching_config
                .build()
                .context("building map matcher")?;

            let driver = Driver::new(config, Arc::from(provider), Arc::from(matcher))?;

            let cancel = driver.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, finishing up");
                    cancel.cancel();
                }
            });

            let outcome = driver.run(&bbox).await?;
            let results_dir = driver.config().results_dir();

            if outcome.speeds.is_none() {
                warn!("Run was cancelled; rerun the same command to resume");
                return Ok(());
            }
            publish(&aggregation, &results_dir).await?;
        }
        Commands::Aggregate {
            output_dir,
            aggregation,
        } => {
            let mut config = PipelineConfig::new(output_dir);
            config.aggregation = aggregation.config();
            config.validate()?;

            let cache_dir = config.cache_dir();
            if !cache_dir.is_dir() {
                anyhow::bail!("no cache found at {}", cache_dir.display());
            }
            let cache = CacheStore::open(cache_dir)?;
            let speeds = aggregate_cached(&config, &cache)?;
            info!(regions = speeds.len(), "Aggregation complete");

            publish(&aggregation, &config.results_dir()).await?;
        }
        Commands::Sections { bbox, zoom } => {
            let sections = tile_bbox(&bbox, zoom)?;
            info!(count = sections.len(), "Sections");
            print_json(&sections)?;
        }
    }

    Ok(())
}

async fn publish(args: &AggregationArgs, results_dir: &Path) -> Result<()> {
    match &args.s3_bucket {
        None => {
            info!("S3 bucket not specified, skipping upload");
        }
        Some(bucket) => {
            let uploaded = publish_results(bucket, &args.s3_prefix, results_dir).await?;
            info!(bucket = %bucket, uploaded, "S3 upload complete");
        }
    }
    Ok(())
}
