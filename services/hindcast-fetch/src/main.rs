//! Hindcast point retrieval from the command line.
//!
//! Resolves a coordinate to the nearest grid cell or station of the wave
//! hindcast archive, fetches the requested months (resuming from the local
//! cache), and writes the assembled series as CSV plus JSON metadata.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use hindcast::{load_hindcast, HindcastConfig, LoadOptions};
use hindcast_common::{Coordinate, DatasetKind, Region, VariableName, YearMonth};
use netcdf_source::NetCdfArchive;
use storage::MonthlyCache;

#[derive(Parser, Debug)]
#[command(name = "hindcast-fetch")]
#[command(about = "Retrieve wave/wind hindcast time series at a point")]
struct Cli {
    /// YAML configuration file (defaults plus HINDCAST_* environment otherwise)
    #[arg(long, global = true, env = "HINDCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Override the cache directory
    #[arg(long, global = true, env = "HINDCAST_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Log level
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Retrieve a point series and write it to the output directory
    Fetch(FetchArgs),
    /// Show how many months are cached and their size on disk
    CacheStats,
}

#[derive(Args, Debug)]
struct FetchArgs {
    /// Longitude in degrees east
    #[arg(long, allow_hyphen_values = true)]
    lon: f64,

    /// Latitude in degrees north
    #[arg(long, allow_hyphen_values = true)]
    lat: f64,

    /// First month, YYYYMM or YYYY-MM
    #[arg(long)]
    start: YearMonth,

    /// Last month (inclusive)
    #[arg(long)]
    end: YearMonth,

    /// Dataset type: wave (gridded) or wind (spectral stations)
    #[arg(long, default_value = "wave")]
    kind: DatasetKind,

    /// Gridded region: glob_24m, aus_10m, aus_4m, pac_10m, pac_4m
    #[arg(long, default_value = "glob_24m")]
    region: Region,

    /// Extra variables beyond the core set, comma separated
    #[arg(long, value_delimiter = ',')]
    extra: Vec<String>,

    /// Maximum concurrent month fetches
    #[arg(long)]
    workers: Option<usize>,

    /// Fetch months one at a time on the main thread
    #[arg(long)]
    sequential: bool,

    /// Do not read or write the monthly cache
    #[arg(long)]
    no_cache: bool,

    /// Delete this location's cached months after writing the output
    #[arg(long)]
    discard_cache: bool,

    /// Directory for the CSV table and JSON metadata
    #[arg(long, default_value = "hindcast-output")]
    output_dir: PathBuf,

    /// Log request progress at info level
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs)?;

    let mut config = match &cli.config {
        Some(path) => HindcastConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?
            .with_env_overrides()?,
        None => HindcastConfig::from_env()?,
    };
    if let Some(dir) = &cli.cache_dir {
        config.cache.dir = dir.clone();
    }
    config.validate()?;

    match cli.command {
        Command::Fetch(args) => fetch(&config, args),
        Command::CacheStats => {
            let stats = MonthlyCache::new(&config.cache.dir).stats();
            println!(
                "{}: {} months, {:.1} MB",
                config.cache.dir.display(),
                stats.entries,
                stats.total_mb()
            );
            Ok(())
        }
    }
}

fn fetch(config: &HindcastConfig, args: FetchArgs) -> Result<()> {
    let target = Coordinate::try_new(args.lon, args.lat)?;
    let options = LoadOptions {
        kind: args.kind,
        region: args.region,
        extra_variables: args.extra.iter().map(VariableName::new).collect(),
        concurrent: !args.sequential,
        max_workers: args.workers,
        use_cache: args.no_cache.then_some(false),
        keep_cache: args.discard_cache.then_some(false),
        verbose: args.verbose,
        output_dir: Some(args.output_dir),
    };

    info!(
        target = %target,
        start = %args.start,
        end = %args.end,
        kind = %args.kind,
        "Starting hindcast fetch"
    );

    let archive = NetCdfArchive::new();
    let output = load_hindcast(&archive, config, target, args.start, args.end, &options)
        .with_context(|| format!("retrieving hindcast at {}", target))?;

    let meta = &output.metadata;
    println!(
        "{} -> {} ({:.2} km, {})",
        meta.target,
        meta.resolved,
        meta.offset_km,
        meta.source_label()
    );
    println!(
        "{} rows, {} months, {} missing",
        meta.rows,
        meta.months_included.len(),
        meta.missing_months.len()
    );
    if !meta.missing_months.is_empty() {
        let missing: Vec<String> = meta.missing_months.iter().map(|m| m.to_string()).collect();
        println!("missing: {}", missing.join(", "));
    }
    if let Some(paths) = &output.persisted {
        println!("table: {}", paths.table.display());
        println!("metadata: {}", paths.metadata.display());
    }
    if args.verbose {
        let report = &output.report;
        let summary = serde_json::json!({
            "mode": report.mode.to_string(),
            "fetched": report.fetched,
            "skipped": report.skipped,
            "failed": report.failed(),
            "assembly": format!("{:?}", output.strategy),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}

fn init_tracing(log_level: &str, json: bool) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr);
    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}
