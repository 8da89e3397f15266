use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tile_sampler::fetch::{TileOutcome, dedupe_by_destination};
use tile_sampler::logging::init_logging;
use tile_sampler::points_io::results_path;
use tile_sampler::tile::MAX_ZOOM;
use tile_sampler::{
    Crs, FetchConfig, RegionPreset, ReqwestDownloader, RetryPolicy, Sampler, SamplerConfig,
    SplitMethod, TileApiTable, TileFetcher, build_mainland_boundary, load_region, plan_requests,
    read_points, split, write_points, write_split,
};

#[derive(Parser)]
#[command(name = "tile-sampler")]
#[command(about = "Sample points inside a region and download map tiles for them", long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract a country's mainland from the UK countries shapefile
    Boundary(BoundaryArgs),
    /// Generate random points inside the mainland or a preset area
    Sample(SampleArgs),
    /// Split a points file into train/val/test files
    Split(SplitArgs),
    /// Download the tiles covering a points file
    Tiles(TilesArgs),
}

#[derive(Args)]
struct BoundaryArgs {
    /// Root folder holding country_data/
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Value of the NAME attribute to extract
    #[arg(long, default_value = "Scotland")]
    country: String,

    /// CRS of the mainland shapefile
    #[arg(long, default_value = "EPSG:4326")]
    epsg: Crs,
}

#[derive(Args)]
struct SampleArgs {
    /// Number of points to generate
    #[arg(long)]
    npoints: usize,

    /// Region name: edi, central-belt, or anything else for the whole mainland
    #[arg(long, default_value = "sct")]
    name: String,

    /// Root folder holding country_data/ and results/
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Mainland shapefile stem inside country_data/
    #[arg(long, default_value = "scotland")]
    boundary: String,

    #[arg(long, default_value = "42")]
    seed: u64,

    /// CRS of the preset outlines and the mainland shapefile fallback
    #[arg(long, default_value = "EPSG:4326")]
    epsg: Crs,

    /// Worker count, 0 for one per CPU
    #[arg(long, default_value = "0")]
    workers: usize,

    /// Consecutive rejected draws before a worker gives up
    #[arg(long, default_value = "1000000")]
    max_draws: u64,

    /// Wall-clock budget per worker in seconds
    #[arg(long)]
    deadline_secs: Option<u64>,
}

#[derive(Args)]
struct SplitArgs {
    /// Points file id under results/, e.g. central-belt50
    #[arg(long)]
    pfile: String,

    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// checkerboard or random
    #[arg(long, default_value = "checkerboard")]
    method: String,

    /// Checkerboard cell size in degrees
    #[arg(long, default_value = "0.1")]
    degrees: f64,

    /// Random split train ratio
    #[arg(long, default_value = "0.8")]
    train: f64,

    /// Random split validation ratio
    #[arg(long, default_value = "0.1")]
    val: f64,

    #[arg(long, default_value = "42")]
    seed: u64,
}

#[derive(Args)]
struct TilesArgs {
    /// Points file id under results/, e.g. central-belt50
    #[arg(long)]
    pfile: String,

    /// Tile zoom level, at most 30
    #[arg(long, default_value = "17", value_parser = clap::value_parser!(u8).range(0..=MAX_ZOOM as i64))]
    zoom: u8,

    /// Concurrent downloads, one per CPU by default
    #[arg(long)]
    threads: Option<usize>,

    /// Tile APIs to fetch from
    #[arg(long, num_args = 1.., default_values = ["worldimagery-clarity", "openstreetmap"])]
    apis: Vec<String>,

    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Folder the tiles_<pfile>/ directory is created in
    #[arg(long, default_value = "dataset")]
    save_root: PathBuf,

    /// JSON object of extra name -> URL template entries
    #[arg(long)]
    api_table: Option<PathBuf>,

    /// Enables the ukosgb1888 layer
    #[arg(long, env = "MAPTILER_API_KEY", hide_env_values = true)]
    maptiler_key: Option<String>,

    /// Attempts per tile
    #[arg(long, default_value = "5")]
    retries: u32,

    /// Seconds between attempts
    #[arg(long, default_value = "2")]
    retry_delay_secs: u64,

    /// Seconds before a single attempt is abandoned
    #[arg(long, default_value = "60")]
    timeout_secs: u64,

    /// Keep tiles already on disk instead of downloading them again
    #[arg(long)]
    skip_existing: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    match cli.command {
        Command::Boundary(args) => run_boundary(args),
        Command::Sample(args) => run_sample(args, cancel).await,
        Command::Split(args) => run_split(args),
        Command::Tiles(args) => run_tiles(args, cancel).await,
    }
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Interrupted, stopping");
        cancel.cancel();
    }
}

fn country_data(root: &Path) -> PathBuf {
    root.join("country_data")
}

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) =
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("##-"));
    }
    pb
}

fn run_boundary(args: BoundaryArgs) -> Result<()> {
    let dir = country_data(&args.root);
    let countries = dir.join("country_region.shp");
    let stem = args.country.to_lowercase();

    let mainland = build_mainland_boundary(
        &countries,
        &args.country,
        &dir.join(format!("{}_full.shp", stem)),
        &dir.join(format!("{}.shp", stem)),
        args.epsg,
    )
    .with_context(|| format!("Failed to build the {} boundary", args.country))?;

    info!(
        area = mainland.area(),
        fill_ratio = mainland.fill_ratio(),
        "Mainland boundary ready"
    );
    Ok(())
}

async fn run_sample(args: SampleArgs, cancel: CancellationToken) -> Result<()> {
    let mainland_path = country_data(&args.root).join(format!("{}.shp", args.boundary));
    let mainland = load_region(&mainland_path, args.epsg)
        .with_context(|| format!("Failed to load mainland from {}", mainland_path.display()))?;

    let preset = RegionPreset::from_name(&args.name);
    // Points files are always lon/lat
    let region = preset
        .resolve(&mainland, args.epsg)
        .and_then(|region| region.to_crs(Crs::Wgs84))
        .with_context(|| format!("Failed to build region {}", preset))?;

    let config = SamplerConfig {
        workers: args.workers,
        max_draws_per_point: args.max_draws,
        worker_deadline: args.deadline_secs.map(Duration::from_secs),
        ..SamplerConfig::default()
    };
    let sampler = Sampler::new(config).with_cancellation(cancel);

    let pb = progress_bar(args.npoints);
    pb.set_message(preset.to_string());
    let points = sampler
        .sample_with_progress(Arc::new(region), args.npoints, args.seed, |done| {
            pb.set_position(done as u64)
        })
        .await;
    pb.finish_and_clear();
    let points = points.context("Sampling failed")?;

    let out = results_path(&args.root, preset.name(), args.npoints);
    write_points(&out, &points)?;
    info!(points = points.len(), path = %out.display(), "Points saved");
    Ok(())
}

fn run_split(args: SplitArgs) -> Result<()> {
    let dir = args.root.join("results").join(&args.pfile);
    let input = dir.join(format!("{}.npy", args.pfile));
    let points = read_points(&input, Crs::Wgs84)?;

    let method = SplitMethod::from_name(&args.method, args.degrees, (args.train, args.val))
        .context("Invalid split configuration")?;
    let parts = split(&points, &method, args.seed)?;

    let paths = write_split(&dir, &args.pfile, &parts)?;
    let (train, val, test) = parts.sizes();
    info!(
        train = train,
        val = val,
        test = test,
        files = paths.len(),
        dir = %dir.display(),
        "Split saved"
    );
    Ok(())
}

async fn run_tiles(args: TilesArgs, cancel: CancellationToken) -> Result<()> {
    let points_path = args
        .root
        .join("results")
        .join(&args.pfile)
        .join(format!("{}.npy", args.pfile));
    let points = read_points(&points_path, Crs::Wgs84)?;

    let mut table = TileApiTable::defaults();
    if let Some(key) = &args.maptiler_key {
        table = table.with_maptiler_key(key);
    }
    if let Some(path) = &args.api_table {
        let extra = TileApiTable::from_json_file(path)?;
        table = table.merged(extra);
    }

    let tiles_dir = args.save_root.join(format!("tiles_{}", args.pfile));
    let requests = plan_requests(&points, args.zoom, &args.apis, &table, &tiles_dir)
        .context("Failed to plan tile requests")?;
    // Nearby points share tiles; size the progress bar by what is actually fetched
    let requests = dedupe_by_destination(requests);

    let timeout = Duration::from_secs(args.timeout_secs);
    let mut config = FetchConfig {
        retry: RetryPolicy {
            max_attempts: args.retries,
            delay: Duration::from_secs(args.retry_delay_secs),
            attempt_timeout: Some(timeout),
        },
        skip_existing: args.skip_existing,
        ..FetchConfig::default()
    };
    if let Some(threads) = args.threads {
        config.concurrency = threads;
    }

    let downloader = ReqwestDownloader::new(timeout)?;
    let fetcher = TileFetcher::new(downloader, config).with_cancellation(cancel);

    let pb = progress_bar(requests.len());
    let report = fetcher
        .fetch_all_with_progress(requests, |outcome| {
            if let TileOutcome::Failed(e) = outcome {
                pb.set_message(format!("failed: {}", e.url));
            }
            pb.inc(1);
        })
        .await;
    pb.finish_and_clear();
    let report = report?;

    info!(
        succeeded = report.succeeded,
        skipped = report.skipped,
        failed = report.failed.len(),
        path = %tiles_dir.display(),
        "Tile download finished"
    );
    for failure in &report.failed {
        warn!(error = %failure, "Tile missing");
    }
    Ok(())
}
