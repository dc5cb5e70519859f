use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use sentinel2sync::{
    overlap_files, plan, Band, DateRange, DownloadConfig, DownloadRequest, ProductSelection,
    ProductType, QualityConstraints, ResolverConfig, Sen2CorConverter, Sentinel2Downloader,
    TileDate, TileId, DEFAULT_AREA_LIMIT_KM2,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sentinel2sync")]
#[command(
    about = "Select Sentinel-2 tiles for an area and download their imagery",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the grid tiles covering an area of interest
    Overlap {
        /// GeoJSON file with the area of interest
        #[arg(long)]
        aoi: PathBuf,

        /// GeoJSON file with the tile grid (features carry a `Name` property)
        #[arg(long)]
        grid: PathBuf,

        /// Minimal intersection area in km²
        #[arg(long, default_value_t = DEFAULT_AREA_LIMIT_KM2)]
        limit: f64,
    },
    /// Download products of the given tiles within a date range
    Download {
        /// Tile ids (comma-separated, e.g., "36UYA,36UYB")
        #[arg(short, long, value_delimiter = ',', required = true)]
        tiles: Vec<TileId>,

        /// First acquisition day (YYYY-MM-DD)
        #[arg(long)]
        start: String,

        /// Last acquisition day (YYYY-MM-DD)
        #[arg(long)]
        end: String,

        #[command(flatten)]
        selection: SelectionArgs,

        #[command(flatten)]
        transfer: TransferArgs,
    },
    /// Print every (tile, date) pair of a range as JSON
    Plan {
        /// Tile ids (comma-separated)
        #[arg(short, long, value_delimiter = ',', required = true)]
        tiles: Vec<TileId>,

        #[arg(long)]
        start: String,

        #[arg(long)]
        end: String,
    },
    /// Download the (tile, date) pairs of a plan file, searching nearby dates on a miss
    FetchDates {
        /// JSON file produced by `plan`
        #[arg(long)]
        plan: PathBuf,

        #[command(flatten)]
        selection: SelectionArgs,

        #[command(flatten)]
        transfer: TransferArgs,
    },
    /// Convert downloaded L1C products to L2A with Sen2Cor
    Convert {
        /// Directory holding L1C products
        #[arg(short, long)]
        input: PathBuf,

        /// Directory for the L2A products
        #[arg(short, long)]
        output: PathBuf,

        /// Sen2Cor processor executable
        #[arg(long, default_value = "L2A_Process")]
        binary: PathBuf,
    },
}

#[derive(Args, Debug)]
struct SelectionArgs {
    /// Product level (L1C or L2A)
    #[arg(short, long, default_value = "L2A")]
    product: ProductType,

    /// Bands to download (comma-separated, e.g., "TCI,B04")
    #[arg(short, long, value_delimiter = ',', default_value = "TCI")]
    bands: Vec<String>,

    /// Maximal CLOUDY_PIXEL_PERCENTAGE
    #[arg(long, default_value_t = 100.0)]
    max_cloud: f64,

    /// Maximal NODATA_PIXEL_PERCENTAGE
    #[arg(long, default_value_t = 100.0)]
    max_nodata: f64,

    /// Output directory for downloaded products
    #[arg(short, long, default_value = "./sentinel2imagery")]
    output: PathBuf,

    /// Mirror complete products instead of the selected bands
    #[arg(long)]
    full: bool,
}

#[derive(Args, Debug)]
struct TransferArgs {
    /// Storage endpoint
    #[arg(long, env = "S2_STORE_URL", default_value = "https://storage.googleapis.com")]
    store_url: String,

    /// Bucket holding the tile tree
    #[arg(long, env = "S2_BUCKET", default_value = "gcp-public-data-sentinel-2")]
    bucket: String,

    /// Concurrent transfers
    #[arg(short, long, env = "S2_WORKERS", default_value_t = 4)]
    workers: usize,

    /// Limit for one transfer attempt (e.g., "10m")
    #[arg(long, value_parser = humantime::parse_duration, default_value = "10m")]
    timeout: Duration,

    /// Extra attempts after a failed transfer
    #[arg(long, default_value_t = 3)]
    retries: usize,

    /// Pause between attempts (e.g., "5s")
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5s")]
    retry_interval: Duration,

    /// Days searched on each side of a date without products
    #[arg(long, default_value_t = 2)]
    date_bias: i64,

    /// Hide the progress bar
    #[arg(long)]
    no_progress: bool,
}

impl TransferArgs {
    fn config(&self) -> DownloadConfig {
        DownloadConfig {
            store_url: self.store_url.clone(),
            bucket: self.bucket.clone(),
            max_concurrent_downloads: self.workers,
            transfer_timeout: Some(self.timeout),
            retry_attempts: self.retries,
            retry_interval: self.retry_interval,
            date_bias_days: self.date_bias,
            show_progress: !self.no_progress,
        }
    }
}

impl SelectionArgs {
    fn selection(&self, resolver: &ResolverConfig) -> anyhow::Result<ProductSelection> {
        Ok(ProductSelection {
            product_type: self.product,
            bands: Band::select(&self.bands, &resolver.known_bands)?,
            constraints: QualityConstraints::none()
                .with(QualityConstraints::CLOUDY_PIXEL_PERCENTAGE, self.max_cloud)
                .with(QualityConstraints::NODATA_PIXEL_PERCENTAGE, self.max_nodata),
            output_dir: self.output.clone(),
            full_download: self.full,
        })
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("sentinel2sync={}", log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(cli.command).await {
        error!("❌ Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Overlap { aoi, grid, limit } => {
            info!("🚀 Computing tiles for {:?}", aoi);
            match overlap_files(&aoi, &grid, limit)? {
                Some(tiles) => println!("{}", tiles.join(",")),
                None => info!("No tiles overlap the area of interest"),
            }
        }
        Command::Plan { tiles, start, end } => {
            let range = DateRange::parse(&start, &end)?;
            println!("{}", serde_json::to_string_pretty(&plan(&tiles, &range))?);
        }
        Command::Download {
            tiles,
            start,
            end,
            selection,
            transfer,
        } => {
            let resolver = ResolverConfig::default();
            let request = DownloadRequest {
                selection: selection.selection(&resolver)?,
                tiles,
                date_range: DateRange::parse(&start, &end)?,
            };
            info!("🚀 Downloading {} products", request.selection.product_type);
            let tile_names: Vec<_> = request.tiles.iter().map(TileId::as_str).collect();
            info!("Tiles: {:?}", tile_names);
            info!("Output directory: {:?}", request.selection.output_dir);

            let downloader = Sentinel2Downloader::from_config(transfer.config())?;
            let report = downloader.download(&request).await?;
            for (tile, reason) in &report.tile_errors {
                error!("Tile {} was not processed: {}", tile, reason);
            }
            info!(
                "✅ {} of {} assets on disk",
                report.retrieved(),
                report.outcomes.len()
            );
        }
        Command::FetchDates {
            plan,
            selection,
            transfer,
        } => {
            let source = std::fs::read_to_string(&plan)
                .with_context(|| format!("Cannot read plan file {}", plan.display()))?;
            let requests: Vec<TileDate> = serde_json::from_str(&source)?;
            let selection = selection.selection(&ResolverConfig::default())?;

            let downloader = Sentinel2Downloader::from_config(transfer.config())?;
            let reports = downloader.fetch_tile_dates(&requests, &selection).await?;
            for report in reports.iter().filter(|r| !r.is_success()) {
                error!(
                    "No imagery for tile {} around {}{}",
                    report.tile,
                    report.date,
                    report
                        .error
                        .as_deref()
                        .map(|e| format!(": {}", e))
                        .unwrap_or_default()
                );
            }
        }
        Command::Convert {
            input,
            output,
            binary,
        } => {
            let converted = Sen2CorConverter::new(binary)
                .convert_all(&input, &output)
                .await?;
            info!("Total number of converted products: {}", converted.len());
        }
    }
    Ok(())
}
