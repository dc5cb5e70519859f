//! sentinel2sync - Sentinel-2 tile selection and imagery downloader
//!
//! This library finds the Sentinel-2 grid tiles covering an area of interest
//! and downloads the matching products from the public Google Cloud Storage
//! bucket, with quality filtering and bounded-concurrency transfers.
//!
//! # Features
//!
//! - **Tile Selection**: Greedy minimal cover of an AOI by grid tiles, with areas computed in UTM
//! - **Quality Gate**: Products are filtered by metrics read from their `MTD_TL.xml`
//! - **Band Filtering**: Fetch only the requested bands, or mirror whole `.SAFE` products
//! - **Skip Existing**: Files already on disk are never downloaded again
//! - **MD5 Verification**: Transfers are verified against ETag/MD5 checksums
//! - **Automatic Retry**: Per-attempt timeouts and fixed-interval retries
//!
//! # Example
//!
//! ```no_run
//! use sentinel2sync::{
//!     Band, DateRange, DownloadConfig, DownloadRequest, ProductSelection, ProductType,
//!     QualityConstraints, Sentinel2Downloader,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = Sentinel2Downloader::from_config(DownloadConfig::default())?;
//! let request = DownloadRequest {
//!     selection: ProductSelection {
//!         product_type: ProductType::L2A,
//!         bands: [Band::TCI].into_iter().collect(),
//!         constraints: QualityConstraints::none()
//!             .with(QualityConstraints::CLOUDY_PIXEL_PERCENTAGE, 10.0),
//!         output_dir: "./imagery".into(),
//!         full_download: false,
//!     },
//!     tiles: vec!["36UYA".parse()?],
//!     date_range: DateRange::parse("2020-07-01", "2020-07-10")?,
//! };
//!
//! let report = downloader.download(&request).await?;
//! println!("{} assets on disk", report.retrieved());
//! # Ok(())
//! # }
//! ```

pub mod convert;
mod download;
pub mod error;
pub mod metadata;
pub mod orchestrator;
pub mod overlap;
pub mod projection;
pub mod resolver;
pub mod scheduler;
pub mod store;
pub mod types;

pub use convert::Sen2CorConverter;
pub use error::{Result, SentinelError};
pub use orchestrator::{plan, DownloadReport, Sentinel2Downloader, TileDateReport};
pub use overlap::{
    overlap, overlap_files, AreaOfInterest, GridTile, TileGrid, DEFAULT_AREA_LIMIT_KM2,
};
pub use projection::{epsg_code, utm_zone, UtmProjection};
pub use resolver::{AssetQuery, AssetResolver};
pub use scheduler::DownloadScheduler;
pub use store::{GcsStore, MemoryStore, ObjectStore};
pub use types::{
    Asset, Band, DateRange, DownloadConfig, DownloadOutcome, DownloadRequest, OutcomeStatus,
    ProductSelection, ProductType, QualityConstraints, ResolverConfig, SafeProduct, TileDate,
    TileId,
};
