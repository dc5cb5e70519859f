//! Data structures shared by the resolver, the scheduler and the orchestrator.

use crate::error::{Result, SentinelError};
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

/// Suffix the bucket uses for zero-byte "folder" placeholder objects.
pub const FOLDER_MARKER_SUFFIX: &str = "_$folder$";

/// Processing level of a Sentinel-2 product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductType {
    /// Top-of-atmosphere reflectance.
    L1C,
    /// Bottom-of-atmosphere reflectance.
    L2A,
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductType::L1C => f.write_str("L1C"),
            ProductType::L2A => f.write_str("L2A"),
        }
    }
}

impl FromStr for ProductType {
    type Err = SentinelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "L1C" => Ok(ProductType::L1C),
            "L2A" => Ok(ProductType::L2A),
            other => Err(SentinelError::Config(format!(
                "Incorrect product level: {}. Required one of `L2A` or `L1C`",
                other
            ))),
        }
    }
}

/// Spectral and auxiliary channels of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Band {
    TCI,
    B01,
    B02,
    B03,
    B04,
    B05,
    B06,
    B07,
    B08,
    B8A,
    B09,
    B10,
    B11,
    B12,
    /// Scene classification map (L2A only).
    SCL,
    /// Cloud probability mask (L2A only).
    CLD,
}

impl Band {
    /// Every band the resolver knows how to map to a file name.
    pub const ALL: [Band; 16] = [
        Band::TCI,
        Band::B01,
        Band::B02,
        Band::B03,
        Band::B04,
        Band::B05,
        Band::B06,
        Band::B07,
        Band::B08,
        Band::B8A,
        Band::B09,
        Band::B10,
        Band::B11,
        Band::B12,
        Band::SCL,
        Band::CLD,
    ];

    /// Band identifier as it appears in object names.
    pub fn as_str(self) -> &'static str {
        match self {
            Band::TCI => "TCI",
            Band::B01 => "B01",
            Band::B02 => "B02",
            Band::B03 => "B03",
            Band::B04 => "B04",
            Band::B05 => "B05",
            Band::B06 => "B06",
            Band::B07 => "B07",
            Band::B08 => "B08",
            Band::B8A => "B8A",
            Band::B09 => "B09",
            Band::B10 => "B10",
            Band::B11 => "B11",
            Band::B12 => "B12",
            Band::SCL => "SCL",
            Band::CLD => "CLD",
        }
    }

    /// File-name suffix identifying this band inside a granule.
    ///
    /// L2A products store each band once per native resolution folder, and the
    /// cloud mask lives under `QI_DATA` rather than `IMG_DATA`.
    pub fn file_suffix(self, product: ProductType) -> String {
        match product {
            ProductType::L1C => format!("{}.jp2", self.as_str()),
            ProductType::L2A => match self {
                Band::CLD => "QI_DATA/MSK_CLDPRB_20m.jp2".to_string(),
                Band::TCI | Band::B02 | Band::B03 | Band::B04 | Band::B08 => {
                    format!("{}_10m.jp2", self.as_str())
                }
                Band::B05
                | Band::B06
                | Band::B07
                | Band::B8A
                | Band::B11
                | Band::B12
                | Band::SCL => {
                    format!("{}_20m.jp2", self.as_str())
                }
                _ => format!("{}_60m.jp2", self.as_str()),
            },
        }
    }

    /// Intersects user-supplied band names with the `known` set.
    ///
    /// Unknown names are dropped; an empty intersection is a configuration error.
    pub fn select<I, S>(names: I, known: &BTreeSet<Band>) -> Result<BTreeSet<Band>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut selected = BTreeSet::new();
        for name in names {
            match name.as_ref().parse::<Band>() {
                Ok(band) if known.contains(&band) => {
                    selected.insert(band);
                }
                _ => tracing::warn!("Ignoring unknown band '{}'", name.as_ref()),
            }
        }
        if selected.is_empty() {
            return Err(SentinelError::Config(
                "None of the requested bands is supported".to_string(),
            ));
        }
        Ok(selected)
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Band {
    type Err = SentinelError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        Band::ALL
            .iter()
            .copied()
            .find(|band| band.as_str() == upper)
            .ok_or_else(|| SentinelError::Config(format!("Unknown band: {}", s)))
    }
}

/// Identifier of a Military Grid Reference System tile, e.g. `36UYA`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TileId(String);

impl TileId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// UTM zone number, e.g. `"36"`.
    pub fn utm_zone(&self) -> &str {
        &self.0[..2]
    }

    /// Latitude band letter, e.g. `"U"`.
    pub fn latitude_band(&self) -> &str {
        &self.0[2..3]
    }

    /// 100 km grid square, e.g. `"YA"`.
    pub fn grid_square(&self) -> &str {
        &self.0[3..]
    }

    /// Remote prefix holding every product of this tile.
    pub fn prefix(&self, product: ProductType) -> String {
        let prefix = format!(
            "tiles/{}/{}/{}/",
            self.utm_zone(),
            self.latitude_band(),
            self.grid_square()
        );
        match product {
            ProductType::L1C => prefix,
            ProductType::L2A => format!("L2/{}", prefix),
        }
    }
}

impl FromStr for TileId {
    type Err = SentinelError;

    fn from_str(s: &str) -> Result<Self> {
        let id = s.trim().to_ascii_uppercase();
        let bytes = id.as_bytes();
        let valid = bytes.len() == 5
            && bytes[..2].iter().all(u8::is_ascii_digit)
            && bytes[2..].iter().all(u8::is_ascii_uppercase);
        if !valid {
            return Err(SentinelError::Config(format!("Invalid tile id: {}", s)));
        }
        Ok(TileId(id))
    }
}

impl TryFrom<String> for TileId {
    type Error = SentinelError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TileId> for String {
    fn from(tile: TileId) -> Self {
        tile.0
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inclusive range of calendar days; `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(SentinelError::Config(format!(
                "Start date {} is after end date {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// A range covering exactly one day.
    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// Parses `YYYY-MM-DD` or `YYYYMMDD` bounds.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Every day of the range, in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |day| *day <= end)
    }
}

/// Parses a calendar date given as `YYYY-MM-DD` or `YYYYMMDD`.
pub fn parse_date(value: &str) -> Result<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y%m%d"))
        .map_err(|_| SentinelError::Config(format!("Malformed date: {}", value)))
}

/// Maximum allowed values for named metadata metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityConstraints(BTreeMap<String, f64>);

impl QualityConstraints {
    pub const CLOUDY_PIXEL_PERCENTAGE: &'static str = "CLOUDY_PIXEL_PERCENTAGE";
    pub const NODATA_PIXEL_PERCENTAGE: &'static str = "NODATA_PIXEL_PERCENTAGE";

    /// No constraints at all; every product is admitted.
    pub fn none() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, metric: impl Into<String>, max: f64) -> Self {
        self.0.insert(metric.into(), max);
        self
    }

    pub fn metrics(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(name, max)| (name.as_str(), *max))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for QualityConstraints {
    /// Pass-all thresholds for cloud and no-data coverage.
    fn default() -> Self {
        Self::none()
            .with(Self::NODATA_PIXEL_PERCENTAGE, 100.0)
            .with(Self::CLOUDY_PIXEL_PERCENTAGE, 100.0)
    }
}

fn acquisition_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"_(\d{8}T\d{6})_").expect("acquisition pattern is valid"))
}

/// One `.SAFE` product folder in the bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeProduct {
    /// Full remote prefix, ending with `/`.
    pub prefix: String,
    /// Folder name, e.g. `S2A_MSIL1C_20200703T084601_N0209_R107_T36UYA_20200703T105438.SAFE`.
    pub name: String,
    /// Sensing start embedded in the folder name.
    pub acquired: NaiveDateTime,
}

impl SafeProduct {
    /// Parses a product prefix returned by a delimiter listing.
    pub fn from_prefix(prefix: &str) -> Result<Self> {
        let name = prefix
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let discovery_error = || SentinelError::Discovery {
            prefix: prefix.to_string(),
        };
        let stamp = acquisition_pattern()
            .captures(&name)
            .and_then(|caps| caps.get(1))
            .ok_or_else(discovery_error)?;
        let acquired = NaiveDateTime::parse_from_str(stamp.as_str(), "%Y%m%dT%H%M%S")
            .map_err(|_| discovery_error())?;
        Ok(Self {
            prefix: prefix.to_string(),
            name,
            acquired,
        })
    }

    pub fn acquisition_date(&self) -> NaiveDate {
        self.acquired.date()
    }

    /// Folder name without the `.SAFE` extension.
    pub fn stem(&self) -> &str {
        self.name.strip_suffix(".SAFE").unwrap_or(&self.name)
    }
}

/// A single remote object selected for download.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Asset {
    /// Full remote object name.
    pub name: String,
    /// Product folder the object belongs to.
    pub product: String,
    /// Target path relative to the output directory.
    pub relative_path: PathBuf,
    /// Folder placeholder: materialized as a directory, never transferred.
    pub is_directory_marker: bool,
    /// Size advertised by the listing, when known.
    pub size: Option<u64>,
}

impl Asset {
    pub fn local_path(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(&self.relative_path)
    }
}

/// How an individual asset ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// Bytes were transferred.
    Downloaded,
    /// Target already existed; its modification time was refreshed.
    Skipped,
    /// A folder marker was mapped to a local directory.
    DirectoryCreated,
    /// The transfer failed after all attempts.
    Failed(String),
}

/// Result of fetching one asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub remote_name: String,
    /// `None` when the asset was not retrieved.
    pub local_path: Option<PathBuf>,
    pub status: OutcomeStatus,
}

impl DownloadOutcome {
    pub fn is_retrieved(&self) -> bool {
        self.local_path.is_some()
    }
}

/// A (tile, acquisition date) pair to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileDate {
    pub tile: TileId,
    pub date: NaiveDate,
}

/// Configuration for talking to the bucket and downloading assets.
///
/// # Example
///
/// ```
/// use sentinel2sync::DownloadConfig;
///
/// let config = DownloadConfig {
///     max_concurrent_downloads: 8,
///     show_progress: false,
///     ..DownloadConfig::default()
/// };
/// assert_eq!(config.bucket, "gcp-public-data-sentinel-2");
/// ```
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Storage endpoint (e.g., `https://storage.googleapis.com`)
    pub store_url: String,
    /// Bucket holding the tile tree.
    pub bucket: String,
    /// Number of transfers allowed in flight at once (default: 4).
    ///
    /// Downloads are I/O-bound, so this is limited by bandwidth, not CPU cores.
    pub max_concurrent_downloads: usize,
    /// Upper bound for a single transfer attempt. `None` disables the limit.
    pub transfer_timeout: Option<Duration>,
    /// Extra attempts after a failed transfer.
    pub retry_attempts: usize,
    /// Pause between attempts.
    pub retry_interval: Duration,
    /// Half-width of the date window searched when an exact date has no product.
    pub date_bias_days: i64,
    /// Draw a progress bar while downloading.
    pub show_progress: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            store_url: "https://storage.googleapis.com".to_string(),
            bucket: "gcp-public-data-sentinel-2".to_string(),
            max_concurrent_downloads: 4,
            transfer_timeout: Some(Duration::from_secs(600)),
            retry_attempts: 3,
            retry_interval: Duration::from_secs(5),
            date_bias_days: 2,
            show_progress: true,
        }
    }
}

/// Values the resolver treats as fixed for a run.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Bands requests are intersected with.
    pub known_bands: BTreeSet<Band>,
    /// Name suffix of the per-granule metadata object.
    pub metadata_suffix: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            known_bands: Band::ALL.into_iter().collect(),
            metadata_suffix: "MTD_TL.xml".to_string(),
        }
    }
}

/// Which objects to take from each product and where to put them.
#[derive(Debug, Clone)]
pub struct ProductSelection {
    pub product_type: ProductType,
    pub bands: BTreeSet<Band>,
    pub constraints: QualityConstraints,
    pub output_dir: PathBuf,
    /// Mirror complete products instead of the selected bands only.
    pub full_download: bool,
}

/// Everything needed to resolve and fetch imagery for a set of tiles.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub selection: ProductSelection,
    pub tiles: Vec<TileId>,
    pub date_range: DateRange,
}
