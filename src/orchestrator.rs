//! Per-tile sequencing of resolution and download.

use crate::error::Result;
use crate::resolver::{AssetQuery, AssetResolver};
use crate::scheduler::DownloadScheduler;
use crate::store::{GcsStore, ObjectStore};
use crate::types::{
    Asset, DateRange, DownloadConfig, DownloadOutcome, DownloadRequest, ProductSelection,
    ResolverConfig, TileDate, TileId,
};
use chrono::{Duration as ChronoDuration, NaiveDate};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Outcomes of a [`Sentinel2Downloader::download`] run.
#[derive(Debug, Default)]
pub struct DownloadReport {
    /// One entry per resolved asset.
    pub outcomes: Vec<DownloadOutcome>,
    /// Tiles whose discovery failed, with the reason.
    pub tile_errors: Vec<(TileId, String)>,
}

impl DownloadReport {
    /// Number of assets that ended up on disk.
    pub fn retrieved(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_retrieved()).count()
    }
}

/// Result of fetching one (tile, date) pair.
#[derive(Debug)]
pub struct TileDateReport {
    pub tile: TileId,
    pub date: NaiveDate,
    /// Acquisition date that finally had products, possibly shifted from `date`.
    pub matched_date: Option<NaiveDate>,
    pub outcomes: Vec<DownloadOutcome>,
    pub error: Option<String>,
}

impl TileDateReport {
    pub fn is_success(&self) -> bool {
        self.matched_date.is_some()
    }
}

/// Every (tile, day) pair of the range, tile by tile.
pub fn plan(tiles: &[TileId], date_range: &DateRange) -> Vec<TileDate> {
    tiles
        .iter()
        .flat_map(|tile| {
            date_range.days().map(move |date| TileDate {
                tile: tile.clone(),
                date,
            })
        })
        .collect()
}

/// Non-zero day offsets tried when an exact date has no product, in ascending order.
pub fn date_bias_offsets(half_width: i64) -> Vec<i64> {
    (-half_width..=half_width)
        .filter(|offset| *offset != 0)
        .collect()
}

/// Resolves and downloads imagery tile by tile.
pub struct Sentinel2Downloader {
    resolver: AssetResolver,
    scheduler: DownloadScheduler,
}

impl Sentinel2Downloader {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        config: DownloadConfig,
        resolver_config: ResolverConfig,
    ) -> Result<Self> {
        Ok(Self {
            resolver: AssetResolver::new(Arc::clone(&store), resolver_config),
            scheduler: DownloadScheduler::new(store, config)?,
        })
    }

    /// Downloader for the public bucket described by `config`.
    pub fn from_config(config: DownloadConfig) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = Arc::new(GcsStore::from_config(&config));
        Self::new(store, config, ResolverConfig::default())
    }

    /// Downloads every qualifying asset of every tile within the date range.
    ///
    /// Configuration errors abort before any request is made. A tile whose
    /// discovery fails is reported in `tile_errors` and the next tile proceeds.
    pub async fn download(&self, request: &DownloadRequest) -> Result<DownloadReport> {
        let selection = &request.selection;
        self.resolver
            .file_suffixes(selection.product_type, &selection.bands)?;
        tokio::fs::create_dir_all(&selection.output_dir).await?;

        let mut report = DownloadReport::default();
        for tile in &request.tiles {
            info!("Loading assets for tile {}", tile);
            match self.resolve(selection, tile, request.date_range).await {
                Ok(assets) => {
                    let outcomes = self.scheduler.fetch(assets, &selection.output_dir).await;
                    report.outcomes.extend(outcomes);
                }
                Err(e) => {
                    error!("❌ Failed to resolve assets for tile {}: {}", tile, e);
                    report.tile_errors.push((tile.clone(), e.to_string()));
                }
            }
        }

        info!(
            "Downloaded {}/{} assets for {} tile(s)",
            report.retrieved(),
            report.outcomes.len(),
            request.tiles.len()
        );
        Ok(report)
    }

    /// Fetches each (tile, date) pair, searching nearby dates when the exact one has nothing.
    ///
    /// Published acquisition dates may drift a day or two from the nominal
    /// one, so each offset of `±date_bias_days` is tried in turn until one
    /// resolves assets.
    pub async fn fetch_tile_dates(
        &self,
        requests: &[TileDate],
        selection: &ProductSelection,
    ) -> Result<Vec<TileDateReport>> {
        self.resolver
            .file_suffixes(selection.product_type, &selection.bands)?;
        tokio::fs::create_dir_all(&selection.output_dir).await?;

        let start_time = Instant::now();
        let offsets = date_bias_offsets(self.scheduler.config().date_bias_days);
        let mut reports = Vec::with_capacity(requests.len());

        for (idx, request) in requests.iter().enumerate() {
            info!(
                "Tile number {} out of {}, tile id - {}, image date - {}",
                idx + 1,
                requests.len(),
                request.tile,
                request.date
            );
            let mut report = TileDateReport {
                tile: request.tile.clone(),
                date: request.date,
                matched_date: None,
                outcomes: Vec::new(),
                error: None,
            };

            let candidates = std::iter::once(0).chain(offsets.iter().copied());
            for offset in candidates {
                let date = request.date + ChronoDuration::days(offset);
                let resolved = self
                    .resolve(selection, &request.tile, DateRange::single(date))
                    .await;
                match resolved {
                    Ok(assets) if assets.is_empty() => continue,
                    Ok(assets) => {
                        if offset != 0 {
                            info!(
                                "Using {} instead of {} for tile {}",
                                date, request.date, request.tile
                            );
                        }
                        let output_dir = &selection.output_dir;
                        report.matched_date = Some(date);
                        report.outcomes = self.scheduler.fetch(assets, output_dir).await;
                        break;
                    }
                    Err(e) => {
                        error!(
                            "❌ Failed to resolve assets for tile {}: {}",
                            request.tile, e
                        );
                        report.error = Some(e.to_string());
                        break;
                    }
                }
            }

            if !report.is_success() && report.error.is_none() {
                warn!(
                    "No products for tile {} around {}",
                    request.tile, request.date
                );
            }
            reports.push(report);
        }

        let succeeded = reports.iter().filter(|r| r.is_success()).count();
        info!("Downloaded: {}/{}", succeeded, reports.len());
        info!(
            "Download took a total of {:.2} minutes",
            start_time.elapsed().as_secs_f64() / 60.0
        );
        Ok(reports)
    }

    async fn resolve(
        &self,
        selection: &ProductSelection,
        tile: &TileId,
        date_range: DateRange,
    ) -> Result<Vec<Asset>> {
        self.resolver
            .resolve(AssetQuery {
                product_type: selection.product_type,
                tile,
                date_range,
                bands: &selection.bands,
                constraints: &selection.constraints,
                full_download: selection.full_download,
            })
            .await
    }
}
