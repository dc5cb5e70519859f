//! Asset resolution: turn a tile, a date range and a band set into the
//! concrete objects to download.

use crate::error::{Result, SentinelError};
use crate::metadata::meets_constraints;
use crate::store::{ObjectInfo, ObjectStore};
use crate::types::{
    Asset, Band, DateRange, ProductType, QualityConstraints, ResolverConfig, SafeProduct, TileId,
    FOLDER_MARKER_SUFFIX,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What to resolve for one tile.
#[derive(Debug, Clone, Copy)]
pub struct AssetQuery<'a> {
    pub product_type: ProductType,
    pub tile: &'a TileId,
    pub date_range: DateRange,
    pub bands: &'a BTreeSet<Band>,
    pub constraints: &'a QualityConstraints,
    /// Take every object of a product instead of the band files only.
    pub full_download: bool,
}

/// Lists products of a tile and picks the objects worth downloading.
pub struct AssetResolver {
    store: Arc<dyn ObjectStore>,
    config: ResolverConfig,
}

impl AssetResolver {
    pub fn new(store: Arc<dyn ObjectStore>, config: ResolverConfig) -> Self {
        Self { store, config }
    }

    /// File-name suffixes for the requested bands, limited to the known bands.
    pub fn file_suffixes(
        &self,
        product: ProductType,
        bands: &BTreeSet<Band>,
    ) -> Result<Vec<String>> {
        let suffixes: Vec<String> = bands
            .intersection(&self.config.known_bands)
            .map(|band| band.file_suffix(product))
            .collect();
        if suffixes.is_empty() {
            return Err(SentinelError::Config(
                "None of the requested bands is supported".to_string(),
            ));
        }
        Ok(suffixes)
    }

    /// Product folders of the tile acquired within the date range.
    ///
    /// A folder whose name carries no acquisition timestamp is an error.
    pub async fn products_in_range(
        &self,
        product_type: ProductType,
        tile: &TileId,
        date_range: &DateRange,
    ) -> Result<Vec<SafeProduct>> {
        let tile_prefix = tile.prefix(product_type);
        let safe_prefixes = self.store.list_prefixes(&tile_prefix, "/").await?;
        debug!("{} products under {}", safe_prefixes.len(), tile_prefix);

        let mut products = Vec::new();
        for prefix in &safe_prefixes {
            let product = SafeProduct::from_prefix(prefix)?;
            if date_range.contains(product.acquisition_date()) {
                products.push(product);
            }
        }
        debug!(
            "{} products of {} acquired between {} and {}",
            products.len(),
            tile,
            date_range.start(),
            date_range.end()
        );
        Ok(products)
    }

    /// Every asset to download for one tile.
    ///
    /// Products failing the quality gate contribute nothing; an empty result
    /// means nothing qualified.
    pub async fn resolve(&self, query: AssetQuery<'_>) -> Result<Vec<Asset>> {
        let suffixes = self.file_suffixes(query.product_type, query.bands)?;
        debug!("File suffixes: {:?}", suffixes);

        let products = self
            .products_in_range(query.product_type, query.tile, &query.date_range)
            .await?;

        let mut assets = Vec::new();
        for product in &products {
            let selected = self.product_assets(product, &suffixes, &query).await?;
            debug!("{} assets selected from {}", selected.len(), product.name);
            assets.extend(selected);
        }

        info!(
            "Resolved {} assets from {} products for tile {}",
            assets.len(),
            products.len(),
            query.tile
        );
        Ok(assets)
    }

    async fn product_assets(
        &self,
        product: &SafeProduct,
        suffixes: &[String],
        query: &AssetQuery<'_>,
    ) -> Result<Vec<Asset>> {
        let granule_prefix = format!("{}GRANULE/", product.prefix);
        let granule_objects = self.store.list_objects(&granule_prefix).await?;

        let metadata: Vec<&ObjectInfo> = granule_objects
            .iter()
            .filter(|object| object.name.ends_with(&self.config.metadata_suffix))
            .collect();
        if metadata.is_empty() {
            warn!(
                "No {} found for {}, skipping",
                self.config.metadata_suffix, product.name
            );
            return Ok(Vec::new());
        }
        for object in &metadata {
            if !self.passes_quality(&object.name, query.constraints).await {
                return Ok(Vec::new());
            }
        }

        if query.full_download {
            let objects = self.store.list_objects(&product.prefix).await?;
            return Ok(objects
                .into_iter()
                .filter_map(|object| mirrored_asset(product, object))
                .collect());
        }

        Ok(granule_objects
            .into_iter()
            .filter(|object| !object.is_directory_marker)
            .filter(|object| {
                object.name.ends_with(&self.config.metadata_suffix)
                    || suffixes.iter().any(|suffix| object.name.ends_with(suffix.as_str()))
            })
            .map(|object| flattened_asset(product, object))
            .collect())
    }

    /// Fetches and checks one metadata object. Any failure rejects the product.
    async fn passes_quality(&self, name: &str, constraints: &QualityConstraints) -> bool {
        if constraints.is_empty() {
            return true;
        }
        let xml = match self.store.fetch(name).await {
            Ok(xml) => xml,
            Err(e) => {
                warn!("Error fetching metadata {}: {}", name, e);
                return false;
            }
        };
        match meets_constraints(&xml, constraints, name) {
            Ok(passed) => passed,
            Err(e) => {
                warn!("Error parsing metadata {}: {}", name, e);
                false
            }
        }
    }
}

/// `<product stem>/<basename>`
fn flattened_asset(product: &SafeProduct, object: ObjectInfo) -> Asset {
    let basename = object.name.rsplit('/').next().unwrap_or_default();
    Asset {
        relative_path: PathBuf::from(product.stem()).join(basename),
        product: product.name.clone(),
        is_directory_marker: false,
        size: object.size,
        name: object.name,
    }
}

/// `<product folder>/<path below the product>`, folder markers mapped to directories.
fn mirrored_asset(product: &SafeProduct, object: ObjectInfo) -> Option<Asset> {
    let rest = object.name.strip_prefix(&product.prefix)?;
    let rest = if object.is_directory_marker {
        rest.strip_suffix(FOLDER_MARKER_SUFFIX).unwrap_or(rest)
    } else {
        rest
    };

    let mut relative_path = PathBuf::from(&product.name);
    for component in rest.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                warn!("Skipping object with parent reference: {}", object.name);
                return None;
            }
            component => relative_path.push(component),
        }
    }

    Some(Asset {
        relative_path,
        product: product.name.clone(),
        is_directory_marker: object.is_directory_marker,
        size: object.size,
        name: object.name,
    })
}
