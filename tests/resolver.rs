mod common;

use common::{add_product, TILE};
use sentinel2sync::{
    AssetQuery, AssetResolver, Band, DateRange, MemoryStore, ProductType, QualityConstraints,
    ResolverConfig, TileId,
};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

fn tci() -> BTreeSet<Band> {
    [Band::TCI].into_iter().collect()
}

fn query<'a>(
    product_type: ProductType,
    tile: &'a TileId,
    range: &str,
    bands: &'a BTreeSet<Band>,
    constraints: &'a QualityConstraints,
    full_download: bool,
) -> AssetQuery<'a> {
    let (start, end) = range.split_once("..").unwrap();
    AssetQuery {
        product_type,
        tile,
        date_range: DateRange::parse(start, end).unwrap(),
        bands,
        constraints,
        full_download,
    }
}

#[tokio::test]
async fn test_cloudy_product_is_rejected() {
    let store = MemoryStore::new();
    let cloudy = add_product(&store, ProductType::L1C, TILE, "20200703T084601", 12.5);
    let clear = add_product(&store, ProductType::L1C, TILE, "20200706T085601", 3.0);
    let resolver = AssetResolver::new(Arc::new(store), ResolverConfig::default());

    let tile: TileId = TILE.parse().unwrap();
    let bands = tci();
    let constraints =
        QualityConstraints::none().with(QualityConstraints::CLOUDY_PIXEL_PERCENTAGE, 10.0);
    let assets = resolver
        .resolve(query(
            ProductType::L1C,
            &tile,
            "2020-07-01..2020-07-10",
            &bands,
            &constraints,
            false,
        ))
        .await
        .unwrap();

    assert!(assets.iter().all(|a| a.product == clear.name));
    assert!(!assets.iter().any(|a| a.product == cloudy.name));
    assert_eq!(assets.len(), 2);
}

#[tokio::test]
async fn test_filtered_mode_selects_band_and_metadata() {
    let store = MemoryStore::new();
    let product = add_product(&store, ProductType::L1C, TILE, "20200703T084601", 0.0);
    let resolver = AssetResolver::new(Arc::new(store), ResolverConfig::default());

    let tile: TileId = TILE.parse().unwrap();
    let bands = tci();
    let constraints = QualityConstraints::default();
    let assets = resolver
        .resolve(query(
            ProductType::L1C,
            &tile,
            "2020-07-03..2020-07-03",
            &bands,
            &constraints,
            false,
        ))
        .await
        .unwrap();

    let names: BTreeSet<&str> = assets.iter().map(|a| a.name.as_str()).collect();
    let expected: BTreeSet<&str> = [product.metadata.as_str(), product.tci.as_str()]
        .into_iter()
        .collect();
    assert_eq!(names, expected);

    for asset in &assets {
        assert!(!asset.is_directory_marker);
        assert_eq!(
            asset.relative_path.parent(),
            Some(Path::new(product.stem()))
        );
    }
}

#[tokio::test]
async fn test_l2a_products_live_under_l2_root() {
    let store = MemoryStore::new();
    add_product(&store, ProductType::L1C, TILE, "20200703T084601", 0.0);
    let l2a = add_product(&store, ProductType::L2A, TILE, "20200703T084601", 0.0);
    let resolver = AssetResolver::new(Arc::new(store), ResolverConfig::default());

    let tile: TileId = TILE.parse().unwrap();
    let bands: BTreeSet<Band> = [Band::TCI, Band::B04].into_iter().collect();
    let constraints = QualityConstraints::default();
    let assets = resolver
        .resolve(query(
            ProductType::L2A,
            &tile,
            "2020-07-01..2020-07-05",
            &bands,
            &constraints,
            false,
        ))
        .await
        .unwrap();

    assert_eq!(assets.len(), 3);
    assert!(assets.iter().all(|a| a.name.starts_with("L2/tiles/36/U/YA/")));
    assert!(assets.iter().any(|a| a.name == l2a.b04));
}

#[tokio::test]
async fn test_full_mode_mirrors_product() {
    let store = MemoryStore::new();
    let product = add_product(&store, ProductType::L1C, TILE, "20200703T084601", 0.0);
    let resolver = AssetResolver::new(Arc::new(store), ResolverConfig::default());

    let tile: TileId = TILE.parse().unwrap();
    let bands = tci();
    let constraints = QualityConstraints::default();
    let assets = resolver
        .resolve(query(
            ProductType::L1C,
            &tile,
            "2020-07-03..2020-07-03",
            &bands,
            &constraints,
            true,
        ))
        .await
        .unwrap();

    // manifest, folder marker, metadata and both bands
    assert_eq!(assets.len(), 5);
    let marker = assets.iter().find(|a| a.is_directory_marker).unwrap();
    assert_eq!(
        marker.relative_path,
        Path::new(&product.name).join("AUX_DATA")
    );
    assert!(assets
        .iter()
        .all(|a| a.relative_path.starts_with(Path::new(&product.name))));
    assert!(assets.iter().any(|a| a.name == product.b04));
}

#[tokio::test]
async fn test_granule_markers_only_in_full_mode() {
    let store = MemoryStore::new();
    let product = add_product(&store, ProductType::L1C, TILE, "20200703T084601", 0.0);
    // A marker whose name would otherwise match the TCI suffix
    let marker = format!("{}_$folder$", product.tci);
    store.insert(marker.clone(), "");
    let resolver = AssetResolver::new(Arc::new(store), ResolverConfig::default());

    let tile: TileId = TILE.parse().unwrap();
    let bands = tci();
    let constraints = QualityConstraints::default();
    let filtered = resolver
        .resolve(query(
            ProductType::L1C,
            &tile,
            "2020-07-03..2020-07-03",
            &bands,
            &constraints,
            false,
        ))
        .await
        .unwrap();
    assert_eq!(filtered.len(), 2);
    assert!(filtered.iter().all(|a| !a.is_directory_marker));
    assert!(!filtered.iter().any(|a| a.name == marker));

    let full = resolver
        .resolve(query(
            ProductType::L1C,
            &tile,
            "2020-07-03..2020-07-03",
            &bands,
            &constraints,
            true,
        ))
        .await
        .unwrap();
    let mirrored = full.iter().find(|a| a.name == marker).unwrap();
    assert!(mirrored.is_directory_marker);
    assert_eq!(full.iter().filter(|a| a.is_directory_marker).count(), 2);
}

#[tokio::test]
async fn test_products_outside_range_are_ignored() {
    let store = MemoryStore::new();
    add_product(&store, ProductType::L1C, TILE, "20200630T084601", 0.0);
    let inside = add_product(&store, ProductType::L1C, TILE, "20200702T084601", 0.0);
    add_product(&store, ProductType::L1C, TILE, "20200705T084601", 0.0);
    let resolver = AssetResolver::new(Arc::new(store), ResolverConfig::default());

    let tile: TileId = TILE.parse().unwrap();
    let range = DateRange::parse("2020-07-01", "2020-07-04").unwrap();
    let products = resolver
        .products_in_range(ProductType::L1C, &tile, &range)
        .await
        .unwrap();
    assert_eq!(products.len(), 1);
    assert_eq!(products[0].name, inside.name);
}

#[tokio::test]
async fn test_unreadable_metadata_rejects_product() {
    let store = MemoryStore::new();
    let broken = add_product(&store, ProductType::L1C, TILE, "20200703T084601", 0.0);
    store.insert(
        broken.metadata.clone(),
        "<CLOUDY_PIXEL_PERCENTAGE>unknown</CLOUDY_PIXEL_PERCENTAGE>",
    );
    let unreachable = add_product(&store, ProductType::L1C, TILE, "20200704T084601", 0.0);
    store.fail_on(unreachable.metadata.clone());
    let resolver = AssetResolver::new(Arc::new(store), ResolverConfig::default());

    let tile: TileId = TILE.parse().unwrap();
    let bands = tci();
    let constraints = QualityConstraints::default();
    let assets = resolver
        .resolve(query(
            ProductType::L1C,
            &tile,
            "2020-07-01..2020-07-05",
            &bands,
            &constraints,
            false,
        ))
        .await
        .unwrap();
    assert!(assets.is_empty());
}

#[tokio::test]
async fn test_product_without_metadata_is_rejected() {
    let store = MemoryStore::new();
    store.insert(
        "tiles/36/U/YA/S2A_MSIL1C_20200703T084601_N0209_R107_T36UYA_20200703T105438.SAFE/GRANULE/L1C/IMG_DATA/T36UYA_20200703T084601_TCI.jp2",
        "tci",
    );
    let resolver = AssetResolver::new(Arc::new(store), ResolverConfig::default());

    let tile: TileId = TILE.parse().unwrap();
    let bands = tci();
    let constraints = QualityConstraints::none();
    let assets = resolver
        .resolve(query(
            ProductType::L1C,
            &tile,
            "2020-07-01..2020-07-05",
            &bands,
            &constraints,
            false,
        ))
        .await
        .unwrap();
    assert!(assets.is_empty());
}
