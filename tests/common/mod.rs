#![allow(dead_code)]

use sentinel2sync::{DownloadConfig, MemoryStore, ProductType};
use std::time::Duration;

pub const TILE: &str = "36UYA";

/// Config suited for tests: no progress bar, fast retries.
pub fn test_config(workers: usize) -> DownloadConfig {
    DownloadConfig {
        max_concurrent_downloads: workers,
        transfer_timeout: Some(Duration::from_secs(5)),
        retry_attempts: 1,
        retry_interval: Duration::from_millis(1),
        show_progress: false,
        ..DownloadConfig::default()
    }
}

pub fn tile_metadata(cloudy: f64) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<n1:Level-1C_Tile_ID xmlns:n1="https://psd-14.sentinel2.eo.esa.int/PSD/S2_PDI_Level-1C_Tile_Metadata.xsd">
  <n1:Quality_Indicators_Info metadataLevel="Standard">
    <Image_Content_QI>
      <CLOUDY_PIXEL_PERCENTAGE>{}</CLOUDY_PIXEL_PERCENTAGE>
      <n1:NODATA_PIXEL_PERCENTAGE>0.0</n1:NODATA_PIXEL_PERCENTAGE>
    </Image_Content_QI>
  </n1:Quality_Indicators_Info>
</n1:Level-1C_Tile_ID>"#,
        cloudy
    )
}

/// Objects of one stored product.
pub struct ProductFixture {
    /// Product folder name, ending in `.SAFE`.
    pub name: String,
    /// Remote prefix of the folder, ending in `/`.
    pub prefix: String,
    pub metadata: String,
    pub tci: String,
    pub b04: String,
}

impl ProductFixture {
    pub fn stem(&self) -> &str {
        self.name.trim_end_matches(".SAFE")
    }
}

/// Stores a product of `tile` acquired at `timestamp` (`YYYYMMDDTHHMMSS`).
///
/// The product holds a manifest, a folder marker, the granule metadata and
/// two band images.
pub fn add_product(
    store: &MemoryStore,
    product_type: ProductType,
    tile: &str,
    timestamp: &str,
    cloudy: f64,
) -> ProductFixture {
    let (root, level, tci_suffix, b04_suffix, image_dir) = match product_type {
        ProductType::L1C => ("", "L1C", "TCI.jp2", "B04.jp2", "IMG_DATA"),
        ProductType::L2A => (
            "L2/",
            "L2A",
            "TCI_10m.jp2",
            "B04_10m.jp2",
            "IMG_DATA/R10m",
        ),
    };
    let zone = &tile[..2];
    let band = &tile[2..3];
    let square = &tile[3..];
    let name = format!(
        "S2A_MSI{}_{}_N0209_R107_T{}_{}.SAFE",
        level, timestamp, tile, timestamp
    );
    let prefix = format!("{}tiles/{}/{}/{}/{}/", root, zone, band, square, name);
    let granule = format!(
        "{}GRANULE/{}_T{}_A026206_{}/",
        prefix, level, tile, timestamp
    );

    let fixture = ProductFixture {
        metadata: format!("{}MTD_TL.xml", granule),
        tci: format!(
            "{}{}/T{}_{}_{}",
            granule, image_dir, tile, timestamp, tci_suffix
        ),
        b04: format!(
            "{}{}/T{}_{}_{}",
            granule, image_dir, tile, timestamp, b04_suffix
        ),
        name,
        prefix,
    };

    store.insert(format!("{}manifest.safe", fixture.prefix), "<manifest/>");
    store.insert(format!("{}AUX_DATA_$folder$", fixture.prefix), "");
    store.insert(fixture.metadata.clone(), tile_metadata(cloudy));
    store.insert(fixture.tci.clone(), format!("tci of {}", timestamp));
    store.insert(fixture.b04.clone(), format!("b04 of {}", timestamp));
    fixture
}
