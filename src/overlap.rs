//! Tile selection: reduce an area of interest to the grid tiles covering it.

use crate::error::{Result, SentinelError};
use crate::projection::UtmProjection;
use geo::{
    Area, BooleanOps, BoundingRect, Centroid, Geometry, GeometryCollection, Intersects,
    MultiPolygon, Polygon, Rect,
};
use geojson::GeoJson;
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};
use std::cmp::Ordering;
use std::path::Path;
use tracing::{debug, info, warn};

/// Intersections smaller than this (km²) are ignored.
pub const DEFAULT_AREA_LIMIT_KM2: f64 = 0.001;

/// Area change (m²) below which a subtraction is treated as numerical noise.
const AREA_EPSILON_M2: f64 = 1e-3;

/// The region to cover, as a single polygon in longitude/latitude.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaOfInterest {
    polygon: Polygon<f64>,
}

impl AreaOfInterest {
    pub fn from_polygon(polygon: Polygon<f64>) -> Self {
        Self { polygon }
    }

    /// Builds the AOI from arbitrary geometries.
    ///
    /// A single polygon is used as is. Anything else (several features,
    /// multipolygons, lines, points) is replaced by the bounding box of all
    /// input geometry. This is intentional: multi-part regions are covered
    /// by their envelope rather than handled part by part.
    pub fn from_geometries(geometries: Vec<Geometry<f64>>) -> Result<Self> {
        if let [Geometry::Polygon(polygon)] = geometries.as_slice() {
            return Ok(Self::from_polygon(polygon.clone()));
        }

        info!(
            "Input contains {} features or the feature is not a Polygon. Bounding box will be created.",
            geometries.len()
        );
        let bbox = GeometryCollection::from(geometries)
            .bounding_rect()
            .ok_or_else(|| SentinelError::Config("Area of interest has no geometry".to_string()))?;
        info!("Bounding box: {:?}", bbox);
        Ok(Self::from_polygon(bbox.to_polygon()))
    }

    pub fn from_geojson_str(source: &str) -> Result<Self> {
        let geojson: GeoJson = source.parse()?;
        let geometries = collect_features(geojson)?
            .into_iter()
            .map(|(_, geometry)| geometry)
            .collect();
        Self::from_geometries(geometries)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_geojson_str(&source)
    }

    pub fn polygon(&self) -> &Polygon<f64> {
        &self.polygon
    }
}

/// One named cell of the tile grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridTile {
    pub name: String,
    pub geometry: MultiPolygon<f64>,
}

/// Tile grid with a bounding-box index.
pub struct TileGrid {
    tiles: Vec<GridTile>,
    index: RTree<GeomWithData<Rectangle<[f64; 2]>, usize>>,
}

impl TileGrid {
    pub fn new(tiles: Vec<GridTile>) -> Self {
        let entries = tiles
            .iter()
            .enumerate()
            .filter_map(|(position, tile)| {
                let rect = tile.geometry.bounding_rect()?;
                Some(GeomWithData::new(
                    Rectangle::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                    position,
                ))
            })
            .collect();
        Self {
            tiles,
            index: RTree::bulk_load(entries),
        }
    }

    /// Reads a GeoJSON feature collection whose features carry a `Name` property.
    pub fn from_geojson_str(source: &str) -> Result<Self> {
        let geojson: GeoJson = source.parse()?;
        let mut tiles = Vec::new();
        for (name, geometry) in collect_features(geojson)? {
            let Some(name) = name else {
                warn!("Skipping grid feature without a name");
                continue;
            };
            match polygons_of(geometry) {
                Some(geometry) => tiles.push(GridTile { name, geometry }),
                None => warn!("Skipping grid tile {} without polygon geometry", name),
            }
        }
        debug!("Loaded {} grid tiles", tiles.len());
        Ok(Self::new(tiles))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_geojson_str(&source)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Tiles whose bounding box intersects `bbox`.
    pub fn candidates(&self, bbox: &Rect<f64>) -> impl Iterator<Item = &GridTile> {
        let (min, max) = (bbox.min(), bbox.max());
        let envelope = AABB::from_corners([min.x, min.y], [max.x, max.y]);
        self.index
            .locate_in_envelope_intersecting(&envelope)
            .map(|entry| &self.tiles[entry.data])
    }
}

/// Names of the tiles needed to cover `aoi`, sorted ascending.
///
/// Tiles whose intersection with the AOI is below `limit_km2` are ignored.
/// The remaining tiles are taken greedily, largest intersection first (ties
/// by name), and a tile is kept only if it covers area no earlier tile
/// covered. Returns `None` when no tile qualifies.
pub fn overlap(aoi: &AreaOfInterest, grid: &TileGrid, limit_km2: f64) -> Option<Vec<String>> {
    info!("Start finding overlapping tiles");
    let polygon = aoi.polygon();

    if polygon.unsigned_area() == 0.0 {
        warn!("Area of interest has zero area, no tiles cover it");
        return None;
    }
    let bbox = polygon.bounding_rect()?;
    let centroid = polygon.centroid()?;

    let intersecting: Vec<&GridTile> = grid
        .candidates(&bbox)
        .filter(|tile| tile.geometry.intersects(polygon))
        .collect();
    debug!("{} tiles intersect the AOI", intersecting.len());

    let projection = UtmProjection::for_point(centroid.x(), centroid.y());
    debug!("Measuring areas in EPSG:{}", projection.epsg());

    // Working copy; the caller's AOI is never modified.
    let mut remaining = projection.project(&MultiPolygon::new(vec![polygon.clone()]));

    let mut scored: Vec<(f64, &GridTile, MultiPolygon<f64>)> = intersecting
        .into_iter()
        .filter_map(|tile| {
            let projected = projection.project(&tile.geometry);
            let area_km2 = remaining.intersection(&projected).unsigned_area() / 1e6;
            (area_km2 >= limit_km2).then_some((area_km2, tile, projected))
        })
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.1.name.cmp(&b.1.name))
    });

    let mut names = Vec::new();
    for (area_km2, tile, projected) in scored {
        let start_area = remaining.unsigned_area();
        remaining = remaining.difference(&projected);
        if start_area - remaining.unsigned_area() > AREA_EPSILON_M2 {
            debug!(
                "Tile {} contributes ({:.3} km² intersection)",
                tile.name, area_km2
            );
            names.push(tile.name.clone());
        } else {
            debug!("Tile {} is shadowed by earlier tiles", tile.name);
        }
    }

    if names.is_empty() {
        info!("No tiles found");
        return None;
    }
    names.sort();
    names.dedup();
    info!("Found {} tiles: {}", names.len(), names.join(", "));
    Some(names)
}

/// Loads both files and runs [`overlap`].
pub fn overlap_files(
    aoi_path: impl AsRef<Path>,
    grid_path: impl AsRef<Path>,
    limit_km2: f64,
) -> Result<Option<Vec<String>>> {
    let aoi = AreaOfInterest::from_file(aoi_path)?;
    let grid = TileGrid::from_file(grid_path)?;
    Ok(overlap(&aoi, &grid, limit_km2))
}

fn collect_features(geojson: GeoJson) -> Result<Vec<(Option<String>, Geometry<f64>)>> {
    let mut out = Vec::new();
    match geojson {
        GeoJson::Geometry(geometry) => out.push((None, Geometry::try_from(geometry.value)?)),
        GeoJson::Feature(feature) => {
            if let Some(entry) = feature_entry(feature)? {
                out.push(entry);
            }
        }
        GeoJson::FeatureCollection(collection) => {
            for feature in collection.features {
                if let Some(entry) = feature_entry(feature)? {
                    out.push(entry);
                }
            }
        }
    }
    Ok(out)
}

fn feature_entry(feature: geojson::Feature) -> Result<Option<(Option<String>, Geometry<f64>)>> {
    let name = ["Name", "name"]
        .iter()
        .find_map(|key| feature.property(key).and_then(|value| value.as_str()))
        .map(str::to_string);
    match feature.geometry {
        Some(geometry) => Ok(Some((name, Geometry::try_from(geometry.value)?))),
        None => Ok(None),
    }
}

fn polygons_of(geometry: Geometry<f64>) -> Option<MultiPolygon<f64>> {
    let polygons: Vec<Polygon<f64>> = match geometry {
        Geometry::Polygon(polygon) => vec![polygon],
        Geometry::MultiPolygon(multi) => multi.0,
        Geometry::Rect(rect) => vec![rect.to_polygon()],
        Geometry::GeometryCollection(collection) => collection
            .0
            .into_iter()
            .filter_map(polygons_of)
            .flat_map(|multi| multi.0)
            .collect(),
        _ => Vec::new(),
    };
    (!polygons.is_empty()).then(|| MultiPolygon::new(polygons))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{coord, LineString, Point};

    #[test]
    fn test_single_polygon_kept() {
        let polygon =
            Rect::new(coord! { x: 30.0, y: 50.0 }, coord! { x: 30.5, y: 50.5 }).to_polygon();
        let aoi =
            AreaOfInterest::from_geometries(vec![Geometry::Polygon(polygon.clone())]).unwrap();
        assert_eq!(aoi.polygon(), &polygon);
    }

    #[test]
    fn test_multiple_features_become_bbox() {
        let aoi = AreaOfInterest::from_geometries(vec![
            Geometry::Point(Point::new(30.0, 50.0)),
            Geometry::LineString(LineString::from(vec![(31.0, 50.5), (32.0, 51.0)])),
        ])
        .unwrap();
        let bbox = aoi.polygon().bounding_rect().unwrap();
        assert_eq!(bbox.min(), coord! { x: 30.0, y: 50.0 });
        assert_eq!(bbox.max(), coord! { x: 32.0, y: 51.0 });
    }

    #[test]
    fn test_empty_geometry_is_error() {
        assert!(AreaOfInterest::from_geometries(Vec::new()).is_err());
    }

    #[test]
    fn test_grid_from_geojson() {
        let source = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {"Name": "36UYA"},
                 "geometry": {"type": "Polygon", "coordinates": [[[30,50],[31,50],[31,51],[30,51],[30,50]]]}},
                {"type": "Feature", "properties": {"Name": "36UYB"},
                 "geometry": {"type": "GeometryCollection", "geometries": [
                    {"type": "Polygon", "coordinates": [[[31,50],[32,50],[32,51],[31,51],[31,50]]]},
                    {"type": "Point", "coordinates": [31.5, 50.5]}]}},
                {"type": "Feature", "properties": {"Name": "36UYC"},
                 "geometry": {"type": "Point", "coordinates": [0, 0]}}
            ]
        }"#;
        let grid = TileGrid::from_geojson_str(source).unwrap();
        assert_eq!(grid.len(), 2);

        let rect = Rect::new(coord! { x: 31.2, y: 50.2 }, coord! { x: 31.4, y: 50.4 });
        let names: Vec<&str> = grid.candidates(&rect).map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["36UYB"]);
    }
}
