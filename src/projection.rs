//! Universal Transverse Mercator zone selection and forward projection.
//!
//! Areas are measured in a local UTM zone so that intersection areas come out
//! in square meters. Only the forward transform is needed: tile names are
//! returned, never projected geometry.

use geo::{Coord, MapCoords, MultiPolygon};

/// WGS84 semi-major axis (meters)
const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening
const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// UTM scale factor on the central meridian
const UTM_K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// UTM zone number for a geographic point, including the Norway and Svalbard exceptions.
pub fn utm_zone(longitude: f64, latitude: f64) -> u32 {
    if (56.0..64.0).contains(&latitude) && (3.0..12.0).contains(&longitude) {
        return 32;
    }
    if (72.0..=84.0).contains(&latitude) && longitude >= 0.0 {
        if longitude < 9.0 {
            return 31;
        } else if longitude < 21.0 {
            return 33;
        } else if longitude < 33.0 {
            return 35;
        } else if longitude < 42.0 {
            return 37;
        }
    }
    let zone = ((longitude + 180.0) / 6.0).floor() as i64 + 1;
    zone.clamp(1, 60) as u32
}

/// EPSG code of the WGS84 / UTM zone containing the point.
///
/// `32600 + zone` north of the equator, `32700 + zone` otherwise.
///
/// ```
/// assert_eq!(sentinel2sync::projection::epsg_code(30.5, 50.4), 32636);
/// ```
pub fn epsg_code(longitude: f64, latitude: f64) -> u32 {
    let zone = utm_zone(longitude, latitude);
    if latitude > 0.0 {
        32600 + zone
    } else {
        32700 + zone
    }
}

/// Forward transverse Mercator projection for one WGS84 / UTM zone.
#[derive(Debug, Clone, Copy)]
pub struct UtmProjection {
    epsg: u32,
    /// Central meridian in radians
    lon0: f64,
    south: bool,
    e2: f64,
    ep2: f64,
}

impl UtmProjection {
    /// Projection for a `326xx`/`327xx` EPSG code. Returns `None` for any other code.
    pub fn from_epsg(epsg: u32) -> Option<Self> {
        let (zone, south) = match epsg {
            32601..=32660 => (epsg - 32600, false),
            32701..=32760 => (epsg - 32700, true),
            _ => return None,
        };
        let central_meridian = (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0;
        let e2 = WGS84_F * (2.0 - WGS84_F);
        Some(Self {
            epsg,
            lon0: central_meridian.to_radians(),
            south,
            e2,
            ep2: e2 / (1.0 - e2),
        })
    }

    /// Projection for the zone containing the given point.
    pub fn for_point(longitude: f64, latitude: f64) -> Self {
        let epsg = epsg_code(longitude, latitude);
        // epsg_code only ever yields valid UTM codes
        Self::from_epsg(epsg).unwrap_or_else(|| unreachable!("invalid UTM code {}", epsg))
    }

    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    /// Projects a (longitude, latitude) pair in degrees to (easting, northing) in meters.
    pub fn forward(&self, longitude: f64, latitude: f64) -> (f64, f64) {
        let phi = latitude.to_radians();
        let lambda = longitude.to_radians();
        let (e2, ep2) = (self.e2, self.ep2);
        let e4 = e2 * e2;
        let e6 = e4 * e2;

        let sin_phi = phi.sin();
        let cos_phi = phi.cos();
        let tan_phi = phi.tan();

        let n = WGS84_A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
        let t = tan_phi * tan_phi;
        let c = ep2 * cos_phi * cos_phi;
        let a = cos_phi * (lambda - self.lon0);

        let m = WGS84_A
            * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
                - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
                + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
                - (35.0 * e6 / 3072.0) * (6.0 * phi).sin());

        let a2 = a * a;
        let a3 = a2 * a;
        let a4 = a3 * a;
        let a5 = a4 * a;
        let a6 = a5 * a;

        let easting = UTM_K0
            * n
            * (a + (1.0 - t + c) * a3 / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a5 / 120.0)
            + FALSE_EASTING;

        let mut northing = UTM_K0
            * (m + n
                * tan_phi
                * (a2 / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a6 / 720.0));
        if self.south {
            northing += FALSE_NORTHING_SOUTH;
        }

        (easting, northing)
    }

    /// Projects every vertex of a geographic geometry.
    pub fn project(&self, geometry: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        geometry.map_coords(|coord| {
            let (x, y) = self.forward(coord.x, coord.y);
            Coord { x, y }
        })
    }
}
