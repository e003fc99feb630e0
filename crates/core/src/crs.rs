//! Coordinate reference systems accepted on import.
//!
//! Production geometry is stored in EPSG:4326 with CRS84 axis order
//! (longitude first). Sources in Web Mercator or a WGS84 UTM zone are
//! reprojected on read; anything else is rejected up front.

use std::f64::consts::PI;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ImportError;
use crate::geometry::{Geometry, Position};

/// The CRS production records are stored in.
pub const CANONICAL_CRS: &str = "EPSG:4326";

/// WGS84 semi-major axis in metres.
const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening.
const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// UTM central meridian scale factor.
const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Matches `EPSG:4326`, `urn:ogc:def:crs:EPSG::4326`,
/// `urn:ogc:def:crs:EPSG:6.6:4326` and `.../def/crs/EPSG/0/4326`.
static EPSG_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)EPSG(?:(?::[0-9.]*)?::?|/[0-9.]+/)(\d+)$").expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crs {
    /// Geographic WGS84 and datums treated as coincident with it.
    Wgs84,
    /// Spherical Web Mercator (EPSG:3857 and its legacy aliases).
    WebMercator,
    /// WGS84 / UTM zone `zone`, northern or southern hemisphere.
    Utm { zone: u8, north: bool },
}

impl Crs {
    /// Parse a CRS identifier as written in files or configuration.
    pub fn parse(input: &str) -> Result<Crs, ImportError> {
        let trimmed = input.trim();
        let upper = trimmed.to_ascii_uppercase();
        if upper.ends_with("CRS84") {
            return Ok(Crs::Wgs84);
        }
        if let Ok(code) = trimmed.parse::<i64>() {
            return Crs::from_epsg(code);
        }
        let code = EPSG_CODE_RE
            .captures(trimmed)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<i64>().ok())
            .ok_or_else(|| ImportError::InvalidCrs(trimmed.to_string()))?;
        Crs::from_epsg(code)
    }

    pub fn from_epsg(code: i64) -> Result<Crs, ImportError> {
        match code {
            4326 | 4258 | 4269 => Ok(Crs::Wgs84),
            3857 | 3785 | 900913 | 102100 | 102113 => Ok(Crs::WebMercator),
            32601..=32660 => Ok(Crs::Utm {
                zone: (code - 32600) as u8,
                north: true,
            }),
            32701..=32760 => Ok(Crs::Utm {
                zone: (code - 32700) as u8,
                north: false,
            }),
            other => Err(ImportError::InvalidCrs(format!("EPSG:{other}"))),
        }
    }

    /// The `EPSG:<code>` identifier recorded on the version.
    pub fn code(&self) -> String {
        match self {
            Crs::Wgs84 => CANONICAL_CRS.to_string(),
            Crs::WebMercator => "EPSG:3857".to_string(),
            Crs::Utm { zone, north: true } => format!("EPSG:{}", 32600 + u32::from(*zone)),
            Crs::Utm { zone, north: false } => format!("EPSG:{}", 32700 + u32::from(*zone)),
        }
    }

    pub fn to_wgs84(&self, p: Position) -> Position {
        match self {
            Crs::Wgs84 => p,
            Crs::WebMercator => mercator_to_wgs84(p),
            Crs::Utm { zone, north } => utm_to_wgs84(p, *zone, *north),
        }
    }

    pub fn reproject(&self, geometry: &Geometry) -> Geometry {
        match self {
            Crs::Wgs84 => geometry.clone(),
            _ => geometry.map_positions(&|p| self.to_wgs84(p)),
        }
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.code())
    }
}

fn mercator_to_wgs84([x, y]: Position) -> Position {
    let lon = (x / WGS84_A).to_degrees();
    let lat = (2.0 * (y / WGS84_A).exp().atan() - PI / 2.0).to_degrees();
    [lon, lat]
}

/// Inverse transverse Mercator on the WGS84 ellipsoid (series expansion).
fn utm_to_wgs84([easting, northing]: Position, zone: u8, north: bool) -> Position {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let ep2 = e2 / (1.0 - e2);
    let x = easting - UTM_FALSE_EASTING;
    let y = if north {
        northing
    } else {
        northing - UTM_FALSE_NORTHING_SOUTH
    };

    let m = y / UTM_K0;
    let mu = m / (WGS84_A * (1.0 - e2 / 4.0 - 3.0 * e2.powi(2) / 64.0 - 5.0 * e2.powi(3) / 256.0));
    let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());

    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1.powi(2) / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let sin_phi = phi1.sin();
    let cos_phi = phi1.cos();
    let tan_phi = phi1.tan();
    let n1 = WGS84_A / (1.0 - e2 * sin_phi.powi(2)).sqrt();
    let t1 = tan_phi.powi(2);
    let c1 = ep2 * cos_phi.powi(2);
    let r1 = WGS84_A * (1.0 - e2) / (1.0 - e2 * sin_phi.powi(2)).powf(1.5);
    let d = x / (n1 * UTM_K0);

    let lat = phi1
        - (n1 * tan_phi / r1)
            * (d.powi(2) / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1.powi(2) - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1.powi(2) - 252.0 * ep2
                    - 3.0 * c1.powi(2))
                    * d.powi(6)
                    / 720.0);

    let lon0 = (f64::from(zone) - 1.0) * 6.0 - 180.0 + 3.0;
    let lon = lon0
        + ((d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1.powi(2) + 8.0 * ep2 + 24.0 * t1.powi(2))
                * d.powi(5)
                / 120.0)
            / cos_phi)
            .to_degrees();

    [lon, lat.to_degrees()]
}
