//! Point geometry encodings used by the station endpoints.
//!
//! Stations are stored as latitude/longitude pairs. They are exposed either as
//! Well-Known Text (`POINT(<lon> <lat>)`) or as GeoJSON features. Both encodings
//! put longitude first, matching the x/y order of [`geo_types::Point`].

use geo_types::Point;
use serde::Serialize;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WktError {
    #[error("unsupported WKT geometry: {0}")]
    UnsupportedGeometry(String),
    #[error("malformed WKT point: {0}")]
    Malformed(String),
}

pub fn point(lat: f64, lon: f64) -> Point<f64> {
    Point::new(lon, lat)
}

/// Encode a point as WKT.
///
/// Coordinates always keep a fractional part so that `14` renders as `14.0`.
pub fn to_wkt(point: &Point<f64>) -> String {
    format!(
        "POINT({} {})",
        format_coordinate(point.x()),
        format_coordinate(point.y())
    )
}

/// Parse a WKT `POINT`, tolerating case differences and extra whitespace.
pub fn parse_wkt_point(wkt: &str) -> Result<Point<f64>, WktError> {
    let trimmed = wkt.trim();
    let open = trimmed
        .find('(')
        .ok_or_else(|| WktError::Malformed(wkt.to_string()))?;
    let tag = trimmed[..open].trim();
    if !tag.eq_ignore_ascii_case("POINT") {
        return Err(WktError::UnsupportedGeometry(tag.to_string()));
    }

    let body = trimmed[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| WktError::Malformed(wkt.to_string()))?;
    let coordinates: Vec<f64> = body
        .split_whitespace()
        .map(str::parse::<f64>)
        .collect::<Result<_, _>>()
        .map_err(|_| WktError::Malformed(wkt.to_string()))?;

    match coordinates.as_slice() {
        [x, y] => Ok(Point::new(*x, *y)),
        _ => Err(WktError::Malformed(wkt.to_string())),
    }
}

fn format_coordinate(value: f64) -> String {
    let text = value.to_string();
    if !value.is_finite() || text.contains('.') {
        text
    } else {
        format!("{}.0", text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum GeoJsonGeometry {
    Point { coordinates: [f64; 2] },
}

impl From<&Point<f64>> for GeoJsonGeometry {
    fn from(point: &Point<f64>) -> Self {
        GeoJsonGeometry::Point {
            coordinates: [point.x(), point.y()],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename = "Feature")]
pub struct Feature<P: Serialize> {
    pub geometry: GeoJsonGeometry,
    pub properties: P,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename = "FeatureCollection")]
pub struct FeatureCollection<P: Serialize> {
    pub features: Vec<Feature<P>>,
}
