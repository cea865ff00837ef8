//! WKT, GeoJSON and bounding-box text decoding, plus the dual-encoding check for
//! [`Geo`] values received from a backend.

use crate::error::{PlannerError, Result};
use geo::{Coord, CoordsIter, coord};
use geoplan_types::{BoundingBox, Geo};
use std::fmt;
use std::str::FromStr;

/// Largest per-axis difference at which two vertices are considered equal.
const VERTEX_TOLERANCE: f64 = 1e-9;

/// How the geometry text of a manual form is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryEncoding {
    Wkt,
    GeoJson,
    /// `minLon,minLat,maxLon,maxLat`
    BoundingBox,
}

impl GeometryEncoding {
    pub fn name(&self) -> &'static str {
        match self {
            GeometryEncoding::Wkt => "wkt",
            GeometryEncoding::GeoJson => "geojson",
            GeometryEncoding::BoundingBox => "bbox",
        }
    }
}

impl fmt::Display for GeometryEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GeometryEncoding {
    type Err = PlannerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wkt" => Ok(GeometryEncoding::Wkt),
            "geojson" => Ok(GeometryEncoding::GeoJson),
            "bbox" => Ok(GeometryEncoding::BoundingBox),
            _ => Err(PlannerError::InvalidInput(format!(
                "unknown geometry type `{}`, expected wkt, geojson or bbox",
                s
            ))),
        }
    }
}

/// Parse WKT text to a `geo` geometry.
pub fn parse_wkt(text: &str) -> Result<geo::Geometry<f64>> {
    wkt::Wkt::from_str(text.trim())
        .map_err(|e| PlannerError::Encoding(format!("invalid WKT: {}", e)))
        .and_then(|w| {
            w.try_into().map_err(|e: wkt::conversion::Error| {
                PlannerError::Encoding(format!("unsupported WKT geometry: {:?}", e))
            })
        })
}

/// Parse a GeoJSON geometry object, keeping the raw coordinate arrays.
pub fn parse_geojson(text: &str) -> Result<geojson::Geometry> {
    serde_json::from_str(text)
        .map_err(|e| PlannerError::Encoding(format!("invalid GeoJSON geometry: {}", e)))
}

pub fn geojson_to_geo(geometry: &geojson::Geometry) -> Result<geo::Geometry<f64>> {
    geo::Geometry::<f64>::try_from(geometry.value.clone())
        .map_err(|e| PlannerError::Encoding(format!("unsupported GeoJSON geometry: {}", e)))
}

/// Parse `minLon,minLat,maxLon,maxLat`. `minLon > maxLon` crosses the antimeridian.
///
/// # Examples
///
/// ```
/// use geoplan::encoding::parse_bbox;
///
/// let bbox = parse_bbox("170, -10, -170, 10").unwrap();
/// assert!(bbox.wraps_antimeridian());
/// assert!(parse_bbox("1,2,3").is_err());
/// ```
pub fn parse_bbox(text: &str) -> Result<BoundingBox> {
    let values = text
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .map_err(|e| PlannerError::InvalidInput(format!("bbox value `{}`: {}", part.trim(), e)))
        })
        .collect::<Result<Vec<f64>>>()?;

    if values.len() != 4 {
        return Err(PlannerError::InvalidInput(format!(
            "bbox needs 4 comma separated values, got {}",
            values.len()
        )));
    }

    BoundingBox::from_edges(values[0], values[1], values[2], values[3]).ok_or_else(|| {
        PlannerError::InvalidInput(format!(
            "bbox minLat must not exceed maxLat and all values must be finite: {}",
            text.trim()
        ))
    })
}

/// Coordinates of every ring in WKT polygon text, as written (unclosed rings stay open).
pub(crate) fn wkt_ring_coords(text: &str) -> Vec<Vec<Coord<f64>>> {
    let mut rings = Vec::new();
    let mut open = None;
    for (i, ch) in text.char_indices() {
        match ch {
            '(' => open = Some(i + 1),
            ')' => {
                if let Some(start) = open.take() {
                    rings.push(parse_coord_list(&text[start..i]));
                }
            }
            _ => {}
        }
    }
    rings
}

fn parse_coord_list(list: &str) -> Vec<Coord<f64>> {
    list.split(',')
        .filter_map(|pair| {
            let mut values = pair.split_whitespace().map(str::parse::<f64>);
            match (values.next(), values.next()) {
                (Some(Ok(x)), Some(Ok(y))) => Some(coord! { x: x, y: y }),
                _ => None,
            }
        })
        .collect()
}

/// Whether two geometries have the same kind and the same vertices in the same order.
pub fn same_vertices(a: &geo::Geometry<f64>, b: &geo::Geometry<f64>) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
        && a.coords_count() == b.coords_count()
        && a.coords_iter().zip(b.coords_iter()).all(|(p, q)| {
            (p.x - q.x).abs() <= VERTEX_TOLERANCE && (p.y - q.y).abs() <= VERTEX_TOLERANCE
        })
}

/// Outcome of checking the two encodings of a [`Geo`].
#[derive(Debug, Clone, PartialEq)]
pub enum GeoCheck {
    Consistent,
    /// The GeoJSON disagreed with (or failed next to) valid WKT; rebuilt from the WKT.
    Reencoded(Geo),
    /// The WKT itself does not parse.
    Unparseable(String),
}

/// Check that the WKT and GeoJSON of `geo` describe the same geometry. WKT wins.
pub fn check_geo(geo: &Geo) -> GeoCheck {
    let from_wkt = match parse_wkt(geo.wkt()) {
        Ok(geometry) => geometry,
        Err(e) => return GeoCheck::Unparseable(e.to_string()),
    };
    match geojson_to_geo(geo.geo_json()) {
        Ok(from_json) if same_vertices(&from_wkt, &from_json) => GeoCheck::Consistent,
        _ => GeoCheck::Reencoded(Geo::from_geometry(&from_wkt)),
    }
}
