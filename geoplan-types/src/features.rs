//! Aggregated geometry features returned to the map front end.
//!
//! ```text
//! GeoFeatures
//! ├─ geoByField: { field -> GeoTerms }
//! │  ├─ "geom"  -> { type: "geo", geo: { wkt, geoJson } }
//! │  └─ "track" -> { type: "geoByTier", geoByTier: { tier -> { wkt, geoJson } } }
//! └─ functions: [ { function, fields, geoJson } ]
//! ```

use crate::error::DuplicateKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use wkt::ToWkt;

/// One geometry in two encodings: well-known text and GeoJSON.
///
/// Built from a parsed geometry so both encodings describe the same shape. Values
/// received from a backend are deserialized as-is and must be checked before use.
///
/// # Examples
///
/// ```
/// use geoplan_types::Geo;
/// use geo::{Geometry, Point};
///
/// let geo = Geo::from_geometry(&Geometry::Point(Point::new(1.5, -2.0)));
/// assert!(geo.wkt().starts_with("POINT"));
/// assert_eq!(geo.geo_json().value, geojson::Value::Point(vec![1.5, -2.0]));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Geo {
    wkt: String,
    geo_json: geojson::Geometry,
}

impl Geo {
    pub fn from_geometry(geometry: &geo::Geometry<f64>) -> Self {
        Self {
            wkt: geometry.wkt_string(),
            geo_json: geojson::Geometry::new(geojson::Value::from(geometry)),
        }
    }

    /// Pair two encodings without checking that they agree.
    pub fn from_parts(wkt: String, geo_json: geojson::Geometry) -> Self {
        Self { wkt, geo_json }
    }

    pub fn wkt(&self) -> &str {
        &self.wkt
    }

    pub fn geo_json(&self) -> &geojson::Geometry {
        &self.geo_json
    }
}

/// Tier identifier to geometry. Higher tiers are finer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeoByTier(#[serde(deserialize_with = "crate::unique::deserialize")] BTreeMap<u32, Geo>);

impl GeoByTier {
    pub fn from_tiers<I>(tiers: I) -> Result<Self, DuplicateKey>
    where
        I: IntoIterator<Item = (u32, Geo)>,
    {
        let mut map = BTreeMap::new();
        for (tier, geo) in tiers {
            if map.insert(tier, geo).is_some() {
                return Err(DuplicateKey(tier.to_string()));
            }
        }
        Ok(Self(map))
    }

    pub fn get(&self, tier: u32) -> Option<&Geo> {
        self.0.get(&tier)
    }

    /// Tiers in ascending order (coarse to fine).
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Geo)> {
        self.0.iter().map(|(t, g)| (*t, g))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Aggregation result for one field: a single representative or every tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GeoTerms {
    #[serde(rename = "geo")]
    Geo { geo: Geo },
    #[serde(rename = "geoByTier", rename_all = "camelCase")]
    GeoByTier { geo_by_tier: GeoByTier },
}

impl GeoTerms {
    /// The wire value of the `type` tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            GeoTerms::Geo { .. } => "geo",
            GeoTerms::GeoByTier { .. } => "geoByTier",
        }
    }
}

/// Field name to aggregation result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeoByField(
    #[serde(deserialize_with = "crate::unique::deserialize")] BTreeMap<String, GeoTerms>,
);

impl GeoByField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_insert<K: Into<String>>(
        &mut self,
        field: K,
        terms: GeoTerms,
    ) -> Result<(), DuplicateKey> {
        let field = field.into();
        if self.0.contains_key(&field) {
            return Err(DuplicateKey(field));
        }
        self.0.insert(field, terms);
        Ok(())
    }

    pub fn get(&self, field: &str) -> Option<&GeoTerms> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &GeoTerms)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A geometry derived from the representatives of several fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoFunction {
    pub function: String,
    pub fields: Vec<String>,
    pub geo_json: geojson::Geometry,
}

/// Top-level aggregation response. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoFeatures {
    geo_by_field: GeoByField,
    functions: Vec<GeoFunction>,
}

impl GeoFeatures {
    pub fn new(geo_by_field: GeoByField, functions: Vec<GeoFunction>) -> Self {
        Self {
            geo_by_field,
            functions,
        }
    }

    pub fn geo_by_field(&self) -> &GeoByField {
        &self.geo_by_field
    }

    pub fn functions(&self) -> &[GeoFunction] {
        &self.functions
    }
}
