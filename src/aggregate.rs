//! Folds per-field tiered geometry results into one [`GeoFeatures`] response.
//!
//! Each field arrives as a list of tiers; higher tiers are finer. In summary mode the
//! finest complete tier represents the field, falling back to the coarsest tier when
//! none is complete. Derived functions only see those representatives.

use crate::encoding::{GeoCheck, check_geo, parse_wkt};
use crate::error::PlannerError;
use geo::{BoundingRect, Centroid, ConvexHull, CoordsIter, MultiPoint, Point};
use geoplan_types::{DuplicateKey, Geo, GeoByField, GeoByTier, GeoFeatures, GeoFunction, GeoTerms};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// How each field is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    /// One representative geometry per field.
    #[default]
    Summary,
    /// Every tier per field.
    RawTiers,
}

impl AggregationMode {
    /// Mode for a request's `expand` flag: expanded responses carry every tier.
    pub fn from_expand(expand: bool) -> Self {
        if expand {
            AggregationMode::RawTiers
        } else {
            AggregationMode::Summary
        }
    }
}

/// One tier of a field's aggregation as returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierResult {
    pub tier: u32,
    pub geo: Geo,
    /// Whether the backend finished aggregating this tier.
    pub complete: bool,
}

impl TierResult {
    pub fn new(tier: u32, geo: Geo, complete: bool) -> Self {
        Self {
            tier,
            geo,
            complete,
        }
    }
}

/// Derived geometry functions over the representatives of several fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeoFunctionKind {
    /// Centroid of the fields' centroids.
    Centroid,
    ConvexHull,
    /// Bounding rectangle of all fields.
    Envelope,
}

impl GeoFunctionKind {
    pub fn name(&self) -> &'static str {
        match self {
            GeoFunctionKind::Centroid => "centroid",
            GeoFunctionKind::ConvexHull => "convex_hull",
            GeoFunctionKind::Envelope => "envelope",
        }
    }

    fn apply(&self, shapes: &[&geo::Geometry<f64>]) -> Option<geo::Geometry<f64>> {
        match self {
            GeoFunctionKind::Centroid => {
                let centroids: MultiPoint<f64> =
                    shapes.iter().filter_map(|shape| shape.centroid()).collect();
                centroids.centroid().map(geo::Geometry::Point)
            }
            GeoFunctionKind::ConvexHull => {
                let points: MultiPoint<f64> = shapes
                    .iter()
                    .copied()
                    .flat_map(|shape| shape.coords_iter().map(Point::from))
                    .collect();
                if points.0.is_empty() {
                    return None;
                }
                Some(geo::Geometry::Polygon(points.convex_hull()))
            }
            GeoFunctionKind::Envelope => shapes
                .iter()
                .filter_map(|shape| shape.bounding_rect())
                .reduce(|a, b| crate::compute::decompose::union_rect(&a, &b))
                .map(|rect| geo::Geometry::Polygon(rect.to_polygon())),
        }
    }
}

impl fmt::Display for GeoFunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GeoFunctionKind {
    type Err = PlannerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "centroid" => Ok(GeoFunctionKind::Centroid),
            "convex_hull" | "convexhull" => Ok(GeoFunctionKind::ConvexHull),
            "envelope" => Ok(GeoFunctionKind::Envelope),
            _ => Err(PlannerError::UnknownGeoFunction(s.to_string())),
        }
    }
}

/// A requested derived function: its name and the fields it combines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionRequest {
    pub function: String,
    pub fields: Vec<String>,
}

impl FunctionRequest {
    pub fn new<I, S>(function: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            function: function.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

/// Something left out of a partial response, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    BackendTimeout { field: String, timeout_ms: u64 },
    BackendError { field: String, message: String },
    Cancelled { field: String },
    /// The field is not registered under any requested field type.
    UnknownField { field: String },
    /// A tier's WKT could not be parsed; the whole field was dropped.
    UnparseableGeo { field: String, tier: u32, message: String },
    UnknownGeoFunction { function: String },
    /// A function was skipped because some of its fields have no result.
    MissingFields { function: String, fields: Vec<String> },
}

impl Degradation {
    /// Degradation for a backend failure on `field`.
    pub fn from_backend_error(field: &str, error: &PlannerError) -> Self {
        match error {
            PlannerError::BackendTimeout { timeout, .. } => Degradation::BackendTimeout {
                field: field.to_string(),
                timeout_ms: timeout.as_millis().min(u64::MAX as u128) as u64,
            },
            PlannerError::Cancelled => Degradation::Cancelled {
                field: field.to_string(),
            },
            PlannerError::Backend { message, .. } => Degradation::BackendError {
                field: field.to_string(),
                message: message.clone(),
            },
            other => Degradation::BackendError {
                field: field.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// The field this degradation is about, if it concerns a single field.
    pub fn field(&self) -> Option<&str> {
        match self {
            Degradation::BackendTimeout { field, .. }
            | Degradation::BackendError { field, .. }
            | Degradation::Cancelled { field }
            | Degradation::UnknownField { field }
            | Degradation::UnparseableGeo { field, .. } => Some(field),
            Degradation::UnknownGeoFunction { .. } | Degradation::MissingFields { .. } => None,
        }
    }
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degradation::BackendTimeout { field, timeout_ms } => {
                write!(f, "field `{}` timed out after {} ms", field, timeout_ms)
            }
            Degradation::BackendError { field, message } => {
                write!(f, "field `{}` failed: {}", field, message)
            }
            Degradation::Cancelled { field } => write!(f, "field `{}` was cancelled", field),
            Degradation::UnknownField { field } => {
                write!(f, "field `{}` is not a registered geo field", field)
            }
            Degradation::UnparseableGeo {
                field,
                tier,
                message,
            } => write!(f, "field `{}` tier {} is unreadable: {}", field, tier, message),
            Degradation::UnknownGeoFunction { function } => {
                write!(f, "unknown geo function `{}`", function)
            }
            Degradation::MissingFields { function, fields } => write!(
                f,
                "function `{}` skipped, no result for {}",
                function,
                fields.join(", ")
            ),
        }
    }
}

/// Whether a response is complete, and what is missing if not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryStatus {
    Complete,
    Partial { degradations: Vec<Degradation> },
}

impl QueryStatus {
    pub fn from_degradations(degradations: Vec<Degradation>) -> Self {
        if degradations.is_empty() {
            QueryStatus::Complete
        } else {
            QueryStatus::Partial { degradations }
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, QueryStatus::Complete)
    }

    pub fn degradations(&self) -> &[Degradation] {
        match self {
            QueryStatus::Complete => &[],
            QueryStatus::Partial { degradations } => degradations,
        }
    }
}

/// Aggregated features plus everything that had to be left out.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub features: GeoFeatures,
    pub degradations: Vec<Degradation>,
}

impl Aggregation {
    pub fn status(&self) -> QueryStatus {
        QueryStatus::from_degradations(self.degradations.clone())
    }
}

/// Index of the finest complete tier, or of the coarsest tier when none is complete.
fn select_tier(tiers: &[TierResult]) -> Option<usize> {
    tiers
        .iter()
        .enumerate()
        .filter(|(_, t)| t.complete)
        .max_by_key(|(_, t)| t.tier)
        .or_else(|| tiers.iter().enumerate().min_by_key(|(_, t)| t.tier))
        .map(|(i, _)| i)
}

/// Check both encodings of every tier. `Err` when a tier is unreadable.
fn checked_tiers(field: &str, tiers: &[TierResult]) -> Result<Vec<TierResult>, Degradation> {
    let mut by_tier: BTreeMap<u32, TierResult> = BTreeMap::new();
    for result in tiers {
        let geo = match check_geo(&result.geo) {
            GeoCheck::Consistent => result.geo.clone(),
            GeoCheck::Reencoded(fixed) => {
                log::warn!(
                    "Field `{}` tier {}: GeoJSON disagrees with WKT, re-encoded from WKT",
                    field,
                    result.tier
                );
                fixed
            }
            GeoCheck::Unparseable(message) => {
                return Err(Degradation::UnparseableGeo {
                    field: field.to_string(),
                    tier: result.tier,
                    message,
                });
            }
        };
        let checked = TierResult::new(result.tier, geo, result.complete);
        match by_tier.get(&result.tier) {
            Some(existing) if existing.complete || !checked.complete => {
                log::warn!("Field `{}` repeats tier {}, keeping the first", field, result.tier);
            }
            _ => {
                by_tier.insert(result.tier, checked);
            }
        }
    }
    Ok(by_tier.into_values().collect())
}

fn dropped_field(field: &str, error: &DuplicateKey) -> Degradation {
    log::warn!("Field `{}`: {}", field, error);
    Degradation::BackendError {
        field: field.to_string(),
        message: error.to_string(),
    }
}

/// Aggregate backend results per field and compute the requested functions.
///
/// # Examples
///
/// ```
/// use geoplan::aggregate::{AggregationMode, TierResult, aggregate};
/// use geoplan_types::{Geo, GeoTerms};
/// use geo::{Geometry, Point};
/// use std::collections::BTreeMap;
///
/// let coarse = Geo::from_geometry(&Geometry::Point(Point::new(1.0, 1.0)));
/// let fine = Geo::from_geometry(&Geometry::Point(Point::new(1.5, 1.25)));
/// let results = BTreeMap::from([(
///     "geom".to_string(),
///     vec![TierResult::new(1, coarse, false), TierResult::new(2, fine.clone(), true)],
/// )]);
///
/// let aggregation = aggregate(&results, AggregationMode::Summary, &[]);
/// let terms = aggregation.features.geo_by_field().get("geom").unwrap();
/// assert_eq!(terms, &GeoTerms::Geo { geo: fine });
/// assert!(aggregation.status().is_complete());
/// ```
pub fn aggregate(
    results: &BTreeMap<String, Vec<TierResult>>,
    mode: AggregationMode,
    functions: &[FunctionRequest],
) -> Aggregation {
    let mut degradations = Vec::new();
    let mut by_field = GeoByField::new();
    let mut representatives: BTreeMap<&str, geo::Geometry<f64>> = BTreeMap::new();

    for (field, tiers) in results {
        let tiers = match checked_tiers(field, tiers) {
            Ok(tiers) => tiers,
            Err(degradation) => {
                log::warn!("Dropping field: {}", degradation);
                degradations.push(degradation);
                continue;
            }
        };
        let Some(selected) = select_tier(&tiers) else {
            log::debug!("Field `{}` returned no tiers", field);
            continue;
        };

        let representative = parse_wkt(tiers[selected].geo.wkt()).ok();

        let terms = match mode {
            AggregationMode::Summary => GeoTerms::Geo {
                geo: tiers[selected].geo.clone(),
            },
            AggregationMode::RawTiers => {
                match GeoByTier::from_tiers(tiers.into_iter().map(|t| (t.tier, t.geo))) {
                    Ok(geo_by_tier) => GeoTerms::GeoByTier { geo_by_tier },
                    Err(e) => {
                        degradations.push(dropped_field(field, &e));
                        continue;
                    }
                }
            }
        };
        if let Err(e) = by_field.try_insert(field.clone(), terms) {
            degradations.push(dropped_field(field, &e));
            continue;
        }
        if let Some(shape) = representative {
            representatives.insert(field.as_str(), shape);
        }
    }

    let mut derived = Vec::new();
    for request in functions {
        let kind = match request.function.parse::<GeoFunctionKind>() {
            Ok(kind) => kind,
            Err(e) => {
                log::warn!("Skipping function: {}", e);
                degradations.push(Degradation::UnknownGeoFunction {
                    function: request.function.clone(),
                });
                continue;
            }
        };

        let missing: Vec<String> = request
            .fields
            .iter()
            .filter(|field| !representatives.contains_key(field.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() || request.fields.is_empty() {
            degradations.push(Degradation::MissingFields {
                function: kind.name().to_string(),
                fields: missing,
            });
            continue;
        }

        let shapes: Vec<&geo::Geometry<f64>> = request
            .fields
            .iter()
            .filter_map(|field| representatives.get(field.as_str()))
            .collect();
        match kind.apply(&shapes) {
            Some(geometry) => derived.push(GeoFunction {
                function: kind.name().to_string(),
                fields: request.fields.clone(),
                geo_json: geojson::Geometry::new(geojson::Value::from(&geometry)),
            }),
            None => degradations.push(Degradation::MissingFields {
                function: kind.name().to_string(),
                fields: Vec::new(),
            }),
        }
    }

    Aggregation {
        features: GeoFeatures::new(by_field, derived),
        degradations,
    }
}
