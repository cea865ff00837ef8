//! Validation of manually entered geometry forms.
//!
//! Every check runs even after an earlier one fails, so a caller can show all
//! problems at once.

use crate::encoding::{
    GeometryEncoding, geojson_to_geo, parse_bbox, parse_geojson, parse_wkt, wkt_ring_coords,
};
use crate::error::{FieldViolation, ValidationError};
use geo::algorithm::line_intersection::{LineIntersection, line_intersection};
use geo::{Area, Coord, Line, LineString, Polygon};
use geoplan_types::{
    BoundingBox, Geometry, QueryGeometry, QueryRangeSettingsMap, RangeSettings, RangeType,
    TimeInterval,
};
use serde::{Deserialize, Serialize};

/// Time interval as entered on the form, in Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalForm {
    pub start: i64,
    pub end: i64,
}

/// A manually supplied query geometry plus range planning options.
///
/// # Examples
///
/// ```
/// use geoplan::compute::validation::{ManualGeometryForm, validate};
///
/// let json = r#"{
///     "geometry": "-1,-1,1,1",
///     "geometryType": "bbox",
///     "createRanges": true,
///     "rangeType": "z2",
///     "rangeSettings": { "z2": { "maxEnvelopes": 4, "maxExpansion": 2.0, "optimizeRanges": true } }
/// }"#;
/// let form: ManualGeometryForm = serde_json::from_str(json).unwrap();
/// let query = validate(&form).unwrap();
/// assert_eq!(query.settings().unwrap().max_envelopes, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualGeometryForm {
    pub geometry: String,
    pub geometry_type: String,
    #[serde(default)]
    pub create_ranges: bool,
    #[serde(default)]
    pub range_type: String,
    #[serde(default)]
    pub range_settings: QueryRangeSettingsMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<IntervalForm>,
}

impl ManualGeometryForm {
    pub fn new(geometry: impl Into<String>, geometry_type: impl Into<String>) -> Self {
        Self {
            geometry: geometry.into(),
            geometry_type: geometry_type.into(),
            create_ranges: false,
            range_type: String::new(),
            range_settings: QueryRangeSettingsMap::new(),
            interval: None,
        }
    }

    /// Request ranges on `range_type` using `settings` for it.
    pub fn with_ranges(mut self, range_type: RangeType, settings: RangeSettings) -> Self {
        self.create_ranges = true;
        self.range_type = range_type.name().to_string();
        let mut map = QueryRangeSettingsMap::new();
        let _ = map.try_insert(range_type.name(), settings);
        self.range_settings = map;
        self
    }

    pub fn with_interval(mut self, start: i64, end: i64) -> Self {
        self.interval = Some(IntervalForm { start, end });
        self
    }
}

/// A form that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedQuery {
    pub query: QueryGeometry,
    pub encoding: GeometryEncoding,
    /// Set when the form asked for ranges.
    pub range_type: Option<RangeType>,
    pub range_settings: QueryRangeSettingsMap,
}

impl ValidatedQuery {
    /// Settings the form supplied for its own range type, if any.
    pub fn settings(&self) -> Option<&RangeSettings> {
        self.range_type
            .and_then(|range_type| self.range_settings.for_range_type(range_type))
    }
}

/// Validate `form` against every supported range type.
pub fn validate(form: &ManualGeometryForm) -> Result<ValidatedQuery, ValidationError> {
    validate_with(form, &RangeType::ALL)
}

/// Validate `form`, accepting only the range types in `supported`.
pub fn validate_with(
    form: &ManualGeometryForm,
    supported: &[RangeType],
) -> Result<ValidatedQuery, ValidationError> {
    let mut violations = Vec::new();

    let encoding = match form.geometry_type.parse::<GeometryEncoding>() {
        Ok(encoding) => Some(encoding),
        Err(e) => {
            violations.push(FieldViolation::new("geometryType", e.to_string()));
            None
        }
    };

    let geometry = encoding.and_then(|encoding| {
        let (geometry, problems) = check_geometry(&form.geometry, encoding);
        violations.extend(
            problems
                .into_iter()
                .map(|message| FieldViolation::new("geometry", message)),
        );
        geometry
    });

    let range_type = if form.create_ranges {
        check_ranges(form, supported, &mut violations)
    } else {
        None
    };

    let interval = form.interval.and_then(|interval| {
        let checked = TimeInterval::new(interval.start, interval.end);
        if checked.is_none() {
            violations.push(FieldViolation::new(
                "interval",
                format!(
                    "[{}, {}] must satisfy 0 <= start <= end <= 2^32",
                    interval.start, interval.end
                ),
            ));
        }
        checked
    });

    match (encoding, geometry) {
        (Some(encoding), Some(geometry)) if violations.is_empty() => Ok(ValidatedQuery {
            query: QueryGeometry { geometry, interval },
            encoding,
            range_type,
            range_settings: form.range_settings.clone(),
        }),
        _ => Err(ValidationError { violations }),
    }
}

fn check_ranges(
    form: &ManualGeometryForm,
    supported: &[RangeType],
    violations: &mut Vec<FieldViolation>,
) -> Option<RangeType> {
    let range_type = match form.range_type.parse::<RangeType>() {
        Ok(range_type) if supported.contains(&range_type) => Some(range_type),
        _ => {
            violations.push(FieldViolation::new(
                "rangeType",
                format!("unsupported range type `{}`", form.range_type),
            ));
            None
        }
    };

    for (key, settings) in form.range_settings.iter() {
        match key.parse::<RangeType>() {
            Ok(parsed) if supported.contains(&parsed) => {}
            _ => violations.push(FieldViolation::new(
                format!("rangeSettings.{}", key),
                format!("unsupported range type `{}`", key),
            )),
        }
        for (field, message) in settings.violations() {
            violations.push(FieldViolation::new(
                format!("rangeSettings.{}.{}", key, field),
                message,
            ));
        }
    }

    range_type
}

/// Parse and check the geometry text. Returns the geometry only when it has no problems.
fn check_geometry(text: &str, encoding: GeometryEncoding) -> (Option<Geometry>, Vec<String>) {
    let mut problems = Vec::new();

    let geometry = match encoding {
        GeometryEncoding::BoundingBox => match parse_bbox(text) {
            Ok(bbox) => {
                problems.extend(bbox_violations(&bbox));
                Some(Geometry::BoundingBox(bbox))
            }
            Err(e) => {
                problems.push(e.to_string());
                None
            }
        },
        GeometryEncoding::Wkt => match parse_wkt(text) {
            Ok(parsed) => {
                if matches!(parsed, geo::Geometry::Polygon(_)) {
                    for (i, ring) in wkt_ring_coords(text).iter().enumerate() {
                        if ring.first() != ring.last() {
                            problems.push(format!("polygon ring {} is not closed", i));
                        }
                    }
                }
                supported_kind(parsed, &mut problems)
            }
            Err(e) => {
                problems.push(e.to_string());
                None
            }
        },
        GeometryEncoding::GeoJson => match parse_geojson(text) {
            Ok(raw) => {
                if let geojson::Value::Polygon(rings) = &raw.value {
                    for (i, ring) in rings.iter().enumerate() {
                        if ring.first() != ring.last() {
                            problems.push(format!("polygon ring {} is not closed", i));
                        }
                    }
                }
                match geojson_to_geo(&raw) {
                    Ok(parsed) => supported_kind(parsed, &mut problems),
                    Err(e) => {
                        problems.push(e.to_string());
                        None
                    }
                }
            }
            Err(e) => {
                problems.push(e.to_string());
                None
            }
        },
    };

    if let Some(Geometry::Point(point)) = &geometry {
        problems.extend(coordinate_violation(&point.0));
    }
    if let Some(Geometry::Polygon(polygon)) = &geometry {
        problems.extend(polygon_violations(polygon));
    }

    if problems.is_empty() {
        (geometry, problems)
    } else {
        (None, problems)
    }
}

fn supported_kind(parsed: geo::Geometry<f64>, problems: &mut Vec<String>) -> Option<Geometry> {
    match parsed {
        geo::Geometry::Point(point) => Some(Geometry::Point(point)),
        geo::Geometry::Polygon(polygon) => Some(Geometry::Polygon(polygon)),
        other => {
            problems.push(format!(
                "unsupported geometry kind {}, expected Point or Polygon",
                kind_name(&other)
            ));
            None
        }
    }
}

fn kind_name(geometry: &geo::Geometry<f64>) -> &'static str {
    match geometry {
        geo::Geometry::Point(_) => "Point",
        geo::Geometry::Line(_) => "Line",
        geo::Geometry::LineString(_) => "LineString",
        geo::Geometry::Polygon(_) => "Polygon",
        geo::Geometry::MultiPoint(_) => "MultiPoint",
        geo::Geometry::MultiLineString(_) => "MultiLineString",
        geo::Geometry::MultiPolygon(_) => "MultiPolygon",
        geo::Geometry::GeometryCollection(_) => "GeometryCollection",
        geo::Geometry::Rect(_) => "Rect",
        geo::Geometry::Triangle(_) => "Triangle",
    }
}

/// Longitude in [-180, 180], latitude in [-90, 90], both finite.
fn coordinate_violation(coord: &Coord<f64>) -> Option<String> {
    let (x, y) = (coord.x, coord.y);
    if !x.is_finite() {
        return Some(format!("Longitude must be finite, got: {}", x));
    }
    if !y.is_finite() {
        return Some(format!("Latitude must be finite, got: {}", y));
    }
    if !(-180.0..=180.0).contains(&x) {
        return Some(format!("Longitude out of range [-180.0, 180.0]: {}", x));
    }
    if !(-90.0..=90.0).contains(&y) {
        return Some(format!("Latitude out of range [-90.0, 90.0]: {}", y));
    }
    None
}

fn bbox_violations(bbox: &BoundingBox) -> Vec<String> {
    [bbox.min(), bbox.max()]
        .iter()
        .filter_map(coordinate_violation)
        .collect()
}

fn polygon_violations(polygon: &Polygon<f64>) -> Vec<String> {
    let mut problems = Vec::new();

    let rings: Vec<&LineString<f64>> = std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .collect();
    for (ring_idx, ring) in rings.iter().enumerate() {
        for (idx, coord) in ring.coords().enumerate() {
            if let Some(message) = coordinate_violation(coord) {
                problems.push(format!("ring {} point {}: {}", ring_idx, idx, message));
            }
        }
    }

    if polygon.exterior().0.len() < 4 {
        problems.push("polygon needs at least 3 distinct vertices".to_string());
        return problems;
    }

    match self_intersection(&rings) {
        Some(message) => problems.push(message),
        None if polygon.unsigned_area() <= 0.0 => problems.push("polygon has no area".to_string()),
        None => {}
    }
    problems
}

fn ring_edges(ring: &LineString<f64>) -> Vec<Line<f64>> {
    ring.lines().filter(|line| line.start != line.end).collect()
}

/// First crossing between ring edges, if any.
///
/// Consecutive edges of one ring may only share their common vertex. Edges of
/// different rings may touch but not cross.
fn self_intersection(rings: &[&LineString<f64>]) -> Option<String> {
    let edges: Vec<Vec<Line<f64>>> = rings.iter().map(|ring| ring_edges(ring)).collect();

    for (ring_idx, ring) in edges.iter().enumerate() {
        let n = ring.len();
        for i in 0..n {
            for j in (i + 1)..n {
                let adjacent = j == i + 1 || (i == 0 && j == n - 1);
                match line_intersection(ring[i], ring[j]) {
                    None => {}
                    Some(LineIntersection::SinglePoint {
                        is_proper: false, ..
                    }) if adjacent => {}
                    Some(_) => {
                        return Some(format!(
                            "ring {} is self-intersecting at edges {} and {}",
                            ring_idx, i, j
                        ));
                    }
                }
            }
        }
    }

    for (a_idx, a) in edges.iter().enumerate() {
        for (b_idx, b) in edges.iter().enumerate().skip(a_idx + 1) {
            let crossing = a.iter().any(|ea| {
                b.iter().any(|eb| {
                    matches!(
                        line_intersection(*ea, *eb),
                        Some(LineIntersection::SinglePoint { is_proper: true, .. })
                            | Some(LineIntersection::Collinear { .. })
                    )
                })
            });
            if crossing {
                return Some(format!("rings {} and {} intersect", a_idx, b_idx));
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wkt_form(wkt: &str) -> ManualGeometryForm {
        ManualGeometryForm::new(wkt, "wkt")
    }

    #[test]
    fn test_valid_wkt_polygon() {
        let form = wkt_form("POLYGON((-80 35, -70 35, -70 45, -80 45, -80 35))")
            .with_ranges(RangeType::Xz2, RangeSettings::new(16, 3.0));
        let query = validate(&form).unwrap();
        assert!(matches!(query.query.geometry, Geometry::Polygon(_)));
        assert_eq!(query.range_type, Some(RangeType::Xz2));
        assert_eq!(query.encoding, GeometryEncoding::Wkt);
    }

    #[test]
    fn test_valid_geojson_point() {
        let form = ManualGeometryForm::new(r#"{"type":"Point","coordinates":[-74.006,40.7128]}"#, "GeoJSON");
        let query = validate(&form).unwrap();
        assert!(matches!(query.query.geometry, Geometry::Point(_)));
        assert_eq!(query.range_type, None);
        assert!(query.settings().is_none());
    }

    #[test]
    fn test_bbox_edges_and_wrapping() {
        let query = validate(&ManualGeometryForm::new("170,-10,-170,10", "bbox")).unwrap();
        match query.query.geometry {
            Geometry::BoundingBox(bbox) => assert!(bbox.wraps_antimeridian()),
            other => panic!("expected bbox, got {:?}", other),
        }
        let err = validate(&ManualGeometryForm::new("0,-95,10,10", "bbox")).unwrap_err();
        assert!(err.mentions("geometry"));
        assert!(err.to_string().contains("Latitude"));
    }

    #[test]
    fn test_bogus_range_settings_key() {
        let mut form = wkt_form("POINT(1 2)").with_ranges(RangeType::Z2, RangeSettings::new(4, 2.0));
        form.range_settings
            .try_insert("bogus", RangeSettings::new(4, 2.0))
            .unwrap();
        let err = validate(&form).unwrap_err();
        assert!(err.mentions("rangeSettings.bogus"));
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_collects_every_violation() {
        let mut form = ManualGeometryForm::new("POLYGON((0 0, 1", "wkt");
        form.create_ranges = true;
        form.range_type = "z9".to_string();
        form.range_settings = QueryRangeSettingsMap::from_entries([(
            "z2",
            RangeSettings::new(0, 0.5),
        )])
        .unwrap();
        form.interval = Some(IntervalForm { start: 10, end: 5 });

        let err = validate(&form).unwrap_err();
        assert!(err.mentions("geometry"));
        assert!(err.mentions("rangeType"));
        assert!(err.mentions("rangeSettings.z2.maxEnvelopes"));
        assert!(err.mentions("rangeSettings.z2.maxExpansion"));
        assert!(err.mentions("interval"));
        assert_eq!(err.violations.len(), 5);
    }

    #[test]
    fn test_range_settings_ignored_without_create_ranges() {
        let mut form = wkt_form("POINT(1 2)");
        form.range_type = "nonsense".to_string();
        form.range_settings =
            QueryRangeSettingsMap::from_entries([("bogus", RangeSettings::new(0, 0.0))]).unwrap();
        assert!(validate(&form).is_ok());
    }

    #[test]
    fn test_unsupported_range_type_for_caller() {
        let form = wkt_form("POINT(1 2)").with_ranges(RangeType::Xz3, RangeSettings::default());
        let err = validate_with(&form, &[RangeType::Z2, RangeType::Xz2]).unwrap_err();
        assert!(err.mentions("rangeType"));
        assert!(err.mentions("rangeSettings.xz3"));
    }

    #[test]
    fn test_rejects_unsupported_kinds_and_unknown_encoding() {
        let err = validate(&wkt_form("LINESTRING(0 0, 1 1)")).unwrap_err();
        assert!(err.to_string().contains("LineString"));

        let err = validate(&ManualGeometryForm::new("POINT(0 0)", "kml")).unwrap_err();
        assert!(err.mentions("geometryType"));
    }

    #[test]
    fn test_rejects_unclosed_rings() {
        let err = validate(&wkt_form("POLYGON((0 0, 4 0, 4 4, 0 4))")).unwrap_err();
        assert!(err.to_string().contains("not closed"));

        let geojson = r#"{"type":"Polygon","coordinates":[[[0,0],[4,0],[4,4],[0,4]]]}"#;
        let err = validate(&ManualGeometryForm::new(geojson, "geojson")).unwrap_err();
        assert!(err.to_string().contains("not closed"));
    }

    #[test]
    fn test_rejects_self_intersecting_ring() {
        // bow tie
        let err = validate(&wkt_form("POLYGON((0 0, 4 4, 4 0, 0 4, 0 0))")).unwrap_err();
        assert!(err.to_string().contains("self-intersecting"));
    }

    #[test]
    fn test_rejects_hole_crossing_shell() {
        let err = validate(&wkt_form(
            "POLYGON((0 0, 10 0, 10 10, 0 10, 0 0), (5 5, 15 5, 15 6, 5 6, 5 5))",
        ))
        .unwrap_err();
        assert!(err.to_string().contains("rings 0 and 1 intersect"));
    }

    #[test]
    fn test_accepts_polygon_with_hole() {
        let form = wkt_form("POLYGON((0 0, 10 0, 10 10, 0 10, 0 0), (2 2, 4 2, 4 4, 2 4, 2 2))");
        assert!(validate(&form).is_ok());
    }

    #[test]
    fn test_out_of_range_polygon_vertex() {
        let err = validate(&wkt_form("POLYGON((170 0, 190 0, 190 10, 170 10, 170 0))")).unwrap_err();
        assert!(err.to_string().contains("Longitude out of range"));
    }

    #[test]
    fn test_interval_is_carried() {
        let form = wkt_form("POINT(1 2)").with_interval(100, 200);
        let query = validate(&form).unwrap();
        assert_eq!(query.query.interval, TimeInterval::new(100, 200));
    }
}
