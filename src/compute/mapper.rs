//! Maps a query geometry onto the cells of a space-filling curve.
//!
//! The mapper picks the starting cells the decomposer refines, and owns the
//! per-cell measurement (covered vs. true area and time) used for expansion ratios.

use crate::compute::curve::{
    CellExtent, CurveCell, SpaceFillingCurve, curve_for, grid_coord, normalize_degrees,
    normalize_seconds,
};
use crate::compute::decompose::MAX_RECURSION_DEPTH;
use crate::error::{PlannerError, Result};
use geo::{Area, BooleanOps, BoundingRect, Intersects, Polygon, Rect, coord};
use geoplan_types::{Geometry, QueryGeometry, RangeType};
use std::collections::BTreeSet;

/// Covered and true measure of one cell against the query.
///
/// Spatial measures are in square degrees, time measures in fractions of the time domain.
/// The true measure is floored at one leaf cell per dimension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
    pub covered: f64,
    pub true_measure: f64,
}

impl Assessment {
    /// Covered ÷ true, never below 1.
    pub fn expansion(&self) -> f64 {
        (self.covered / self.true_measure).max(1.0)
    }
}

/// Query geometry on a curve plus the cells it starts from.
pub struct CurveCover {
    curve: &'static dyn SpaceFillingCurve,
    target: Target,
    leaf_level: u8,
    cells: Vec<CurveCell>,
}

impl std::fmt::Debug for CurveCover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurveCover")
            .field("range_type", &self.curve.range_type())
            .field("leaf_level", &self.leaf_level)
            .field("cells", &self.cells)
            .finish()
    }
}

impl CurveCover {
    pub fn curve(&self) -> &'static dyn SpaceFillingCurve {
        self.curve
    }

    pub fn range_type(&self) -> RangeType {
        self.curve.range_type()
    }

    /// Starting cells, sorted and unique.
    pub fn cells(&self) -> &[CurveCell] {
        &self.cells
    }

    /// Deepest level the decomposer may refine to on this curve.
    pub fn leaf_level(&self) -> u8 {
        self.leaf_level
    }

    /// Measure `cell` against the query. `None` when they are disjoint.
    pub fn assess(&self, cell: &CurveCell) -> Option<Assessment> {
        self.target.assess(&self.curve.extent(cell))
    }

    /// Cell region in degrees, latitude clipped to [-90, 90].
    pub fn footprint(&self, cell: &CurveCell) -> Rect<f64> {
        let rect = self.curve.extent(cell).to_rect();
        Rect::new(
            coord! { x: rect.min().x, y: rect.min().y.clamp(-90.0, 90.0) },
            coord! { x: rect.max().x, y: rect.max().y.clamp(-90.0, 90.0) },
        )
    }
}

/// Normalized query plus the leaf floors used for expansion ratios.
struct Target {
    geometry: Geometry,
    area: f64,
    time: Option<(f64, f64)>,
    leaf_area: f64,
    leaf_time: f64,
}

impl Target {
    fn new(query: &QueryGeometry, leaf_level: u8) -> Self {
        let leaf_edge = 0.5f64.powi(leaf_level as i32);
        let leaf_degrees = 360.0 * leaf_edge;
        Self {
            geometry: query.geometry.clone(),
            area: query.geometry.area(),
            time: query
                .interval
                .map(|i| (normalize_seconds(i.start()), normalize_seconds(i.end()))),
            leaf_area: leaf_degrees * leaf_degrees,
            leaf_time: leaf_edge,
        }
    }

    fn assess(&self, extent: &CellExtent) -> Option<Assessment> {
        let rect = extent.to_rect();
        let overlap = self.spatial_overlap(&rect)?;
        let (cell_time, true_time) = match self.time {
            None => (1.0, 1.0),
            Some((start, end)) => {
                let (low, high) = extent.time();
                let shared = end.min(high) - start.max(low);
                if shared < 0.0 || (end > start && shared <= 0.0) {
                    return None;
                }
                (high - low, shared.max(self.leaf_time))
            }
        };
        Some(Assessment {
            covered: rect.unsigned_area() * cell_time,
            true_measure: overlap.max(self.leaf_area) * true_time,
        })
    }

    /// Area shared by the geometry and `rect`; `None` when disjoint.
    ///
    /// Contact along an edge does not count when the geometry has area.
    fn spatial_overlap(&self, rect: &Rect<f64>) -> Option<f64> {
        let overlap = match &self.geometry {
            Geometry::Point(point) => rect.intersects(point).then_some(0.0),
            Geometry::BoundingBox(bbox) => {
                let shared: Vec<Rect<f64>> = bbox
                    .parts()
                    .iter()
                    .filter_map(|part| rect_intersection(part, rect))
                    .collect();
                (!shared.is_empty()).then(|| shared.iter().map(|r| r.unsigned_area()).sum())
            }
            Geometry::Polygon(polygon) => polygon_overlap(polygon, self.area, rect),
        }?;
        if self.area > 0.0 && overlap <= 0.0 {
            return None;
        }
        Some(overlap)
    }
}

fn rect_intersection(a: &Rect<f64>, b: &Rect<f64>) -> Option<Rect<f64>> {
    let min_x = a.min().x.max(b.min().x);
    let min_y = a.min().y.max(b.min().y);
    let max_x = a.max().x.min(b.max().x);
    let max_y = a.max().y.min(b.max().y);
    (min_x <= max_x && min_y <= max_y)
        .then(|| Rect::new(coord! { x: min_x, y: min_y }, coord! { x: max_x, y: max_y }))
}

fn polygon_overlap(polygon: &Polygon<f64>, area: f64, rect: &Rect<f64>) -> Option<f64> {
    if !polygon.intersects(rect) {
        return None;
    }
    let inside = polygon.bounding_rect().is_some_and(|bounds| {
        rect.min().x <= bounds.min().x
            && rect.min().y <= bounds.min().y
            && bounds.max().x <= rect.max().x
            && bounds.max().y <= rect.max().y
    });
    if inside {
        return Some(area);
    }
    Some(polygon.intersection(&rect.to_polygon()).unsigned_area())
}

/// Map `query` onto the curve of `range_type`.
///
/// Z curves start at the deepest level whose cell edge is at least the query's
/// largest normalized extent, so each bounding part touches at most two cells per
/// dimension. XZ curves start at the root because elements stored in coarse cells
/// can overlap any query.
///
/// # Examples
///
/// ```
/// use geoplan::compute::mapper::map_to_curve;
/// use geoplan_types::{BoundingBox, Geometry, QueryGeometry, RangeType};
///
/// let bbox = BoundingBox::from_edges(-1.0, -1.0, 1.0, 1.0).unwrap();
/// let query = QueryGeometry::spatial(Geometry::BoundingBox(bbox));
/// let cover = map_to_curve(&query, RangeType::Z2).unwrap();
/// assert_eq!(cover.cells().len(), 4);
/// assert!(cover.cells().iter().all(|c| c.level == 7));
/// ```
pub fn map_to_curve(query: &QueryGeometry, range_type: RangeType) -> Result<CurveCover> {
    match (range_type.is_temporal(), query.interval.is_some()) {
        (false, true) => {
            return Err(PlannerError::UnsupportedGeometryKind {
                range_type: range_type.to_string(),
                reason: format!(
                    "{} with a time interval needs a spatio-temporal curve",
                    query.geometry.kind_name()
                ),
            });
        }
        (true, false) => {
            return Err(PlannerError::UnsupportedGeometryKind {
                range_type: range_type.to_string(),
                reason: format!(
                    "{} without a time interval cannot be indexed on a spatio-temporal curve",
                    query.geometry.kind_name()
                ),
            });
        }
        _ => {}
    }

    let curve = curve_for(range_type);
    let leaf_level = MAX_RECURSION_DEPTH.min(curve.max_level());
    let mut cover = CurveCover {
        curve,
        target: Target::new(query, leaf_level),
        leaf_level,
        cells: Vec::new(),
    };

    let candidates: BTreeSet<CurveCell> = match range_type {
        RangeType::Xz2 | RangeType::Xz3 => BTreeSet::from([CurveCell::ROOT]),
        RangeType::Z2 | RangeType::Z3 => query
            .geometry
            .bounding_parts()
            .iter()
            .flat_map(|part| start_cells(part, cover.target.time, curve.dimensions(), leaf_level))
            .collect(),
    };
    cover.cells = candidates
        .into_iter()
        .filter(|cell| cover.assess(cell).is_some())
        .collect();

    log::debug!(
        "Mapped {} onto {} starting cell(s) of {}",
        query.geometry.kind_name(),
        cover.cells.len(),
        range_type
    );
    Ok(cover)
}

/// Cells at the start level that the normalized bounds of `part` fall into.
fn start_cells(
    part: &Rect<f64>,
    time: Option<(f64, f64)>,
    dims: usize,
    leaf_level: u8,
) -> Vec<CurveCell> {
    let mut min = [
        normalize_degrees(part.min().x),
        normalize_degrees(part.min().y),
        0.0,
    ];
    let mut max = [
        normalize_degrees(part.max().x),
        normalize_degrees(part.max().y),
        0.0,
    ];
    if let Some((start, end)) = time {
        min[2] = start;
        max[2] = end;
    }

    let extent = (0..dims).map(|d| max[d] - min[d]).fold(0.0f64, f64::max);
    let level = if extent <= 0.0 {
        leaf_level
    } else {
        ((-extent.log2()).floor() as i64).clamp(0, leaf_level as i64) as u8
    };

    let mut cells = vec![CurveCell::new(level, [0; 3])];
    for d in 0..dims {
        let low = grid_coord(min[d], level);
        let high = grid_coord(max[d], level);
        cells = cells
            .into_iter()
            .flat_map(|cell| {
                (low..=high).map(move |c| {
                    let mut coords = cell.coords;
                    coords[d] = c;
                    CurveCell::new(level, coords)
                })
            })
            .collect();
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Point, polygon};
    use geoplan_types::{BoundingBox, TimeInterval};

    fn bbox(west: f64, south: f64, east: f64, north: f64) -> Geometry {
        Geometry::BoundingBox(BoundingBox::from_edges(west, south, east, north).unwrap())
    }

    #[test]
    fn test_small_bbox_maps_to_four_cells() {
        let query = QueryGeometry::spatial(bbox(-1.0, -1.0, 1.0, 1.0));
        let cover = map_to_curve(&query, RangeType::Z2).unwrap();
        assert_eq!(
            cover.cells(),
            &[
                CurveCell::new(7, [63, 63, 0]),
                CurveCell::new(7, [63, 64, 0]),
                CurveCell::new(7, [64, 63, 0]),
                CurveCell::new(7, [64, 64, 0]),
            ]
        );
        for cell in cover.cells() {
            let assessment = cover.assess(cell).unwrap();
            assert!((assessment.true_measure - 1.0).abs() < 1e-9);
            assert!(assessment.expansion() > 2.0);
        }
    }

    #[test]
    fn test_point_maps_to_single_leaf() {
        let query = QueryGeometry::spatial(Geometry::Point(Point::new(13.4, 52.5)));
        let cover = map_to_curve(&query, RangeType::Z2).unwrap();
        assert_eq!(cover.cells().len(), 1);
        let cell = cover.cells()[0];
        assert_eq!(cell.level, MAX_RECURSION_DEPTH);
        assert!(cover.assess(&cell).unwrap().expansion() < 1.0 + 1e-6);
        assert!(cover.footprint(&cell).intersects(&Point::new(13.4, 52.5)));
    }

    #[test]
    fn test_wrapping_bbox_maps_both_sides() {
        let query = QueryGeometry::spatial(bbox(179.0, -1.0, -179.0, 1.0));
        let cover = map_to_curve(&query, RangeType::Z2).unwrap();
        assert!(!cover.cells().is_empty());
        let footprints: Vec<Rect<f64>> = cover.cells().iter().map(|c| cover.footprint(c)).collect();
        assert!(footprints.iter().any(|r| r.max().x > 179.0));
        assert!(footprints.iter().any(|r| r.min().x < -179.0));
        assert!(footprints.iter().all(|r| r.max().x > 178.0 || r.min().x < -178.0));
    }

    #[test]
    fn test_xz_starts_at_root() {
        let polygon = polygon![
            (x: 10.0, y: 10.0),
            (x: 20.0, y: 10.0),
            (x: 15.0, y: 20.0),
            (x: 10.0, y: 10.0),
        ];
        let query = QueryGeometry::spatial(Geometry::Polygon(polygon));
        let cover = map_to_curve(&query, RangeType::Xz2).unwrap();
        assert_eq!(cover.cells(), &[CurveCell::ROOT]);
        assert_eq!(cover.leaf_level(), 12);
        let assessment = cover.assess(&CurveCell::ROOT).unwrap();
        assert!((assessment.true_measure - 50.0).abs() < 1e-6);
    }

    #[test]
    fn test_dimensionality_mismatch() {
        let interval = TimeInterval::new(1_000, 2_000).unwrap();
        let timed = QueryGeometry::spatio_temporal(bbox(0.0, 0.0, 1.0, 1.0), interval);
        assert!(matches!(
            map_to_curve(&timed, RangeType::Z2),
            Err(PlannerError::UnsupportedGeometryKind { .. })
        ));
        let untimed = QueryGeometry::spatial(bbox(0.0, 0.0, 1.0, 1.0));
        assert!(matches!(
            map_to_curve(&untimed, RangeType::Xz3),
            Err(PlannerError::UnsupportedGeometryKind { .. })
        ));
        assert!(map_to_curve(&timed, RangeType::Z3).is_ok());
    }

    #[test]
    fn test_time_disjoint_cell_is_rejected() {
        let interval = TimeInterval::new(0, 3_600).unwrap();
        let query = QueryGeometry::spatio_temporal(bbox(0.0, 0.0, 1.0, 1.0), interval);
        let cover = map_to_curve(&query, RangeType::Z3).unwrap();
        // upper half of the time axis
        let late = CurveCell::new(1, [1, 1, 1]);
        assert!(cover.assess(&late).is_none());
        assert!(cover.cells().iter().all(|c| c.coords[2] == 0));
    }

    #[test]
    fn test_edge_contact_is_disjoint() {
        let query = QueryGeometry::spatial(bbox(0.0, 0.0, 1.0, 1.0));
        let cover = map_to_curve(&query, RangeType::Z2).unwrap();
        // level 1 cell [-180, 0) x [0, 180): touches the box along x = 0 only
        assert!(cover.assess(&CurveCell::new(1, [0, 1, 0])).is_none());
        assert!(cover.assess(&CurveCell::new(1, [1, 1, 0])).is_some());
    }
}
