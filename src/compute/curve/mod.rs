//! Space-filling curves over normalized longitude/latitude(/time) space.
//!
//! Every curve splits the unit square (or cube) into a quadtree (octree) of cells.
//! A cell at level `l` has edge `2^-l` and integer grid coordinates at that level.
//! Each curve orders cells so that a cell and all its descendants occupy one
//! contiguous index range.
//!
//! Longitude and latitude are both normalized over `[-180, 180]` so that cells are
//! square in degrees; latitudes beyond ±90 are never reached by valid geometries.
//!
//! ```text
//! level 1 (quadrants)        z2 index order       xz2 sequence codes (g = 2)
//! +-----+-----+              +-----+-----+        root = 0
//! | 2   | 3   |              | 2   | 3   |        q0 = 1   q0 children = 2..=5
//! +-----+-----+              +-----+-----+        q1 = 6   q1 children = 7..=10
//! | 0   | 1   |              | 0   | 1   |        ...
//! +-----+-----+              +-----+-----+
//! ```

mod xz;
mod z;

pub use xz::{XZ2, XZ3, XzCurve};
pub use z::{Z2, Z3, ZCurve};

use geo::{Rect, coord};
use geoplan_types::{CurveRange, RangeType, TIME_DOMAIN_SECONDS};
use smallvec::SmallVec;

/// Children of one cell: 4 for 2D curves, 8 for 3D curves.
pub type CellChildren = SmallVec<[CurveCell; 8]>;

/// A cell of the curve's quadtree/octree: a level plus grid coordinates at that level.
///
/// Coordinates are `[lon, lat, time]`; the time slot is zero on 2D curves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CurveCell {
    pub level: u8,
    pub coords: [u32; 3],
}

impl CurveCell {
    pub const ROOT: CurveCell = CurveCell {
        level: 0,
        coords: [0; 3],
    };

    pub fn new(level: u8, coords: [u32; 3]) -> Self {
        Self { level, coords }
    }

    /// Child quadrant/octant number at level `depth` (1-based) along the path from the root.
    ///
    /// Bit `d` of the result is the low bit of dimension `d` at that depth.
    pub fn quadrant_at(&self, depth: u8, dims: usize) -> u64 {
        debug_assert!(depth >= 1 && depth <= self.level);
        let shift = self.level - depth;
        (0..dims).fold(0u64, |q, d| {
            q | ((((self.coords[d] >> shift) & 1) as u64) << d)
        })
    }

    /// The `2^dims` children of this cell, in curve order.
    pub fn children(&self, dims: usize) -> CellChildren {
        (0..1u32 << dims)
            .map(|q| {
                let mut coords = [0u32; 3];
                for (d, slot) in coords.iter_mut().enumerate().take(dims) {
                    *slot = (self.coords[d] << 1) | ((q >> d) & 1);
                }
                CurveCell {
                    level: self.level + 1,
                    coords,
                }
            })
            .collect()
    }
}

/// Axis-aligned region of the unit square/cube.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellExtent {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl CellExtent {
    /// Extent of a cell, grown by `scale` cell edges and clipped to the unit domain.
    pub(crate) fn of_cell(cell: &CurveCell, dims: usize, scale: f64) -> Self {
        let edge = 0.5f64.powi(cell.level as i32);
        let mut min = [0.0; 3];
        let mut max = [1.0; 3];
        for d in 0..dims {
            min[d] = cell.coords[d] as f64 * edge;
            max[d] = (min[d] + scale * edge).min(1.0);
        }
        Self { min, max }
    }

    /// Spatial part in degrees.
    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            coord! { x: denormalize_degrees(self.min[0]), y: denormalize_degrees(self.min[1]) },
            coord! { x: denormalize_degrees(self.max[0]), y: denormalize_degrees(self.max[1]) },
        )
    }

    /// Normalized time span (the full unit interval on 2D curves).
    pub fn time(&self) -> (f64, f64) {
        (self.min[2], self.max[2])
    }
}

/// Map a longitude or latitude in degrees onto `[0, 1]`.
pub fn normalize_degrees(value: f64) -> f64 {
    ((value + 180.0) / 360.0).clamp(0.0, 1.0)
}

pub fn denormalize_degrees(value: f64) -> f64 {
    value * 360.0 - 180.0
}

/// Map Unix seconds onto `[0, 1]` of the time domain.
pub fn normalize_seconds(seconds: i64) -> f64 {
    (seconds as f64 / TIME_DOMAIN_SECONDS as f64).clamp(0.0, 1.0)
}

/// Grid coordinate of a normalized value at `level`.
pub(crate) fn grid_coord(value: f64, level: u8) -> u32 {
    let cells = 1u64 << level;
    ((value * cells as f64).floor() as u64).min(cells - 1) as u32
}

/// A space-filling curve that orders the cells of one curve family.
pub trait SpaceFillingCurve: Send + Sync {
    fn range_type(&self) -> RangeType;

    /// 2 for spatial curves, 3 for spatio-temporal curves.
    fn dimensions(&self) -> usize;

    /// Deepest level addressable on this curve.
    fn max_level(&self) -> u8;

    /// Region whose elements are indexed under `cell`. Extended curves enlarge it.
    fn extent(&self, cell: &CurveCell) -> CellExtent;

    /// Indices of everything stored in `cell` or any descendant.
    fn subtree_range(&self, cell: &CurveCell) -> CurveRange;

    /// Indices stored at `cell` itself and not in its children. `None` on point curves.
    fn own_range(&self, cell: &CurveCell) -> Option<CurveRange>;

    /// Index an element with the given normalized bounds.
    fn index(&self, element: &CellExtent) -> u64;

    fn children(&self, cell: &CurveCell) -> CellChildren {
        cell.children(self.dimensions())
    }
}

/// The curve implementing a range type.
pub fn curve_for(range_type: RangeType) -> &'static dyn SpaceFillingCurve {
    match range_type {
        RangeType::Z2 => &Z2,
        RangeType::Z3 => &Z3,
        RangeType::Xz2 => &XZ2,
        RangeType::Xz3 => &XZ3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_in_curve_order() {
        let parent = CurveCell::new(1, [1, 0, 0]);
        let children = parent.children(2);
        assert_eq!(children.len(), 4);
        assert_eq!(children[0], CurveCell::new(2, [2, 0, 0]));
        assert_eq!(children[1], CurveCell::new(2, [3, 0, 0]));
        assert_eq!(children[2], CurveCell::new(2, [2, 1, 0]));
        assert_eq!(children[3], CurveCell::new(2, [3, 1, 0]));
        for (q, child) in children.iter().enumerate() {
            assert_eq!(child.quadrant_at(2, 2), q as u64);
        }
        assert_eq!(CurveCell::ROOT.children(3).len(), 8);
    }

    #[test]
    fn test_normalization_is_square_in_degrees() {
        assert_eq!(normalize_degrees(-180.0), 0.0);
        assert_eq!(normalize_degrees(0.0), 0.5);
        assert_eq!(normalize_degrees(90.0), 0.75);
        assert_eq!(denormalize_degrees(0.25), -90.0);

        let extent = CellExtent::of_cell(&CurveCell::new(8, [128, 128, 0]), 2, 1.0);
        let rect = extent.to_rect();
        assert!((rect.width() - 1.40625).abs() < 1e-12);
        assert!((rect.height() - 1.40625).abs() < 1e-12);
        assert_eq!(rect.min().x, 0.0);
        assert_eq!(rect.min().y, 0.0);
    }

    #[test]
    fn test_grid_coord_clamps_upper_edge() {
        assert_eq!(grid_coord(1.0, 3), 7);
        assert_eq!(grid_coord(0.0, 3), 0);
        assert_eq!(grid_coord(0.5, 1), 1);
    }

    #[test]
    fn test_curve_for_matches_range_type() {
        for range_type in RangeType::ALL {
            let curve = curve_for(range_type);
            assert_eq!(curve.range_type(), range_type);
            assert_eq!(curve.dimensions(), range_type.dimensions());
        }
    }
}
