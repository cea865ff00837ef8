//! Extended Z-order (XZ) curves for data with extent.
//!
//! An element is stored in the smallest cell whose doubled extent encloses it. Every
//! cell therefore owns one sequence code of its own, followed by the codes of its
//! subtree. Codes follow the sequence numbering of Böhm, Klump and Kriegel (1999).

use super::{CellExtent, CurveCell, SpaceFillingCurve, grid_coord};
use geoplan_types::{CurveRange, RangeType};

/// XZ curve of resolution `g` levels.
#[derive(Debug, Clone, Copy)]
pub struct XzCurve {
    range_type: RangeType,
    dims: usize,
    g: u8,
}

pub const XZ2: XzCurve = XzCurve {
    range_type: RangeType::Xz2,
    dims: 2,
    g: 12,
};

pub const XZ3: XzCurve = XzCurve {
    range_type: RangeType::Xz3,
    dims: 3,
    g: 12,
};

impl XzCurve {
    fn fanout(&self) -> u64 {
        1 << self.dims
    }

    /// Number of codes in the subtree of a cell at `level` (the cell's own code included).
    fn subtree_size(&self, level: u8) -> u64 {
        let fanout = self.fanout();
        (fanout.pow((self.g - level) as u32 + 1) - 1) / (fanout - 1)
    }

    fn sequence_code(&self, cell: &CurveCell) -> u64 {
        (1..=cell.level).fold(0u64, |code, depth| {
            let quadrant = cell.quadrant_at(depth, self.dims);
            code + 1 + quadrant * self.subtree_size(depth)
        })
    }

    /// Level at which an element of the given extent is stored.
    fn storage_level(&self, element: &CellExtent) -> u8 {
        let max_dim = (0..self.dims)
            .map(|d| element.max[d] - element.min[d])
            .fold(0.0f64, f64::max);
        if max_dim <= 0.0 {
            return self.g;
        }
        let l1 = (max_dim.ln() / 0.5f64.ln()).floor();
        if l1 >= self.g as f64 {
            return self.g;
        }
        let l1 = l1.max(0.0) as u8;
        let w2 = 0.5f64.powi(l1 as i32 + 1);
        let fits_next = (0..self.dims)
            .all(|d| element.max[d] <= (element.min[d] / w2).floor() * w2 + 2.0 * w2);
        if fits_next { l1 + 1 } else { l1 }
    }
}

impl SpaceFillingCurve for XzCurve {
    fn range_type(&self) -> RangeType {
        self.range_type
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn max_level(&self) -> u8 {
        self.g
    }

    fn extent(&self, cell: &CurveCell) -> CellExtent {
        CellExtent::of_cell(cell, self.dims, 2.0)
    }

    fn subtree_range(&self, cell: &CurveCell) -> CurveRange {
        let code = self.sequence_code(cell);
        CurveRange::new(code, code + self.subtree_size(cell.level))
    }

    fn own_range(&self, cell: &CurveCell) -> Option<CurveRange> {
        let code = self.sequence_code(cell);
        Some(CurveRange::new(code, code + 1))
    }

    fn index(&self, element: &CellExtent) -> u64 {
        let level = self.storage_level(element);
        let mut coords = [0u32; 3];
        for (d, slot) in coords.iter_mut().enumerate().take(self.dims) {
            *slot = grid_coord(element.min[d], level);
        }
        self.sequence_code(&CurveCell::new(level, coords))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_codes_small_resolution() {
        let curve = XzCurve {
            range_type: RangeType::Xz2,
            dims: 2,
            g: 2,
        };
        assert_eq!(curve.subtree_range(&CurveCell::ROOT), CurveRange::new(0, 21));
        let q0 = CurveCell::new(1, [0, 0, 0]);
        let q1 = CurveCell::new(1, [1, 0, 0]);
        assert_eq!(curve.subtree_range(&q0), CurveRange::new(1, 6));
        assert_eq!(curve.subtree_range(&q1), CurveRange::new(6, 11));
        assert_eq!(curve.own_range(&q1), Some(CurveRange::new(6, 7)));
        // first child of q1
        assert_eq!(
            curve.subtree_range(&CurveCell::new(2, [2, 0, 0])),
            CurveRange::new(7, 8)
        );
    }

    #[test]
    fn test_own_code_then_children_fill_subtree() {
        for curve in [XZ2, XZ3] {
            let parent = CurveCell::new(2, [1, 3, 2]);
            let parent = if curve.dims == 2 {
                CurveCell::new(2, [1, 3, 0])
            } else {
                parent
            };
            let subtree = curve.subtree_range(&parent);
            let own = curve.own_range(&parent).unwrap();
            assert_eq!(own.low, subtree.low);
            let mut next = own.high;
            for child in curve.children(&parent) {
                let range = curve.subtree_range(&child);
                assert_eq!(range.low, next);
                next = range.high;
            }
            assert_eq!(next, subtree.high);
        }
    }

    #[test]
    fn test_extent_is_doubled_and_clipped() {
        let extent = XZ2.extent(&CurveCell::new(1, [0, 0, 0]));
        assert_eq!(extent.max[0], 1.0);
        let extent = XZ2.extent(&CurveCell::new(2, [0, 0, 0]));
        assert_eq!(extent.max[0], 0.5);
        let extent = XZ2.extent(&CurveCell::new(2, [3, 3, 0]));
        assert_eq!(extent.min[0], 0.75);
        assert_eq!(extent.max[0], 1.0);
    }

    #[test]
    fn test_index_lands_in_enclosing_cell() {
        let element = CellExtent {
            min: [0.26, 0.51, 0.0],
            max: [0.30, 0.55, 1.0],
        };
        let index = XZ2.index(&element);
        // 0.04 wide: stored at level 4 or 5, under the level-2 cell [1, 2]
        let ancestor = CurveCell::new(2, [1, 2, 0]);
        assert!(XZ2.subtree_range(&ancestor).contains(index));

        let level = XZ2.storage_level(&element);
        let cell = CurveCell::new(level, [grid_coord(0.26, level), grid_coord(0.51, level), 0]);
        let extent = XZ2.extent(&cell);
        assert!(extent.min[0] <= element.min[0] && element.max[0] <= extent.max[0]);
        assert!(extent.min[1] <= element.min[1] && element.max[1] <= extent.max[1]);
    }

    #[test]
    fn test_index_of_point_uses_finest_level() {
        let element = CellExtent {
            min: [0.5, 0.5, 0.0],
            max: [0.5, 0.5, 0.0],
        };
        assert_eq!(XZ2.storage_level(&element), 12);
    }
}
