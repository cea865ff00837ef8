//! Morton (Z-order) curves for point data.

use super::{CellExtent, CurveCell, SpaceFillingCurve, grid_coord};
use geoplan_types::{CurveRange, RangeType};

/// Morton curve with `bits` levels per dimension.
#[derive(Debug, Clone, Copy)]
pub struct ZCurve {
    range_type: RangeType,
    dims: usize,
    bits: u8,
}

/// Longitude/latitude Morton curve, 31 bits per dimension.
pub const Z2: ZCurve = ZCurve {
    range_type: RangeType::Z2,
    dims: 2,
    bits: 31,
};

/// Longitude/latitude/time Morton curve, 21 bits per dimension.
pub const Z3: ZCurve = ZCurve {
    range_type: RangeType::Z3,
    dims: 3,
    bits: 21,
};

impl ZCurve {
    /// Interleaved code of `cell` at its own level.
    fn prefix(&self, cell: &CurveCell) -> u64 {
        (1..=cell.level).fold(0u64, |code, depth| {
            (code << self.dims) | cell.quadrant_at(depth, self.dims)
        })
    }
}

impl SpaceFillingCurve for ZCurve {
    fn range_type(&self) -> RangeType {
        self.range_type
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn max_level(&self) -> u8 {
        self.bits
    }

    fn extent(&self, cell: &CurveCell) -> CellExtent {
        CellExtent::of_cell(cell, self.dims, 1.0)
    }

    fn subtree_range(&self, cell: &CurveCell) -> CurveRange {
        let shift = self.dims as u32 * (self.bits - cell.level) as u32;
        let prefix = self.prefix(cell);
        CurveRange::new(prefix << shift, (prefix + 1) << shift)
    }

    fn own_range(&self, _cell: &CurveCell) -> Option<CurveRange> {
        None
    }

    /// Index of the element's lower corner.
    fn index(&self, element: &CellExtent) -> u64 {
        let mut coords = [0u32; 3];
        for (d, slot) in coords.iter_mut().enumerate().take(self.dims) {
            *slot = grid_coord(element.min[d], self.bits);
        }
        self.prefix(&CurveCell::new(self.bits, coords))
    }
}
