//! Query geometries in longitude/latitude degrees.
//!
//! A query is a [`Geometry`] (point, bounding box or polygon) plus an optional
//! [`TimeInterval`] for the spatio-temporal curves.

use geo::{Area, BoundingRect, Coord, MultiPolygon, Point, Polygon, Rect, coord};
use serde::{Deserialize, Serialize};

/// Upper bound of the time axis indexed by spatio-temporal curves, in Unix seconds.
pub const TIME_DOMAIN_SECONDS: i64 = 1 << 32;

/// Axis-aligned box in degrees.
///
/// `min <= max` holds on both axes. A box that crosses the antimeridian keeps that
/// ordering and sets `wraps_antimeridian`; it then covers longitudes
/// `[max.x, 180] ∪ [-180, min.x]`.
///
/// # Examples
///
/// ```
/// use geoplan_types::geometry::BoundingBox;
///
/// // 170°E eastward to 170°W
/// let pacific = BoundingBox::from_edges(170.0, -10.0, -170.0, 10.0).unwrap();
/// assert!(pacific.wraps_antimeridian());
/// assert_eq!(pacific.parts().len(), 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    min: Coord<f64>,
    max: Coord<f64>,
    wraps_antimeridian: bool,
}

impl BoundingBox {
    /// Create a non-wrapping box. Returns `None` unless `min <= max` on both axes.
    pub fn new(min: Coord<f64>, max: Coord<f64>) -> Option<Self> {
        Self::checked(min, max, false)
    }

    /// Create a box that crosses the antimeridian, spanning from `max.x` eastward to `min.x`.
    pub fn wrapping(min: Coord<f64>, max: Coord<f64>) -> Option<Self> {
        Self::checked(min, max, true)
    }

    /// Build from compass edges. `west > east` describes a box crossing the antimeridian.
    pub fn from_edges(west: f64, south: f64, east: f64, north: f64) -> Option<Self> {
        if west <= east {
            Self::new(coord! { x: west, y: south }, coord! { x: east, y: north })
        } else {
            Self::wrapping(coord! { x: east, y: south }, coord! { x: west, y: north })
        }
    }

    fn checked(min: Coord<f64>, max: Coord<f64>, wraps_antimeridian: bool) -> Option<Self> {
        let finite = [min.x, min.y, max.x, max.y].iter().all(|v| v.is_finite());
        if !finite || min.x > max.x || min.y > max.y {
            return None;
        }
        Some(Self {
            min,
            max,
            wraps_antimeridian,
        })
    }

    pub fn min(&self) -> Coord<f64> {
        self.min
    }

    pub fn max(&self) -> Coord<f64> {
        self.max
    }

    pub fn wraps_antimeridian(&self) -> bool {
        self.wraps_antimeridian
    }

    /// The non-wrapping rectangles this box covers (two when it crosses the antimeridian).
    pub fn parts(&self) -> Vec<Rect<f64>> {
        if self.wraps_antimeridian {
            vec![
                Rect::new(
                    coord! { x: self.max.x, y: self.min.y },
                    coord! { x: 180.0, y: self.max.y },
                ),
                Rect::new(
                    coord! { x: -180.0, y: self.min.y },
                    coord! { x: self.min.x, y: self.max.y },
                ),
            ]
        } else {
            vec![Rect::new(self.min, self.max)]
        }
    }

    /// Area in square degrees.
    pub fn area(&self) -> f64 {
        self.parts().iter().map(|r| r.unsigned_area()).sum()
    }
}

/// A query geometry.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Point<f64>),
    BoundingBox(BoundingBox),
    Polygon(Polygon<f64>),
}

impl Geometry {
    /// Short lowercase name of the variant, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "point",
            Geometry::BoundingBox(_) => "bounding box",
            Geometry::Polygon(_) => "polygon",
        }
    }

    /// Bounding rectangles of the geometry, one per non-wrapping part.
    pub fn bounding_parts(&self) -> Vec<Rect<f64>> {
        match self {
            Geometry::Point(p) => vec![Rect::new(p.0, p.0)],
            Geometry::BoundingBox(b) => b.parts(),
            Geometry::Polygon(poly) => poly.bounding_rect().into_iter().collect(),
        }
    }

    /// Area in square degrees. Zero for points and degenerate shapes.
    pub fn area(&self) -> f64 {
        match self {
            Geometry::Point(_) => 0.0,
            Geometry::BoundingBox(b) => b.area(),
            Geometry::Polygon(poly) => poly.unsigned_area(),
        }
    }

    /// Convert to a `geo` geometry. Wrapping boxes become a two-part multipolygon.
    pub fn to_geo(&self) -> geo::Geometry<f64> {
        match self {
            Geometry::Point(p) => geo::Geometry::Point(*p),
            Geometry::BoundingBox(b) => {
                let mut parts: Vec<Polygon<f64>> =
                    b.parts().into_iter().map(|r| r.to_polygon()).collect();
                if parts.len() == 1 {
                    geo::Geometry::Polygon(parts.remove(0))
                } else {
                    geo::Geometry::MultiPolygon(MultiPolygon::new(parts))
                }
            }
            Geometry::Polygon(poly) => geo::Geometry::Polygon(poly.clone()),
        }
    }
}

/// Closed interval of Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    start: i64,
    end: i64,
}

impl TimeInterval {
    /// Returns `None` unless `0 <= start <= end <= TIME_DOMAIN_SECONDS`.
    pub fn new(start: i64, end: i64) -> Option<Self> {
        if start < 0 || start > end || end > TIME_DOMAIN_SECONDS {
            return None;
        }
        Some(Self { start, end })
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    /// Length in seconds; zero for an instant.
    pub fn length(&self) -> i64 {
        self.end - self.start
    }
}

/// Geometry plus an optional time interval, the input of the curve mapper.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryGeometry {
    pub geometry: Geometry,
    pub interval: Option<TimeInterval>,
}

impl QueryGeometry {
    pub fn spatial(geometry: Geometry) -> Self {
        Self {
            geometry,
            interval: None,
        }
    }

    pub fn spatio_temporal(geometry: Geometry, interval: TimeInterval) -> Self {
        Self {
            geometry,
            interval: Some(interval),
        }
    }
}
