//! # geoplan-types
//!
//! Value types shared by the geoplan range planner and its collaborators.
//!
//! - **Geometry types**: `Geometry`, `BoundingBox`, `TimeInterval`, `QueryGeometry`
//! - **Range types**: `RangeType`, `RangeSettings`, `QueryRangeSettingsMap`, `CurveRange`
//! - **Aggregation types**: `Geo`, `GeoTerms`, `GeoByTier`, `GeoByField`,
//!   `GeoFunction`, `GeoFeatures`
//!
//! All aggregation and range types serialize to the camelCase JSON shapes consumed by
//! the map front end.
//!
//! ## Examples
//!
//! ```rust
//! use geoplan_types::geometry::BoundingBox;
//! use geoplan_types::range::{RangeSettings, RangeType};
//!
//! let bbox = BoundingBox::from_edges(-1.0, -1.0, 1.0, 1.0).unwrap();
//! assert!(!bbox.wraps_antimeridian());
//!
//! let settings = RangeSettings::default();
//! assert!(settings.violations().is_empty());
//! assert_eq!("xz2".parse::<RangeType>().unwrap(), RangeType::Xz2);
//! ```

pub mod error;
pub mod features;
pub mod geometry;
pub mod range;
mod unique;

pub use error::{DuplicateKey, EmptyRange, UnknownRangeType};
pub use features::{Geo, GeoByField, GeoByTier, GeoFeatures, GeoFunction, GeoTerms};
pub use geometry::{BoundingBox, Geometry, QueryGeometry, TIME_DOMAIN_SECONDS, TimeInterval};
pub use range::{CurveRange, QueryRangeSettingsMap, RangeSettings, RangeType};
