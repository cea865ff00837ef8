//! Space-filling-curve range planner with tiered geometry aggregation.
//!
//! ```rust
//! use geoplan::prelude::*;
//! use geoplan::compute::validation::ManualGeometryForm;
//!
//! let planner = PlannerBuilder::new().build(MemoryBackend::new())?;
//!
//! let form = ManualGeometryForm::new("-1,-1,1,1", "bbox")
//!     .with_ranges(RangeType::Z2, RangeSettings::new(4, 2.0).with_optimize_ranges(true));
//! let plan = planner.plan_form(&form, &CancellationToken::new())?;
//! assert!(plan.len() <= 4);
//! # Ok::<(), geoplan::PlannerError>(())
//! ```

pub mod aggregate;
pub mod backend;
pub mod builder;
pub mod compute;
pub mod config;
pub mod encoding;
pub mod error;
pub mod fields;
pub mod planner;
pub mod service;

pub use aggregate::{
    Aggregation, AggregationMode, Degradation, FunctionRequest, GeoFunctionKind, QueryStatus,
    TierResult, aggregate,
};
pub use backend::{BackendStats, GeoBackend, MemoryBackend};
pub use builder::PlannerBuilder;
pub use compute::decompose::{Envelope, MAX_RECURSION_DEPTH, decompose};
pub use compute::mapper::{CurveCover, map_to_curve};
pub use compute::optimize::optimize;
pub use compute::validation::{ManualGeometryForm, ValidatedQuery, validate, validate_with};
pub use config::Config;
pub use encoding::GeometryEncoding;
pub use error::{FieldViolation, PlannerError, Result, ValidationError};
pub use fields::{FieldType, FieldsByType};
pub use planner::{RangePlan, RangePlanner};
pub use service::{FeatureQuery, GeoFeaturesResponse, GeoPlanner};

pub use geoplan_types::{
    BoundingBox, CurveRange, Geo, GeoByField, GeoByTier, GeoFeatures, GeoFunction, GeoTerms,
    Geometry, QueryGeometry, QueryRangeSettingsMap, RangeSettings, RangeType, TimeInterval,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{Config, PlannerBuilder, PlannerError, Result};

    pub use crate::{FeatureQuery, GeoPlanner, RangePlan, RangePlanner};

    pub use crate::{AggregationMode, FunctionRequest, QueryStatus, TierResult};

    pub use crate::{FieldType, FieldsByType};

    pub use crate::{GeoBackend, MemoryBackend};

    pub use geoplan_types::{CurveRange, Geo, GeoTerms, RangeSettings, RangeType};

    pub use tokio_util::sync::CancellationToken;

    pub use std::time::Duration;
}
