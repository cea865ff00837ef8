//! Range planning pipeline: mapper, decomposer, optimizer.

use crate::compute::decompose::{Envelope, decompose};
use crate::compute::mapper::map_to_curve;
use crate::compute::optimize::optimize;
use crate::error::{PlannerError, Result};
use geo::{MultiPolygon, Polygon};
use geoplan_types::{CurveRange, Geo, GeoByTier, QueryGeometry, RangeSettings, RangeType};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// Runs the planning pipeline for validated queries.
///
/// # Examples
///
/// ```
/// use geoplan::RangePlanner;
/// use geoplan_types::{BoundingBox, Geometry, QueryGeometry, RangeSettings, RangeType};
///
/// let bbox = BoundingBox::from_edges(-1.0, -1.0, 1.0, 1.0).unwrap();
/// let query = QueryGeometry::spatial(Geometry::BoundingBox(bbox));
/// let settings = RangeSettings::new(4, 2.0).with_optimize_ranges(true);
///
/// let plan = RangePlanner::new().plan(&query, RangeType::Z2, &settings)?;
/// assert!(plan.len() <= 4);
/// assert!(plan.envelopes().iter().all(|e| e.expansion <= 2.0));
/// # Ok::<(), geoplan::PlannerError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct RangePlanner {
    cancel: CancellationToken,
}

impl RangePlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plan under `cancel`; a cancelled token aborts planning with no ranges.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn plan(
        &self,
        query: &QueryGeometry,
        range_type: RangeType,
        settings: &RangeSettings,
    ) -> Result<RangePlan> {
        if let Some((field, message)) = settings.violations().into_iter().next() {
            return Err(PlannerError::InvalidInput(format!("{} {}", field, message)));
        }

        let cover = map_to_curve(query, range_type)?;
        let envelopes = decompose(&cover, settings, &self.cancel)?;
        let decomposed = envelopes.len();
        let envelopes = optimize(envelopes, settings);
        log::debug!(
            "Planned {} range(s) on {} ({} before optimization)",
            envelopes.len(),
            range_type,
            decomposed
        );

        Ok(RangePlan {
            range_type,
            envelopes,
        })
    }
}

/// The ranges planned for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct RangePlan {
    range_type: RangeType,
    envelopes: Vec<Envelope>,
}

impl RangePlan {
    pub fn range_type(&self) -> RangeType {
        self.range_type
    }

    pub fn envelopes(&self) -> &[Envelope] {
        &self.envelopes
    }

    /// Scan bounds for the backend, sorted by `low`.
    pub fn ranges(&self) -> Vec<CurveRange> {
        self.envelopes.iter().map(|e| e.range).collect()
    }

    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    /// Curve indices covered, summed over all ranges.
    pub fn scan_cost(&self) -> u128 {
        self.envelopes
            .iter()
            .map(|e| e.range.span() as u128)
            .sum()
    }

    /// Range footprints grouped by decomposition level, one multipolygon per level.
    pub fn to_geo_by_tier(&self) -> GeoByTier {
        let mut by_level: BTreeMap<u32, Vec<Polygon<f64>>> = BTreeMap::new();
        for envelope in &self.envelopes {
            by_level
                .entry(envelope.level as u32)
                .or_default()
                .push(envelope.footprint.to_polygon());
        }
        let tiers = by_level.into_iter().map(|(level, polygons)| {
            let shape = geo::Geometry::MultiPolygon(MultiPolygon::new(polygons));
            (level, Geo::from_geometry(&shape))
        });
        // levels come from map keys
        GeoByTier::from_tiers(tiers).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoplan_types::{BoundingBox, Geometry, TimeInterval};

    fn small_box() -> QueryGeometry {
        QueryGeometry::spatial(Geometry::BoundingBox(
            BoundingBox::from_edges(-1.0, -1.0, 1.0, 1.0).unwrap(),
        ))
    }

    #[test]
    fn test_plan_small_box_end_to_end() {
        let settings = RangeSettings::new(4, 2.0).with_optimize_ranges(true);
        let plan = RangePlanner::new()
            .plan(&small_box(), RangeType::Z2, &settings)
            .unwrap();
        assert!(plan.len() <= 4);
        let ranges = plan.ranges();
        for (i, a) in ranges.iter().enumerate() {
            for b in &ranges[i + 1..] {
                assert_eq!(a.overlap(b), 0);
            }
        }
        assert!(plan.scan_cost() > 0);
    }

    #[test]
    fn test_geo_by_tier_groups_levels() {
        let settings = RangeSettings::new(4, 2.0);
        let plan = RangePlanner::new()
            .plan(&small_box(), RangeType::Z2, &settings)
            .unwrap();
        let tiers = plan.to_geo_by_tier();
        assert_eq!(tiers.len(), 1);
        let geo = tiers.get(8).unwrap();
        assert!(geo.wkt().starts_with("MULTIPOLYGON"));
    }

    #[test]
    fn test_rejects_invalid_settings() {
        let result = RangePlanner::new().plan(&small_box(), RangeType::Z2, &RangeSettings::new(0, 2.0));
        assert!(matches!(result, Err(PlannerError::InvalidInput(_))));
    }

    #[test]
    fn test_cancelled_planner_returns_no_ranges() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = RangePlanner::with_cancellation(cancel).plan(
            &small_box(),
            RangeType::Z2,
            &RangeSettings::new(4, 2.0),
        );
        assert!(matches!(result, Err(PlannerError::Cancelled)));
    }

    #[test]
    fn test_spatio_temporal_plan() {
        let interval = TimeInterval::new(1_700_000_000, 1_700_086_400).unwrap();
        let query = QueryGeometry::spatio_temporal(small_box().geometry, interval);
        let settings = RangeSettings::new(16, 4.0).with_optimize_ranges(true);
        let plan = RangePlanner::new().plan(&query, RangeType::Z3, &settings).unwrap();
        assert!(!plan.is_empty());
        assert!(plan.len() <= 16);

        let plan = RangePlanner::new().plan(&query, RangeType::Xz3, &settings).unwrap();
        assert!(!plan.is_empty());
        assert!(plan.len() <= 16);
    }
}
