//! Search backend abstraction.
//!
//! The backend scans the planned index ranges for one field and returns its tiered
//! geometry aggregation. Storage itself lives outside this crate.

use crate::aggregate::TierResult;
use crate::error::{PlannerError, Result};
use geoplan_types::CurveRange;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

/// A search backend that aggregates one field over a set of curve ranges.
pub trait GeoBackend: Send + Sync {
    /// Tiered aggregation of `field` over `ranges`.
    fn fetch_tiers(
        &self,
        field: &str,
        ranges: &[CurveRange],
    ) -> impl Future<Output = Result<Vec<TierResult>>> + Send;
}

/// Backend statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Number of fetch requests received
    pub requests: u64,
    /// Total number of ranges received across requests
    pub ranges_received: u64,
}

/// In-process backend serving fixture tiers per field.
///
/// Fields can be given an artificial latency or made to fail, which is how timeouts
/// and partial responses are exercised.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    fixtures: RwLock<BTreeMap<String, Vec<TierResult>>>,
    latency: RwLock<FxHashMap<String, Duration>>,
    failing: RwLock<FxHashSet<String>>,
    last_ranges: RwLock<FxHashMap<String, Vec<CurveRange>>>,
    stats: RwLock<BackendStats>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `tiers` for `field`, replacing earlier fixtures.
    pub fn with_field(self, field: impl Into<String>, tiers: Vec<TierResult>) -> Self {
        self.insert_field(field, tiers);
        self
    }

    /// Delay every answer for `field` by `latency`.
    pub fn with_latency(self, field: impl Into<String>, latency: Duration) -> Self {
        self.latency.write().insert(field.into(), latency);
        self
    }

    /// Answer every request for `field` with a backend error.
    pub fn with_failure(self, field: impl Into<String>) -> Self {
        self.failing.write().insert(field.into());
        self
    }

    pub fn insert_field(&self, field: impl Into<String>, tiers: Vec<TierResult>) {
        self.fixtures.write().insert(field.into(), tiers);
    }

    /// Ranges of the most recent request for `field`.
    pub fn last_ranges(&self, field: &str) -> Option<Vec<CurveRange>> {
        self.last_ranges.read().get(field).cloned()
    }

    pub fn stats(&self) -> BackendStats {
        self.stats.read().clone()
    }

    fn lookup(&self, field: &str, ranges: &[CurveRange]) -> Result<Vec<TierResult>> {
        {
            let mut stats = self.stats.write();
            stats.requests += 1;
            stats.ranges_received += ranges.len() as u64;
        }
        self.last_ranges
            .write()
            .insert(field.to_string(), ranges.to_vec());

        if self.failing.read().contains(field) {
            return Err(PlannerError::Backend {
                field: field.to_string(),
                message: "fixture configured to fail".to_string(),
            });
        }
        Ok(self.fixtures.read().get(field).cloned().unwrap_or_default())
    }
}

impl GeoBackend for MemoryBackend {
    fn fetch_tiers(
        &self,
        field: &str,
        ranges: &[CurveRange],
    ) -> impl Future<Output = Result<Vec<TierResult>>> + Send {
        let delay = self.latency.read().get(field).copied();
        let outcome = self.lookup(field, ranges);
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            outcome
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Geometry, Point};
    use geoplan_types::Geo;

    fn tier(tier: u32) -> TierResult {
        TierResult::new(tier, Geo::from_geometry(&Geometry::Point(Point::new(1.0, 2.0))), true)
    }

    #[tokio::test]
    async fn test_serves_fixtures_and_records_ranges() {
        let backend = MemoryBackend::new().with_field("geom", vec![tier(1), tier(2)]);
        let ranges = [CurveRange::new(0, 10), CurveRange::new(20, 30)];

        let tiers = backend.fetch_tiers("geom", &ranges).await.unwrap();
        assert_eq!(tiers.len(), 2);
        assert_eq!(backend.last_ranges("geom").unwrap(), ranges.to_vec());

        let missing = backend.fetch_tiers("other", &ranges).await.unwrap();
        assert!(missing.is_empty());

        let stats = backend.stats();
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.ranges_received, 4);
    }

    #[tokio::test]
    async fn test_failing_field() {
        let backend = MemoryBackend::new().with_failure("geom");
        let err = backend.fetch_tiers("geom", &[]).await.unwrap_err();
        assert!(matches!(err, PlannerError::Backend { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_applied() {
        let backend = MemoryBackend::new()
            .with_field("slow", vec![tier(1)])
            .with_latency("slow", Duration::from_secs(30));
        let started = tokio::time::Instant::now();
        backend.fetch_tiers("slow", &[]).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(30));
    }
}
