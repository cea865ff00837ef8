//! Curve families, per-family range settings and curve index ranges.

use crate::error::{DuplicateKey, EmptyRange, UnknownRangeType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Space-filling curve family used to index a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeType {
    /// Morton curve over longitude/latitude; indexes points.
    Z2,
    /// Morton curve over longitude/latitude/time; indexes points with a timestamp.
    Z3,
    /// Extended Z-order over longitude/latitude; indexes extents.
    Xz2,
    /// Extended Z-order over longitude/latitude/time; indexes extents with a time span.
    Xz3,
}

impl RangeType {
    pub const ALL: [RangeType; 4] = [RangeType::Z2, RangeType::Z3, RangeType::Xz2, RangeType::Xz3];

    pub fn name(&self) -> &'static str {
        match self {
            RangeType::Z2 => "z2",
            RangeType::Z3 => "z3",
            RangeType::Xz2 => "xz2",
            RangeType::Xz3 => "xz3",
        }
    }

    /// Number of curve dimensions (2 spatial, plus time for the 3D families).
    pub fn dimensions(&self) -> usize {
        if self.is_temporal() { 3 } else { 2 }
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, RangeType::Z3 | RangeType::Xz3)
    }
}

impl fmt::Display for RangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RangeType {
    type Err = UnknownRangeType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "z2" => Ok(RangeType::Z2),
            "z3" => Ok(RangeType::Z3),
            "xz2" => Ok(RangeType::Xz2),
            "xz3" => Ok(RangeType::Xz3),
            _ => Err(UnknownRangeType(s.to_string())),
        }
    }
}

/// Tuning knobs for planning ranges over one curve family.
///
/// # Example
///
/// ```rust
/// use geoplan_types::range::RangeSettings;
///
/// let json = r#"{
///     "maxEnvelopes": 4,
///     "maxExpansion": 2.0,
///     "optimizeRanges": true,
///     "maxRangeOverlap": 0.25
/// }"#;
/// let settings: RangeSettings = serde_json::from_str(json).unwrap();
/// assert_eq!(settings.max_envelopes, 4);
/// assert_eq!(settings.range_split_threshold, None);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeSettings {
    /// Hard cap on the number of ranges returned for one query.
    pub max_envelopes: usize,

    /// Largest accepted ratio of covered area to true geometry area per range.
    pub max_expansion: f64,

    /// Run the merge/overlap/split optimizer over the decomposed ranges.
    #[serde(default)]
    pub optimize_ranges: bool,

    /// Curve-domain span above which an optimized range is split in two.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_split_threshold: Option<u64>,

    /// Overlap ratio (overlap / shorter range) at which two ranges are collapsed into one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_range_overlap: Option<f64>,
}

impl RangeSettings {
    const fn default_max_envelopes() -> usize {
        32
    }

    const fn default_max_expansion() -> f64 {
        4.0
    }

    pub fn new(max_envelopes: usize, max_expansion: f64) -> Self {
        Self {
            max_envelopes,
            max_expansion,
            optimize_ranges: false,
            range_split_threshold: None,
            max_range_overlap: None,
        }
    }

    pub fn with_optimize_ranges(mut self, optimize: bool) -> Self {
        self.optimize_ranges = optimize;
        self
    }

    pub fn with_range_split_threshold(mut self, threshold: u64) -> Self {
        self.range_split_threshold = Some(threshold);
        self
    }

    pub fn with_max_range_overlap(mut self, overlap: f64) -> Self {
        self.max_range_overlap = Some(overlap);
        self
    }

    /// Every broken invariant as `(field, message)`; empty when the settings are valid.
    pub fn violations(&self) -> Vec<(&'static str, String)> {
        let mut violations = Vec::new();

        if self.max_envelopes == 0 {
            violations.push(("maxEnvelopes", "must be a positive integer".to_string()));
        }

        if !self.max_expansion.is_finite() || self.max_expansion < 1.0 {
            violations.push((
                "maxExpansion",
                format!("must be a finite ratio >= 1.0, got {}", self.max_expansion),
            ));
        }

        if self.range_split_threshold == Some(0) {
            violations.push((
                "rangeSplitThreshold",
                "must be a positive integer when set".to_string(),
            ));
        }

        if let Some(overlap) = self.max_range_overlap
            && !(0.0..=1.0).contains(&overlap)
        {
            violations.push((
                "maxRangeOverlap",
                format!("must be within [0, 1], got {}", overlap),
            ));
        }

        violations
    }
}

impl Default for RangeSettings {
    fn default() -> Self {
        Self::new(Self::default_max_envelopes(), Self::default_max_expansion())
    }
}

/// Range settings keyed by range type name.
///
/// Keys are kept as strings so unsupported names survive deserialization and can be
/// reported by validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryRangeSettingsMap(
    #[serde(deserialize_with = "crate::unique::deserialize")] BTreeMap<String, RangeSettings>,
);

impl QueryRangeSettingsMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from entries, failing on the first repeated key.
    pub fn from_entries<I, K>(entries: I) -> Result<Self, DuplicateKey>
    where
        I: IntoIterator<Item = (K, RangeSettings)>,
        K: Into<String>,
    {
        let mut map = Self::new();
        for (key, settings) in entries {
            map.try_insert(key, settings)?;
        }
        Ok(map)
    }

    pub fn try_insert<K: Into<String>>(
        &mut self,
        key: K,
        settings: RangeSettings,
    ) -> Result<(), DuplicateKey> {
        let key = key.into();
        if self.0.contains_key(&key) {
            return Err(DuplicateKey(key));
        }
        self.0.insert(key, settings);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&RangeSettings> {
        self.0.get(key)
    }

    pub fn for_range_type(&self, range_type: RangeType) -> Option<&RangeSettings> {
        self.0.get(range_type.name())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RangeSettings)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Half-open interval `[low, high)` of curve indices.
///
/// Deserialization rejects empty ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawCurveRange")]
pub struct CurveRange {
    pub low: u64,
    pub high: u64,
}

#[derive(Deserialize)]
struct RawCurveRange {
    low: u64,
    high: u64,
}

impl TryFrom<RawCurveRange> for CurveRange {
    type Error = EmptyRange;

    fn try_from(raw: RawCurveRange) -> Result<Self, Self::Error> {
        Self::try_new(raw.low, raw.high)
    }
}

impl CurveRange {
    /// # Panics
    ///
    /// Panics if `low >= high`; empty ranges are never produced.
    pub fn new(low: u64, high: u64) -> Self {
        assert!(low < high, "curve range [{}, {}) is empty", low, high);
        Self { low, high }
    }

    pub fn try_new(low: u64, high: u64) -> Result<Self, EmptyRange> {
        if low < high {
            Ok(Self { low, high })
        } else {
            Err(EmptyRange { low, high })
        }
    }

    /// Number of curve indices covered.
    pub fn span(&self) -> u64 {
        self.high - self.low
    }

    /// Number of indices shared with `other`.
    pub fn overlap(&self, other: &CurveRange) -> u64 {
        let low = self.low.max(other.low);
        let high = self.high.min(other.high);
        high.saturating_sub(low)
    }

    /// True when the ranges share an endpoint but no index.
    pub fn touches(&self, other: &CurveRange) -> bool {
        self.high == other.low || other.high == self.low
    }

    pub fn contains(&self, index: u64) -> bool {
        self.low <= index && index < self.high
    }

    /// Smallest range covering both.
    pub fn union(&self, other: &CurveRange) -> CurveRange {
        CurveRange {
            low: self.low.min(other.low),
            high: self.high.max(other.high),
        }
    }
}

impl fmt::Display for CurveRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.low, self.high)
    }
}
