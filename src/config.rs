//! Planner configuration.
//!
//! Kept small and serializable so it can be loaded from JSON or TOML.

use crate::aggregate::AggregationMode;
use crate::error::{PlannerError, Result};
use crate::fields::FieldsByType;
use geoplan_types::{QueryRangeSettingsMap, RangeSettings, RangeType};
use serde::de::Error;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Planner configuration.
///
/// # Example
///
/// ```rust
/// use geoplan::Config;
/// use geoplan_types::RangeType;
///
/// let json = r#"{
///     "default_range_type": "xz2",
///     "backend_timeout_ms": 250,
///     "range_settings": {
///         "xz2": { "maxEnvelopes": 16, "maxExpansion": 3.0, "optimizeRanges": true }
///     }
/// }"#;
/// let config = Config::from_json(json).unwrap();
/// assert_eq!(config.default_range_type, RangeType::Xz2);
/// assert_eq!(config.settings_for(RangeType::Xz2).max_envelopes, 16);
/// // Unconfigured families fall back to the built-in defaults
/// assert_eq!(config.settings_for(RangeType::Z3).max_envelopes, 32);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Range type used when a form does not name one.
    #[serde(default = "Config::default_range_type")]
    pub default_range_type: RangeType,

    /// Per range type defaults, used when a form omits settings for its range type.
    #[serde(default)]
    pub range_settings: QueryRangeSettingsMap,

    /// Per-field timeout for backend aggregation requests.
    #[serde(default = "Config::default_backend_timeout_ms")]
    pub backend_timeout_ms: u64,

    /// Upper bound on backend requests in flight for one query.
    #[serde(default = "Config::default_max_concurrent_fields")]
    pub max_concurrent_fields: usize,

    /// Aggregation mode used when the caller does not choose one.
    #[serde(default)]
    pub aggregation_mode: AggregationMode,

    /// Registered geometry fields by field type. Empty accepts any field.
    #[serde(default)]
    pub fields_by_type: FieldsByType,
}

impl Config {
    const fn default_range_type() -> RangeType {
        RangeType::Z2
    }

    const fn default_backend_timeout_ms() -> u64 {
        5_000
    }

    const fn default_max_concurrent_fields() -> usize {
        8
    }

    pub fn with_default_range_type(mut self, range_type: RangeType) -> Self {
        self.default_range_type = range_type;
        self
    }

    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout_ms = timeout.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    pub fn with_max_concurrent_fields(mut self, limit: usize) -> Self {
        assert!(limit > 0, "Concurrent field limit must be greater than zero");
        self.max_concurrent_fields = limit;
        self
    }

    pub fn with_aggregation_mode(mut self, mode: AggregationMode) -> Self {
        self.aggregation_mode = mode;
        self
    }

    pub fn with_fields_by_type(mut self, fields: FieldsByType) -> Self {
        self.fields_by_type = fields;
        self
    }

    /// Replace the default settings for one range type.
    pub fn with_range_settings(mut self, range_type: RangeType, settings: RangeSettings) -> Self {
        let mut entries: Vec<(String, RangeSettings)> = self
            .range_settings
            .iter()
            .filter(|(name, _)| *name != range_type.name())
            .map(|(name, s)| (name.to_string(), s.clone()))
            .collect();
        entries.push((range_type.name().to_string(), settings));
        self.range_settings = QueryRangeSettingsMap::from_entries(entries)
            .unwrap_or_else(|_| unreachable!("range type entries are unique"));
        self
    }

    /// Settings for `range_type`, falling back to `RangeSettings::default()`.
    pub fn settings_for(&self, range_type: RangeType) -> RangeSettings {
        self.range_settings
            .for_range_type(range_type)
            .cloned()
            .unwrap_or_default()
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.backend_timeout_ms == 0 {
            return Err("Backend timeout must be greater than zero".to_string());
        }

        if self.max_concurrent_fields == 0 {
            return Err("Concurrent field limit must be greater than zero".to_string());
        }

        let conflicts = self.fields_by_type.conflicts();
        if !conflicts.is_empty() {
            return Err(format!(
                "Fields registered under more than one field type: {}",
                conflicts.join(", ")
            ));
        }

        for (name, settings) in self.range_settings.iter() {
            if name.parse::<RangeType>().is_err() {
                return Err(format!("Unsupported range type in range_settings: {}", name));
            }
            if let Some((field, message)) = settings.violations().into_iter().next() {
                return Err(format!("range_settings.{}.{} {}", name, field, message));
            }
        }

        Ok(())
    }

    /// Load configuration from JSON string
    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        let config: Config = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(serde_json::Error::custom(e));
        }
        Ok(config)
    }

    /// Save configuration as JSON string
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load configuration from TOML string (requires toml feature)
    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> std::result::Result<Self, toml::de::Error> {
        let config: Config = toml::from_str(toml_str)?;
        if let Err(e) = config.validate() {
            return Err(toml::de::Error::custom(e));
        }
        Ok(config)
    }

    /// Save configuration as TOML string (requires toml feature)
    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Load from a file, choosing the format by extension (`.json`, or `.toml` with the
    /// toml feature).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(Self::from_json(&contents)?),
            #[cfg(feature = "toml")]
            Some("toml") => {
                Self::from_toml(&contents).map_err(|e| PlannerError::Config(e.to_string()))
            }
            other => Err(PlannerError::Config(format!(
                "unsupported config file extension: {:?}",
                other
            ))),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_range_type: Self::default_range_type(),
            range_settings: QueryRangeSettingsMap::default(),
            backend_timeout_ms: Self::default_backend_timeout_ms(),
            max_concurrent_fields: Self::default_max_concurrent_fields(),
            aggregation_mode: AggregationMode::default(),
            fields_by_type: FieldsByType::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldType;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backend_timeout(), Duration::from_secs(5));
        assert_eq!(config.settings_for(RangeType::Z2), RangeSettings::default());
    }

    #[test]
    fn test_rejects_unknown_range_type_key() {
        let json = r#"{"range_settings": {"bogus": {"maxEnvelopes": 4, "maxExpansion": 2.0}}}"#;
        let err = Config::from_json(json).unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_rejects_invalid_settings() {
        let json = r#"{"range_settings": {"z2": {"maxEnvelopes": 4, "maxExpansion": 0.5}}}"#;
        let err = Config::from_json(json).unwrap_err();
        assert!(err.to_string().contains("maxExpansion"));
    }

    #[test]
    fn test_with_range_settings_replaces_entry() {
        let config = Config::default()
            .with_range_settings(RangeType::Z2, RangeSettings::new(4, 2.0))
            .with_range_settings(RangeType::Z2, RangeSettings::new(8, 2.0));
        assert_eq!(config.range_settings.len(), 1);
        assert_eq!(config.settings_for(RangeType::Z2).max_envelopes, 8);
    }

    #[test]
    fn test_json_round_trip() {
        let config = Config::default()
            .with_backend_timeout(Duration::from_millis(750))
            .with_aggregation_mode(AggregationMode::RawTiers);
        let json = config.to_json().unwrap();
        let back = Config::from_json(&json).unwrap();
        assert_eq!(back.backend_timeout_ms, 750);
        assert_eq!(back.aggregation_mode, AggregationMode::RawTiers);
    }

    #[test]
    fn test_fields_by_type_from_json() {
        let json = r#"{"fields_by_type": {"geo": ["geom"], "geowave": ["track", "area"]}}"#;
        let config = Config::from_json(json).unwrap();
        assert_eq!(config.fields_by_type.type_of("area"), Some(FieldType::GeoWave));

        let json = r#"{"fields_by_type": {"geo": ["geom"], "geowave": ["geom"]}}"#;
        let err = Config::from_json(json).unwrap_err();
        assert!(err.to_string().contains("geom"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"default_range_type": "z3", "max_concurrent_fields": 2}}"#).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.default_range_type, RangeType::Z3);
        assert_eq!(config.max_concurrent_fields, 2);

        let other = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            Config::load(other.path()),
            Err(PlannerError::Config(_))
        ));
    }
}
