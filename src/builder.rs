//! Planner builder for flexible configuration
//!
//! Starts from defaults or a config file and layers individual overrides on top.

use crate::backend::GeoBackend;
use crate::config::Config;
use crate::error::Result;
use crate::service::GeoPlanner;
use geoplan_types::{RangeSettings, RangeType};
use std::path::PathBuf;
use std::time::Duration;

/// Builder for a [`GeoPlanner`].
#[derive(Debug)]
pub struct PlannerBuilder {
    config: Config,
    config_path: Option<PathBuf>,
    default_range_type: Option<RangeType>,
    range_settings: Vec<(RangeType, RangeSettings)>,
    backend_timeout: Option<Duration>,
    max_concurrent_fields: Option<usize>,
}

impl PlannerBuilder {
    /// Create a new builder with the default configuration.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            config_path: None,
            default_range_type: None,
            range_settings: Vec::new(),
            backend_timeout: None,
            max_concurrent_fields: None,
        }
    }

    /// Set the base configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Load the base configuration from a file when building. Takes precedence over
    /// [`config`](Self::config).
    pub fn config_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn default_range_type(mut self, range_type: RangeType) -> Self {
        self.default_range_type = Some(range_type);
        self
    }

    /// Override the default settings for one range type.
    pub fn range_settings(mut self, range_type: RangeType, settings: RangeSettings) -> Self {
        self.range_settings.push((range_type, settings));
        self
    }

    pub fn backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = Some(timeout);
        self
    }

    pub fn max_concurrent_fields(mut self, limit: usize) -> Self {
        self.max_concurrent_fields = Some(limit);
        self
    }

    /// Build the planner. Fails when the config file cannot be loaded or the
    /// resulting configuration is invalid.
    pub fn build<B: GeoBackend>(self, backend: B) -> Result<GeoPlanner<B>> {
        let mut config = match &self.config_path {
            Some(path) => Config::load(path)?,
            None => self.config,
        };

        if let Some(range_type) = self.default_range_type {
            config = config.with_default_range_type(range_type);
        }
        for (range_type, settings) in self.range_settings {
            config = config.with_range_settings(range_type, settings);
        }
        if let Some(timeout) = self.backend_timeout {
            config = config.with_backend_timeout(timeout);
        }
        if let Some(limit) = self.max_concurrent_fields {
            config.max_concurrent_fields = limit;
        }

        GeoPlanner::new(config, backend)
    }
}

impl Default for PlannerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
