//! The planner service: form to features, and multi-field feature queries.

use crate::aggregate::{AggregationMode, Degradation, FunctionRequest, QueryStatus, TierResult, aggregate};
use crate::backend::GeoBackend;
use crate::compute::validation::{ManualGeometryForm, ValidatedQuery, validate};
use crate::config::Config;
use crate::error::{PlannerError, Result};
use crate::fields::{FieldType, FieldsByType};
use crate::planner::{RangePlan, RangePlanner};
use futures::stream::{self, StreamExt};
use geoplan_types::{CurveRange, Geo, GeoByField, GeoFeatures, GeoTerms};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Field under which a form's own geometry is echoed back.
pub const GEOMETRY_FIELD: &str = "geometry";

/// A feature query over already planned ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureQuery {
    pub fields: Vec<String>,
    pub ranges: Vec<CurveRange>,
    #[serde(default)]
    pub functions: Vec<FunctionRequest>,
    /// Overrides the configured aggregation mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<AggregationMode>,
    /// Restrict fields to these types; with no `fields`, query every field of them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub field_types: Vec<FieldType>,
}

impl FeatureQuery {
    pub fn new<I, S>(fields: I, ranges: Vec<CurveRange>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            ranges,
            functions: Vec::new(),
            mode: None,
            field_types: Vec::new(),
        }
    }

    /// Query every registered field of `field_types`.
    pub fn by_field_types<I>(field_types: I, ranges: Vec<CurveRange>) -> Self
    where
        I: IntoIterator<Item = FieldType>,
    {
        Self {
            field_types: field_types.into_iter().collect(),
            ..Self::new(Vec::<String>::new(), ranges)
        }
    }

    pub fn with_field_types<I>(mut self, field_types: I) -> Self
    where
        I: IntoIterator<Item = FieldType>,
    {
        self.field_types = field_types.into_iter().collect();
        self
    }

    pub fn with_function(mut self, function: FunctionRequest) -> Self {
        self.functions.push(function);
        self
    }

    pub fn with_mode(mut self, mode: AggregationMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Fields to fetch and fields refused by `registry`.
    ///
    /// The requested fields plus those named by functions, or every registered field
    /// of `field_types` when none are requested. An empty registry accepts any field
    /// unless field types are requested.
    fn fetch_fields<'a>(&'a self, registry: &'a FieldsByType) -> (BTreeSet<&'a str>, Vec<&'a str>) {
        let mut requested: BTreeSet<&str> = self
            .fields
            .iter()
            .chain(self.functions.iter().flat_map(|f| f.fields.iter()))
            .map(String::as_str)
            .collect();
        if self.fields.is_empty() {
            for field_type in &self.field_types {
                requested.extend(registry.fields(*field_type));
            }
        }

        if registry.is_empty() && self.field_types.is_empty() {
            return (requested, Vec::new());
        }
        let (accepted, refused): (BTreeSet<&str>, BTreeSet<&str>) = requested
            .into_iter()
            .partition(|field| registry.accepts(field, &self.field_types));
        (accepted, refused.into_iter().collect())
    }
}

/// Features returned for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoFeaturesResponse {
    pub query_id: Uuid,
    pub features: GeoFeatures,
    #[serde(flatten)]
    pub status: QueryStatus,
}

/// Plans ranges for query forms and aggregates backend results.
///
/// The configuration can be swapped while queries run; every query works on the
/// snapshot taken when it started.
#[derive(Debug)]
pub struct GeoPlanner<B: GeoBackend> {
    config: RwLock<Config>,
    backend: B,
}

impl<B: GeoBackend> GeoPlanner<B> {
    pub fn new(config: Config, backend: B) -> Result<Self> {
        config.validate().map_err(PlannerError::Config)?;
        Ok(Self {
            config: RwLock::new(config),
            backend,
        })
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> Config {
        self.config.read().clone()
    }

    /// Replace the configuration. The old one stays in place when `config` is invalid.
    pub fn reload(&self, config: Config) -> Result<()> {
        config.validate().map_err(PlannerError::Config)?;
        *self.config.write() = config;
        log::debug!("Planner configuration reloaded");
        Ok(())
    }

    pub fn reload_from_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.reload(Config::load(path)?)
    }

    /// Registered geometry fields by type.
    pub fn fields_by_type(&self) -> FieldsByType {
        self.config.read().fields_by_type.clone()
    }

    /// Replace only the field registry.
    pub fn reload_fields_by_type(&self, fields: FieldsByType) -> Result<()> {
        let config = self.config().with_fields_by_type(fields);
        self.reload(config)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Validate `form`, filling in the configured default range type when ranges are
    /// requested without one.
    fn prepare(&self, form: &ManualGeometryForm, config: &Config) -> Result<ValidatedQuery> {
        if form.create_ranges && form.range_type.trim().is_empty() {
            let mut form = form.clone();
            form.range_type = config.default_range_type.name().to_string();
            return Ok(validate(&form)?);
        }
        Ok(validate(form)?)
    }

    fn plan_validated(
        &self,
        validated: &ValidatedQuery,
        config: &Config,
        cancel: &CancellationToken,
    ) -> Result<Option<RangePlan>> {
        let Some(range_type) = validated.range_type else {
            return Ok(None);
        };
        let settings = validated
            .settings()
            .cloned()
            .unwrap_or_else(|| config.settings_for(range_type));
        let plan = RangePlanner::with_cancellation(cancel.clone()).plan(
            &validated.query,
            range_type,
            &settings,
        )?;
        Ok(Some(plan))
    }

    /// Plan ranges for `form`. Forms that do not ask for ranges are rejected.
    pub fn plan_form(
        &self,
        form: &ManualGeometryForm,
        cancel: &CancellationToken,
    ) -> Result<RangePlan> {
        let config = self.config();
        let validated = self.prepare(form, &config)?;
        self.plan_validated(&validated, &config, cancel)?
            .ok_or_else(|| PlannerError::InvalidInput("form does not request ranges".to_string()))
    }

    /// Echo the form's geometry and, when requested, the footprints of its planned
    /// ranges keyed by range type name.
    pub fn geo_features_from_geometry(
        &self,
        form: &ManualGeometryForm,
        cancel: &CancellationToken,
    ) -> Result<GeoFeaturesResponse> {
        let query_id = Uuid::new_v4();
        let config = self.config();
        let validated = self.prepare(form, &config)?;

        let mut by_field = GeoByField::new();
        let geo = Geo::from_geometry(&validated.query.geometry.to_geo());
        insert_field(&mut by_field, GEOMETRY_FIELD, GeoTerms::Geo { geo })?;

        if let Some(plan) = self.plan_validated(&validated, &config, cancel)? {
            log::debug!(
                "Query {}: {} range(s) on {}, scan cost {}",
                query_id,
                plan.len(),
                plan.range_type(),
                plan.scan_cost()
            );
            insert_field(
                &mut by_field,
                plan.range_type().name(),
                GeoTerms::GeoByTier {
                    geo_by_tier: plan.to_geo_by_tier(),
                },
            )?;
        }

        Ok(GeoFeaturesResponse {
            query_id,
            features: GeoFeatures::new(by_field, Vec::new()),
            status: QueryStatus::Complete,
        })
    }

    /// Fetch every field concurrently and aggregate the results.
    ///
    /// Fields that fail or time out are reported as degradations; the rest are still
    /// aggregated. Cancellation aborts the whole query.
    pub async fn query_features(
        &self,
        query: &FeatureQuery,
        cancel: &CancellationToken,
    ) -> Result<GeoFeaturesResponse> {
        let query_id = Uuid::new_v4();
        let config = self.config();
        let timeout = config.backend_timeout();
        let (fields, refused) = query.fetch_fields(&config.fields_by_type);
        log::debug!(
            "Query {}: fetching {} field(s) over {} range(s)",
            query_id,
            fields.len(),
            query.ranges.len()
        );

        if cancel.is_cancelled() {
            return Err(PlannerError::Cancelled);
        }

        let mut outcomes: Vec<(&str, Result<Vec<TierResult>>)> = stream::iter(fields)
            .map(|field| async move {
                if cancel.is_cancelled() {
                    return (field, Err(PlannerError::Cancelled));
                }
                let fetch = self.backend.fetch_tiers(field, &query.ranges);
                let outcome = match tokio::time::timeout(timeout, fetch).await {
                    Ok(result) => result,
                    Err(_) => Err(PlannerError::BackendTimeout {
                        field: field.to_string(),
                        timeout,
                    }),
                };
                (field, outcome)
            })
            .buffer_unordered(config.max_concurrent_fields)
            .collect()
            .await;

        if cancel.is_cancelled() {
            log::debug!("Query {} cancelled", query_id);
            return Err(PlannerError::Cancelled);
        }
        outcomes.sort_by(|a, b| a.0.cmp(b.0));

        let mut results = BTreeMap::new();
        let mut degradations: Vec<Degradation> = refused
            .into_iter()
            .map(|field| {
                log::warn!("Query {}: field `{}` is not registered", query_id, field);
                Degradation::UnknownField {
                    field: field.to_string(),
                }
            })
            .collect();
        for (field, outcome) in outcomes {
            match outcome {
                Ok(tiers) => {
                    results.insert(field.to_string(), tiers);
                }
                Err(e) => {
                    log::warn!("Query {}: {}", query_id, e);
                    degradations.push(Degradation::from_backend_error(field, &e));
                }
            }
        }

        let mode = query.mode.unwrap_or(config.aggregation_mode);
        let aggregation = aggregate(&results, mode, &query.functions);
        degradations.extend(aggregation.degradations);

        Ok(GeoFeaturesResponse {
            query_id,
            features: aggregation.features,
            status: QueryStatus::from_degradations(degradations),
        })
    }
}

fn insert_field(by_field: &mut GeoByField, field: &str, terms: GeoTerms) -> Result<()> {
    by_field
        .try_insert(field, terms)
        .map_err(|e| PlannerError::InvalidInput(e.to_string()))
}
