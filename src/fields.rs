//! Registry of indexed geometry fields grouped by how they are indexed.

use crate::error::PlannerError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// How a field is indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Plain geometry index.
    Geo,
    /// Space-filling-curve index, queried with planned ranges.
    GeoWave,
}

impl FieldType {
    pub const ALL: [FieldType; 2] = [FieldType::Geo, FieldType::GeoWave];

    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Geo => "geo",
            FieldType::GeoWave => "geowave",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FieldType {
    type Err = PlannerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "geo" => Ok(FieldType::Geo),
            "geowave" => Ok(FieldType::GeoWave),
            _ => Err(PlannerError::InvalidInput(format!("unknown field type `{}`", s))),
        }
    }
}

/// Field names per [`FieldType`]. Serializes as `{"geo": [...], "geowave": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldsByType(BTreeMap<FieldType, BTreeSet<String>>);

impl FieldsByType {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fields<I, S>(mut self, field_type: FieldType, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0
            .entry(field_type)
            .or_default()
            .extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn fields(&self, field_type: FieldType) -> impl Iterator<Item = &str> {
        self.0
            .get(&field_type)
            .into_iter()
            .flat_map(|fields| fields.iter().map(String::as_str))
    }

    /// The type `field` is registered under, if any.
    pub fn type_of(&self, field: &str) -> Option<FieldType> {
        self.0
            .iter()
            .find(|(_, fields)| fields.contains(field))
            .map(|(field_type, _)| *field_type)
    }

    /// Whether `field` is registered under one of `types` (any type when empty).
    pub fn accepts(&self, field: &str, types: &[FieldType]) -> bool {
        self.type_of(field)
            .is_some_and(|field_type| types.is_empty() || types.contains(&field_type))
    }

    /// Fields registered under more than one type.
    pub fn conflicts(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        let mut conflicts = BTreeSet::new();
        for field in self.0.values().flatten() {
            if !seen.insert(field.as_str()) {
                conflicts.insert(field.as_str());
            }
        }
        conflicts.into_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeSet::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> FieldsByType {
        FieldsByType::new()
            .with_fields(FieldType::Geo, ["geom", "point"])
            .with_fields(FieldType::GeoWave, ["track"])
    }

    #[test]
    fn test_lookup_by_type() {
        let fields = registry();
        assert_eq!(fields.type_of("track"), Some(FieldType::GeoWave));
        assert_eq!(fields.type_of("other"), None);
        assert_eq!(fields.fields(FieldType::Geo).collect::<Vec<_>>(), vec!["geom", "point"]);

        assert!(fields.accepts("geom", &[]));
        assert!(fields.accepts("geom", &[FieldType::Geo]));
        assert!(!fields.accepts("geom", &[FieldType::GeoWave]));
        assert!(!fields.accepts("other", &[]));
    }

    #[test]
    fn test_json_shape_and_conflicts() {
        let json = serde_json::to_value(registry()).unwrap();
        assert_eq!(json["geo"], serde_json::json!(["geom", "point"]));
        assert_eq!(json["geowave"], serde_json::json!(["track"]));

        let clash = registry().with_fields(FieldType::GeoWave, ["geom"]);
        assert_eq!(clash.conflicts(), vec!["geom"]);
        assert!(FieldsByType::new().is_empty());
    }

    #[test]
    fn test_parse_field_type() {
        assert_eq!("GeoWave".parse::<FieldType>().unwrap(), FieldType::GeoWave);
        assert!("raster".parse::<FieldType>().is_err());
    }
}
