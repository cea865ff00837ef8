use thiserror::Error;

/// A keyed collection received the same key twice.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("duplicate key `{0}`")]
pub struct DuplicateKey(pub String);

/// A range type name that does not match any supported curve family.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported range type `{0}`")]
pub struct UnknownRangeType(pub String);

/// A curve range whose `low` is not below its `high`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("curve range [{low}, {high}) is empty")]
pub struct EmptyRange {
    pub low: u64,
    pub high: u64,
}
