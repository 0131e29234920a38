//! Core data types for RusTs queries

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Millisecond-precision Unix epoch timestamp
pub type Timestamp = i64;

/// Tag mapping identifying an output group after a grouping projection.
///
/// Ordered so that two keys with the same content always compare, hash and
/// serialize identically regardless of how they were built.
pub type GroupKey = BTreeMap<String, String>;

/// Tags identifying the shard a partial result came from
pub type ShardTags = BTreeMap<String, String>;

/// Event payload value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// 64-bit floating point
    Float(f64),
    /// 64-bit signed integer
    Integer(i64),
    /// UTF-8 string
    String(String),
    /// Boolean value
    Boolean(bool),
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

/// Identity of a time series, unique within a shard
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Series {
    /// Measurement name
    pub measurement: String,
    /// Tags that identify this series
    pub tags: BTreeMap<String, String>,
}

impl Series {
    /// Create a new series
    pub fn new(measurement: impl Into<String>, tags: BTreeMap<String, String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags,
        }
    }

    /// Create a series from a slice of tag pairs
    pub fn of(measurement: impl Into<String>, tags: &[(&str, &str)]) -> Self {
        let tags = tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::new(measurement, tags)
    }

    /// Validate the series
    pub fn validate(&self) -> Result<()> {
        if self.measurement.is_empty() {
            return Err(CoreError::EmptyMeasurement);
        }
        if self.tags.keys().any(|k| k.is_empty()) {
            return Err(CoreError::EmptyTagKey);
        }
        Ok(())
    }
}

/// Time range for queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub start: Timestamp,
    /// End timestamp (exclusive)
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a new time range
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Get the duration of this range in milliseconds
    pub fn duration(&self) -> i64 {
        self.end.saturating_sub(self.start)
    }

    /// Widen the range so that both bounds are multiples of `cadence`.
    ///
    /// A cadence of zero leaves the range untouched.
    pub fn rounded(&self, cadence: i64) -> Result<Self> {
        if cadence < 0 {
            return Err(CoreError::InvalidCadence(cadence));
        }
        if cadence == 0 {
            return Ok(*self);
        }

        let start = self.start.div_euclid(cadence).saturating_mul(cadence);
        let end = match self.end.rem_euclid(cadence) {
            0 => self.end,
            rem => self.end.saturating_add(cadence - rem),
        };

        Ok(Self { start, end })
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self {
            start: i64::MIN,
            end: i64::MAX,
        }
    }
}
