//! Metric variants and homogeneous metric collections

use crate::types::{FieldValue, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The kind of metric held by a `MetricCollection`.
///
/// The declaration order is the tie-break used when results for the same
/// group are emitted for several types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetricType {
    Group,
    Point,
    Event,
    Spread,
}

impl MetricType {
    /// Identifier used on the wire and in logs
    pub fn identifier(&self) -> &'static str {
        match self {
            MetricType::Group => "group",
            MetricType::Point => "points",
            MetricType::Event => "events",
            MetricType::Spread => "spreads",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

/// Common behaviour of every metric variant.
///
/// Metrics are ordered by timestamp only; the order of metrics sharing a
/// timestamp is left to whoever produced them.
pub trait Metric: Clone + Send + Sync + 'static {
    /// Timestamp of this metric
    fn timestamp(&self) -> Timestamp;

    /// Wrap a sorted batch of this variant into a collection
    fn collection(values: Vec<Self>) -> MetricCollection;
}

/// A single numeric sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub timestamp: Timestamp,
    pub value: f64,
}

impl Point {
    pub fn new(timestamp: Timestamp, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// A timestamped payload without a numeric value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: Timestamp,
    pub payload: BTreeMap<String, FieldValue>,
}

impl Event {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            payload: BTreeMap::new(),
        }
    }

    /// Add a payload entry
    pub fn with(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

/// Summary of many samples at one timestamp
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Spread {
    pub timestamp: Timestamp,
    pub count: u64,
    pub sum: f64,
    /// Sum of squares
    pub sum2: f64,
    pub min: f64,
    pub max: f64,
}

impl Spread {
    pub fn new(timestamp: Timestamp, count: u64, sum: f64, sum2: f64, min: f64, max: f64) -> Self {
        Self {
            timestamp,
            count,
            sum,
            sum2,
            min,
            max,
        }
    }
}

/// Nested collections sharing one timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricGroup {
    pub timestamp: Timestamp,
    pub groups: Vec<MetricCollection>,
}

impl MetricGroup {
    pub fn new(timestamp: Timestamp, groups: Vec<MetricCollection>) -> Self {
        Self { timestamp, groups }
    }
}

impl Metric for Point {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn collection(values: Vec<Self>) -> MetricCollection {
        MetricCollection::Points(values)
    }
}

impl Metric for Event {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn collection(values: Vec<Self>) -> MetricCollection {
        MetricCollection::Events(values)
    }
}

impl Metric for Spread {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn collection(values: Vec<Self>) -> MetricCollection {
        MetricCollection::Spreads(values)
    }
}

impl Metric for MetricGroup {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn collection(values: Vec<Self>) -> MetricCollection {
        MetricCollection::Groups(values)
    }
}

/// A homogeneous sequence of one metric variant, ordered by timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum MetricCollection {
    Groups(Vec<MetricGroup>),
    Points(Vec<Point>),
    Events(Vec<Event>),
    Spreads(Vec<Spread>),
}

impl MetricCollection {
    /// Type of the contained metrics
    pub fn metric_type(&self) -> MetricType {
        match self {
            MetricCollection::Groups(_) => MetricType::Group,
            MetricCollection::Points(_) => MetricType::Point,
            MetricCollection::Events(_) => MetricType::Event,
            MetricCollection::Spreads(_) => MetricType::Spread,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            MetricCollection::Groups(v) => v.len(),
            MetricCollection::Points(v) => v.len(),
            MetricCollection::Events(v) => v.len(),
            MetricCollection::Spreads(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Timestamps of the contained metrics, in order
    pub fn timestamps(&self) -> Vec<Timestamp> {
        match self {
            MetricCollection::Groups(v) => v.iter().map(Metric::timestamp).collect(),
            MetricCollection::Points(v) => v.iter().map(Metric::timestamp).collect(),
            MetricCollection::Events(v) => v.iter().map(Metric::timestamp).collect(),
            MetricCollection::Spreads(v) => v.iter().map(Metric::timestamp).collect(),
        }
    }

    /// Check that the collection is ordered by timestamp
    pub fn is_sorted(&self) -> bool {
        self.timestamps().windows(2).all(|w| w[0] <= w[1])
    }

    /// Sort the collection by timestamp, keeping the order of equal timestamps
    pub fn into_sorted(self) -> Self {
        fn sort<T: Metric>(mut values: Vec<T>) -> Vec<T> {
            values.sort_by_key(Metric::timestamp);
            values
        }

        if self.is_sorted() {
            return self;
        }

        match self {
            MetricCollection::Groups(v) => MetricCollection::Groups(sort(v)),
            MetricCollection::Points(v) => MetricCollection::Points(sort(v)),
            MetricCollection::Events(v) => MetricCollection::Events(sort(v)),
            MetricCollection::Spreads(v) => MetricCollection::Spreads(sort(v)),
        }
    }

    /// Borrow the points, if this is a point collection
    pub fn as_points(&self) -> Option<&[Point]> {
        match self {
            MetricCollection::Points(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow the spreads, if this is a spread collection
    pub fn as_spreads(&self) -> Option<&[Spread]> {
        match self {
            MetricCollection::Spreads(v) => Some(v),
            _ => None,
        }
    }
}
