//! RusTs Core - Core types for the aggregation engine
//!
//! This crate provides the data model shared by every stage of a query:
//! - `Timestamp` / `TimeRange`: millisecond timestamps and half-open ranges
//! - `Series`: identity of a time series (measurement + tags)
//! - `GroupKey`: the tag mapping that identifies an output group
//! - `Point`, `Event`, `Spread`, `MetricGroup`: the metric variants
//! - `MetricCollection`: a homogeneous, time-ordered batch of one variant
//! - `Statistics`: mergeable query counters

pub mod error;
pub mod metric;
pub mod statistics;
pub mod types;

pub use error::{CoreError, Result};
pub use metric::{Event, Metric, MetricCollection, MetricGroup, MetricType, Point, Spread};
pub use statistics::Statistics;
pub use types::*;
