//! Aggregation session protocol
//!
//! A session is the mutable, per-query accumulator of one shard. Many ingest
//! workers call the `update_*` methods concurrently; once every worker is
//! done, `result` consumes the session exactly once.

use crate::error::Result;
use rusts_core::{
    Event, GroupKey, MetricCollection, MetricGroup, Point, Series, Spread, Statistics,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A group key together with the series that belong to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationState {
    pub key: GroupKey,
    pub series: BTreeSet<Series>,
}

impl AggregationState {
    pub fn new(key: GroupKey, series: BTreeSet<Series>) -> Self {
        Self { key, series }
    }

    /// A state holding one series, keyed by that series' tags
    pub fn for_series(series: Series) -> Self {
        let key = series.tags.clone();
        let mut set = BTreeSet::new();
        set.insert(series);
        Self { key, series: set }
    }
}

/// The finalized output of one group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationData {
    pub key: GroupKey,
    pub metrics: MetricCollection,
}

impl AggregationData {
    pub fn new(key: GroupKey, metrics: MetricCollection) -> Self {
        Self { key, metrics }
    }
}

/// The output of `AggregationSession::result`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregationResult {
    pub result: Vec<AggregationData>,
    pub statistics: Statistics,
}

impl AggregationResult {
    pub fn new(result: Vec<AggregationData>, statistics: Statistics) -> Self {
        Self { result, statistics }
    }
}

/// The output of `ReducerSession::result`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReducerResult {
    pub result: Vec<MetricCollection>,
    pub statistics: Statistics,
}

impl ReducerResult {
    pub fn new(result: Vec<MetricCollection>, statistics: Statistics) -> Self {
        Self { result, statistics }
    }
}

/// Streaming accumulator for one query on one shard.
///
/// `update` must only be called with keys the session was built with;
/// any other key is reported as `AggregationError::MissingSession`.
/// Values passed to one update are sorted by timestamp.
pub trait AggregationSession: Send + Sync {
    fn update(&self, key: &GroupKey, values: MetricCollection) -> Result<()>;

    fn update_points(&self, key: &GroupKey, values: Vec<Point>) -> Result<()> {
        self.update(key, MetricCollection::Points(values))
    }

    fn update_events(&self, key: &GroupKey, values: Vec<Event>) -> Result<()> {
        self.update(key, MetricCollection::Events(values))
    }

    fn update_spreads(&self, key: &GroupKey, values: Vec<Spread>) -> Result<()> {
        self.update(key, MetricCollection::Spreads(values))
    }

    fn update_groups(&self, key: &GroupKey, values: Vec<MetricGroup>) -> Result<()> {
        self.update(key, MetricCollection::Groups(values))
    }

    /// Finalize the session. Every collection in the result is non-empty
    /// and sorted by timestamp.
    fn result(self: Box<Self>) -> Result<AggregationResult>;
}

/// Shard-local session merging partial results that share a key.
pub trait ReducerSession: Send + Sync {
    fn update(&self, key: &GroupKey, values: MetricCollection);

    fn result(self: Box<Self>) -> ReducerResult;
}

/// The states produced by building a session, and the session itself
pub struct AggregationTraversal {
    pub states: Vec<AggregationState>,
    pub session: Box<dyn AggregationSession>,
}

impl AggregationTraversal {
    pub fn new(states: Vec<AggregationState>, session: Box<dyn AggregationSession>) -> Self {
        Self { states, session }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_for_series() {
        let series = Series::of("cpu", &[("host", "a"), ("role", "db")]);
        let state = AggregationState::for_series(series.clone());

        assert_eq!(state.key, series.tags);
        assert_eq!(state.series.len(), 1);
        assert!(state.series.contains(&series));
    }
}
