//! Shard-side query execution
//!
//! Runs an aggregation over the series one shard holds and packages the
//! outcome as `ShardedResultGroup`s for the coordinator.

use crate::config::ClusterQueryConfig;
use crate::error::{ClusterError, Result};
use rayon::prelude::*;
use rusts_aggregation::{
    AggregationInstance, AggregationSession, AggregationState, AggregationTraversal,
    SeriesValues, ShardedResultGroup,
};
use rusts_core::{
    GroupKey, MetricCollection, Point, Series, ShardTags, Statistics, TimeRange,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Statistics counter holding the number of series a shard read
pub const SERIES: &str = "series";

/// The metrics one shard read for one series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesData {
    pub series: Series,
    pub metrics: Vec<MetricCollection>,
}

impl SeriesData {
    pub fn new(series: Series) -> Self {
        Self {
            series,
            metrics: Vec::new(),
        }
    }

    pub fn with(mut self, metrics: MetricCollection) -> Self {
        self.metrics.push(metrics);
        self
    }

    pub fn with_points(self, points: Vec<Point>) -> Self {
        self.with(MetricCollection::Points(points))
    }
}

/// Everything a shard answers with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardResultPart {
    pub shard: ShardTags,
    pub groups: Vec<ShardedResultGroup>,
    pub statistics: Statistics,
}

/// Executes aggregations over the data of a shard
pub struct ShardQuery {
    config: ClusterQueryConfig,
    pool: rayon::ThreadPool,
}

impl ShardQuery {
    pub fn new(config: ClusterQueryConfig) -> Result<Self> {
        config.validate()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.effective_thread_pool_size())
            .thread_name(|i| format!("rusts-shard-{}", i))
            .build()
            .map_err(|e| ClusterError::ThreadPool(e.to_string()))?;

        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &ClusterQueryConfig {
        &self.config
    }

    /// Aggregate `data` with `instance`.
    ///
    /// Parts meant for `ClusterQuery::combine` must be produced with its
    /// `distributed` instance.
    ///
    /// Every series is fed under a group key made of its tags. Series
    /// sharing tags share the key.
    pub fn execute(
        &self,
        shard: &ShardTags,
        instance: &AggregationInstance,
        range: &TimeRange,
        data: Vec<SeriesData>,
    ) -> Result<ShardResultPart> {
        let mut keyed: BTreeMap<GroupKey, BTreeSet<Series>> = BTreeMap::new();
        for d in &data {
            d.series.validate()?;
            keyed
                .entry(d.series.tags.clone())
                .or_default()
                .insert(d.series.clone());
        }

        let series_count = data.len();
        let states = keyed
            .into_iter()
            .map(|(key, series)| AggregationState::new(key, series))
            .collect();

        let AggregationTraversal { states, session } = instance.session(states, range)?;

        if self.config.should_parallelize(series_count) {
            let session = session.as_ref();
            self.pool
                .install(|| data.into_par_iter().try_for_each(|d| feed(session, d)))?;
        } else {
            data.into_iter().try_for_each(|d| feed(session.as_ref(), d))?;
        }

        let result = session.result()?;

        let values: BTreeMap<GroupKey, SeriesValues> = states
            .iter()
            .map(|s| (s.key.clone(), SeriesValues::from_series(&s.series)))
            .collect();

        let cadence = instance.cadence();
        let groups: Vec<ShardedResultGroup> = result
            .result
            .into_iter()
            .map(|d| {
                let series = values.get(&d.key).cloned().unwrap_or_default();
                ShardedResultGroup::new(shard.clone(), d.key, series, d.metrics, cadence)
            })
            .collect();

        debug!(
            "Shard {:?} aggregated {} series into {} groups",
            shard,
            series_count,
            groups.len()
        );

        let statistics = result
            .statistics
            .merge(&Statistics::of(SERIES, series_count as u64));

        Ok(ShardResultPart {
            shard: shard.clone(),
            groups,
            statistics,
        })
    }
}

fn feed(session: &dyn AggregationSession, data: SeriesData) -> Result<()> {
    for metrics in data.metrics {
        session.update(&data.series.tags, metrics.into_sorted())?;
    }
    Ok(())
}
