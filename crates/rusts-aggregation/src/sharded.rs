//! Partial results exchanged between shards and the query coordinator

use rusts_core::{GroupKey, MetricCollection, Series, ShardTags};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Union of the series contributing to one group
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesValues {
    /// Distinct measurement names
    pub keys: BTreeSet<String>,
    /// Every value seen for each tag key
    pub tags: BTreeMap<String, BTreeSet<String>>,
}

impl SeriesValues {
    pub fn builder() -> SeriesValuesBuilder {
        SeriesValuesBuilder::default()
    }

    /// Summarize a set of series
    pub fn from_series<'a>(series: impl IntoIterator<Item = &'a Series>) -> Self {
        let mut builder = Self::builder();
        for s in series {
            builder.add_series(s);
        }
        builder.build()
    }
}

/// Accumulates `SeriesValues`
#[derive(Debug, Default)]
pub struct SeriesValuesBuilder {
    values: SeriesValues,
}

impl SeriesValuesBuilder {
    pub fn add_series(&mut self, series: &Series) -> &mut Self {
        self.values.keys.insert(series.measurement.clone());
        for (key, value) in &series.tags {
            self.values
                .tags
                .entry(key.clone())
                .or_default()
                .insert(value.clone());
        }
        self
    }

    pub fn add_series_values(&mut self, other: &SeriesValues) -> &mut Self {
        self.values.keys.extend(other.keys.iter().cloned());
        for (key, values) in &other.tags {
            self.values
                .tags
                .entry(key.clone())
                .or_default()
                .extend(values.iter().cloned());
        }
        self
    }

    pub fn build(self) -> SeriesValues {
        self.values
    }
}

/// One group of one shard's result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardedResultGroup {
    /// Shard that produced the group, empty once combined
    pub shard: ShardTags,
    pub key: GroupKey,
    pub series: SeriesValues,
    pub metrics: MetricCollection,
    /// Width of the buckets in `metrics`, 0 if not downsampled
    pub cadence: i64,
}

impl ShardedResultGroup {
    pub fn new(
        shard: ShardTags,
        key: GroupKey,
        series: SeriesValues,
        metrics: MetricCollection,
        cadence: i64,
    ) -> Self {
        Self {
            shard,
            key,
            series,
            metrics,
            cadence,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}
