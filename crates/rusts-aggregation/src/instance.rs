//! Built aggregation trees
//!
//! An `AggregationInstance` is the executable form of an aggregation: it
//! knows how to build per-shard sessions, shard-local reducers and the
//! cluster-level combiner.

use crate::chain::ChainInstance;
use crate::empty::{CollectorReducerSession, CollectorSession};
use crate::error::Result;
use crate::grouping::GroupingInstance;
use crate::sampling::SamplingInstance;
use crate::session::{AggregationState, AggregationTraversal, ReducerSession};
use crate::sharded::{SeriesValues, ShardedResultGroup};
use rusts_core::{GroupKey, ShardTags, TimeRange};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Merges the partial results of every shard into the final result.
///
/// Implementations must not depend on the order of the outer vector.
/// Shards are told apart by their tags, which are expected to be unique.
pub trait AggregationCombiner {
    fn combine(&self, all: Vec<Vec<ShardedResultGroup>>) -> Result<Vec<ShardedResultGroup>>;
}

/// Combiner for the identity operator, which does not merge across shards.
///
/// Groups are passed through as produced, ordered by key, metric type and
/// shard.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCombiner;

impl AggregationCombiner for DefaultCombiner {
    fn combine(&self, all: Vec<Vec<ShardedResultGroup>>) -> Result<Vec<ShardedResultGroup>> {
        let mut groups: Vec<ShardedResultGroup> = all.into_iter().flatten().collect();
        groups.sort_by(|a, b| {
            a.key
                .cmp(&b.key)
                .then(a.metrics.metric_type().cmp(&b.metrics.metric_type()))
                .then(a.shard.cmp(&b.shard))
        });
        Ok(groups)
    }
}

/// Merges the groups of every shard by key, using the reducer of an
/// instance.
pub struct ReducerCombiner<'a> {
    instance: &'a AggregationInstance,
    range: TimeRange,
}

impl<'a> ReducerCombiner<'a> {
    pub fn new(instance: &'a AggregationInstance, range: &TimeRange) -> Self {
        Self {
            instance,
            range: *range,
        }
    }
}

/// Order in which a reducer sees the contributions to one key
fn contribution_order(a: &ShardedResultGroup, b: &ShardedResultGroup) -> Ordering {
    a.shard
        .cmp(&b.shard)
        .then(a.metrics.metric_type().cmp(&b.metrics.metric_type()))
        .then_with(|| a.series.cmp(&b.series))
        .then_with(|| a.metrics.timestamps().cmp(&b.metrics.timestamps()))
}

impl AggregationCombiner for ReducerCombiner<'_> {
    fn combine(&self, all: Vec<Vec<ShardedResultGroup>>) -> Result<Vec<ShardedResultGroup>> {
        let mut contributions: BTreeMap<GroupKey, Vec<ShardedResultGroup>> = BTreeMap::new();
        for group in all.into_iter().flatten() {
            contributions.entry(group.key.clone()).or_default().push(group);
        }

        let keys = contributions.len();
        let cadence = self.instance.cadence();
        let mut output = Vec::new();

        for (key, mut groups) in contributions {
            // Reducers see contributions in the same order whatever order
            // the shards answered in.
            groups.sort_by(contribution_order);

            let reducer = self.instance.reducer(&self.range)?;
            let mut series = SeriesValues::builder();

            for group in groups {
                series.add_series_values(&group.series);
                reducer.update(&key, group.metrics);
            }

            let series = series.build();
            for metrics in reducer.result().result {
                output.push(ShardedResultGroup::new(
                    ShardTags::new(),
                    key.clone(),
                    series.clone(),
                    metrics,
                    cadence,
                ));
            }
        }

        debug!("Combined {} keys into {} groups", keys, output.len());
        Ok(output)
    }
}

/// An executable aggregation tree
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationInstance {
    /// Identity: keeps every group and metric as is
    Empty,
    /// Downsamples into fixed-width buckets
    Sampling(SamplingInstance),
    /// Group or collapse series by tags, aggregating each group
    Grouping(GroupingInstance),
    /// Pipes the output of each stage into the next
    Chain(ChainInstance),
}

impl AggregationInstance {
    /// Approximate number of output points per group over `range`
    pub fn estimate(&self, range: &TimeRange) -> i64 {
        match self {
            AggregationInstance::Empty => 0,
            AggregationInstance::Sampling(s) => s.estimate(range),
            AggregationInstance::Grouping(g) => g.each().estimate(range),
            AggregationInstance::Chain(c) => c.last().estimate(range),
        }
    }

    /// Width of the output buckets, 0 when not downsampling
    pub fn cadence(&self) -> i64 {
        match self {
            AggregationInstance::Empty => 0,
            AggregationInstance::Sampling(s) => s.size(),
            AggregationInstance::Grouping(g) => g.each().cadence(),
            AggregationInstance::Chain(c) => c.last().cadence(),
        }
    }

    /// Tags that must be present on the input series
    pub fn required_tags(&self) -> BTreeSet<String> {
        match self {
            AggregationInstance::Grouping(g) => g.required_tags(),
            AggregationInstance::Chain(c) => c.required_tags(),
            _ => BTreeSet::new(),
        }
    }

    /// The form of this aggregation that shards run.
    ///
    /// Averages and deviations are emitted as spreads, which `reducer`
    /// merges by sample count.
    pub fn distributed(&self) -> AggregationInstance {
        match self {
            AggregationInstance::Empty => AggregationInstance::Empty,
            AggregationInstance::Sampling(s) => AggregationInstance::Sampling(s.distributed()),
            AggregationInstance::Grouping(g) => AggregationInstance::Grouping(g.distributed()),
            AggregationInstance::Chain(c) => AggregationInstance::Chain(c.distributed()),
        }
    }

    /// Build a session over `states`, returning the states it outputs
    pub fn session(
        &self,
        states: Vec<AggregationState>,
        range: &TimeRange,
    ) -> Result<AggregationTraversal> {
        match self {
            AggregationInstance::Empty => {
                let session = CollectorSession::new(&states);
                Ok(AggregationTraversal::new(states, Box::new(session)))
            }
            AggregationInstance::Sampling(s) => s.session(states, range),
            AggregationInstance::Grouping(g) => g.session(states, range),
            AggregationInstance::Chain(c) => c.session(states, range),
        }
    }

    /// Build a session merging partial results of the distributed form of
    /// this aggregation
    pub fn reducer(&self, range: &TimeRange) -> Result<Box<dyn ReducerSession>> {
        match self {
            AggregationInstance::Empty => Ok(Box::new(CollectorReducerSession::new())),
            AggregationInstance::Sampling(s) => s.reducer(range),
            AggregationInstance::Grouping(g) => g.each().reducer(range),
            AggregationInstance::Chain(c) => c.last().reducer(range),
        }
    }

    /// Build the combiner for shard results of the distributed form of this
    /// aggregation
    pub fn combiner(&self, range: &TimeRange) -> Box<dyn AggregationCombiner + '_> {
        match self {
            AggregationInstance::Empty => Box::new(DefaultCombiner),
            AggregationInstance::Sampling(_) => Box::new(ReducerCombiner::new(self, range)),
            AggregationInstance::Grouping(g) => Box::new(ReducerCombiner::new(g.each(), range)),
            AggregationInstance::Chain(c) => c.last().combiner(range),
        }
    }
}
