//! Sequential composition of aggregations

use crate::error::Result;
use crate::instance::AggregationInstance;
use crate::session::{AggregationResult, AggregationSession, AggregationState, AggregationTraversal};
use rusts_core::{GroupKey, MetricCollection, TimeRange};
use std::collections::BTreeSet;

static IDENTITY: AggregationInstance = AggregationInstance::Empty;

/// A chain of aggregations, each stage consuming the output of the previous
/// one. An empty chain behaves as the identity aggregation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChainInstance {
    chain: Vec<AggregationInstance>,
}

impl ChainInstance {
    pub fn new(chain: Vec<AggregationInstance>) -> Self {
        Self { chain }
    }

    pub fn stages(&self) -> &[AggregationInstance] {
        &self.chain
    }

    /// The stage whose output is visible outside the chain
    pub fn last(&self) -> &AggregationInstance {
        self.chain.last().unwrap_or(&IDENTITY)
    }

    /// Tags required by the first stage
    pub fn required_tags(&self) -> BTreeSet<String> {
        self.chain
            .first()
            .map(AggregationInstance::required_tags)
            .unwrap_or_default()
    }

    /// Only the last stage's output leaves the shard, so only the last stage
    /// changes.
    pub fn distributed(&self) -> ChainInstance {
        let mut chain = self.chain.clone();
        if let Some(last) = chain.last_mut() {
            *last = last.distributed();
        }
        ChainInstance { chain }
    }

    /// Build every stage, feeding the states output by one stage into the
    /// next.
    pub fn session(
        &self,
        states: Vec<AggregationState>,
        range: &TimeRange,
    ) -> Result<AggregationTraversal> {
        if self.chain.is_empty() {
            return IDENTITY.session(states, range);
        }

        let mut states = states;
        let mut sessions = Vec::with_capacity(self.chain.len());

        for stage in &self.chain {
            let traversal = stage.session(states, range)?;
            states = traversal.states;
            sessions.push(traversal.session);
        }

        Ok(AggregationTraversal::new(states, Box::new(ChainSession { sessions })))
    }
}

/// Updates go to the first stage. Finalizing a stage feeds its output into
/// the next one.
struct ChainSession {
    sessions: Vec<Box<dyn AggregationSession>>,
}

impl AggregationSession for ChainSession {
    fn update(&self, key: &GroupKey, values: MetricCollection) -> Result<()> {
        match self.sessions.first() {
            Some(first) => first.update(key, values),
            None => Ok(()),
        }
    }

    fn result(self: Box<Self>) -> Result<AggregationResult> {
        let mut sessions = self.sessions.into_iter();

        let Some(first) = sessions.next() else {
            return Ok(AggregationResult::default());
        };

        let mut current = first.result()?;

        for session in sessions {
            for data in current.result {
                session.update(&data.key, data.metrics)?;
            }

            let next = session.result()?;
            current = AggregationResult::new(
                next.result,
                current.statistics.merge(&next.statistics),
            );
        }

        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::BucketKind;
    use crate::grouping::{GroupingInstance, GroupingKind};
    use crate::sampling::{SamplingInstance, SAMPLED};
    use rusts_core::{Point, Series};

    fn states() -> Vec<AggregationState> {
        [("a", "eu"), ("b", "eu"), ("c", "us")]
            .iter()
            .map(|(host, region)| {
                AggregationState::for_series(Series::of(
                    "cpu",
                    &[("host", *host), ("region", *region)],
                ))
            })
            .collect()
    }

    fn sampling(kind: BucketKind, size: i64) -> AggregationInstance {
        AggregationInstance::Sampling(SamplingInstance::new(kind, size, size, 0, 1_000).unwrap())
    }

    fn group(keys: &[&str], each: AggregationInstance) -> AggregationInstance {
        AggregationInstance::Grouping(GroupingInstance::new(
            GroupingKind::Group,
            Some(keys.iter().map(|k| k.to_string()).collect()),
            each,
        ))
    }

    #[test]
    fn test_empty_chain_is_identity() {
        let range = TimeRange::new(0, 10_000);
        let states = states();
        let chain = AggregationInstance::Chain(ChainInstance::default());

        let feed = |traversal: &AggregationTraversal| {
            traversal
                .session
                .update_points(&states[0].key, vec![Point::new(2, 2.0)])
                .unwrap();
            traversal
                .session
                .update_points(&states[0].key, vec![Point::new(1, 1.0)])
                .unwrap();
            traversal
                .session
                .update_points(&states[2].key, vec![Point::new(3, 3.0)])
                .unwrap();
        };

        let chained = chain.session(states.clone(), &range).unwrap();
        let identity = AggregationInstance::Empty.session(states.clone(), &range).unwrap();
        feed(&chained);
        feed(&identity);

        assert_eq!(chained.states, identity.states);
        assert_eq!(chained.states, states);
        assert_eq!(
            chained.session.result().unwrap(),
            identity.session.result().unwrap()
        );
        assert_eq!(chain.estimate(&range), 0);
        assert_eq!(chain.cadence(), 0);
    }

    #[test]
    fn test_distributed_changes_last_stage() {
        let chain = ChainInstance::new(vec![
            sampling(BucketKind::Average, 1_000),
            sampling(BucketKind::StdDev, 2_000),
        ]);

        let distributed = chain.distributed();
        assert_eq!(distributed.stages()[0], chain.stages()[0]);
        assert_eq!(distributed.stages()[1], sampling(BucketKind::Spread, 2_000));
        assert_eq!(ChainInstance::default().distributed(), ChainInstance::default());
    }

    #[test]
    fn test_stages_are_piped() {
        let range = TimeRange::new(0, 4_000);
        let states = states();

        // Per-region sums at 1s, then the max across those sums at 2s.
        let chain = ChainInstance::new(vec![
            group(&["region"], sampling(BucketKind::Sum, 1_000)),
            sampling(BucketKind::Max, 2_000),
        ]);
        let instance = AggregationInstance::Chain(chain);
        assert_eq!(instance.cadence(), 2_000);
        assert_eq!(instance.estimate(&range), 2);
        assert_eq!(
            instance.required_tags(),
            BTreeSet::from(["region".to_string()])
        );

        let traversal = instance.session(states.clone(), &range).unwrap();
        assert_eq!(traversal.states.len(), 1);
        assert_eq!(traversal.states[0].series.len(), 3);

        traversal
            .session
            .update_points(&states[0].key, vec![Point::new(0, 1.0), Point::new(1_000, 1.0)])
            .unwrap();
        traversal
            .session
            .update_points(&states[1].key, vec![Point::new(500, 2.0)])
            .unwrap();
        traversal
            .session
            .update_points(&states[2].key, vec![Point::new(2_500, 7.0)])
            .unwrap();

        let result = traversal.session.result().unwrap();
        assert_eq!(result.result.len(), 1);
        assert!(result.result[0].key.is_empty());
        assert_eq!(
            result.result[0].metrics,
            MetricCollection::Points(vec![Point::new(0, 3.0), Point::new(2_000, 7.0)])
        );
        // 4 raw samples, then 3 per-region sums.
        assert_eq!(result.statistics.get(SAMPLED), 7);
    }
}
