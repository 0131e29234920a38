//! Sampling aggregations
//!
//! Downsamples every input series into fixed-width buckets. Bucket `i` is
//! stamped `start + i * size`, where `start` is the query range rounded down
//! to a multiple of `size`, and takes every sample in
//! `[timestamp, timestamp + extent)`. With `extent > size` a sample lands in
//! several buckets.

use crate::bucket::{Bucket, BucketKind, DoubleBucket, SpreadBucket};
use crate::error::{AggregationError, Result};
use crate::session::{
    AggregationData, AggregationResult, AggregationSession, AggregationState,
    AggregationTraversal, ReducerResult, ReducerSession,
};
use fxhash::FxHashSet;
use rusts_core::{
    Event, GroupKey, MetricCollection, Point, Series, Spread, Statistics, TimeRange, Timestamp,
};
use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics counter holding the number of samples consumed
pub const SAMPLED: &str = "sampled";

/// A built sampling aggregation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplingInstance {
    kind: BucketKind,
    size: i64,
    extent: i64,
    stripes: usize,
    max_buckets: usize,
}

impl SamplingInstance {
    /// `size` must be positive and `extent` at least `size`
    pub fn new(
        kind: BucketKind,
        size: i64,
        extent: i64,
        stripes: usize,
        max_buckets: usize,
    ) -> Result<Self> {
        if size <= 0 {
            return Err(AggregationError::InvalidDefinition(format!(
                "{}: size must be positive, got {}",
                kind.name(),
                size
            )));
        }
        if extent < size {
            return Err(AggregationError::InvalidDefinition(format!(
                "{}: extent {} is smaller than size {}",
                kind.name(),
                extent,
                size
            )));
        }

        Ok(Self {
            kind,
            size,
            extent,
            stripes,
            max_buckets,
        })
    }

    pub fn kind(&self) -> BucketKind {
        self.kind
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn extent(&self) -> i64 {
        self.extent
    }

    pub fn estimate(&self, range: &TimeRange) -> i64 {
        let duration = range.duration().max(0);
        duration / self.size + i64::from(duration % self.size != 0)
    }

    /// Every input state is folded into a single state with the empty key.
    pub fn session(
        &self,
        states: Vec<AggregationState>,
        range: &TimeRange,
    ) -> Result<AggregationTraversal> {
        let buckets = Buckets::new(
            self.kind,
            self.size,
            self.extent,
            range,
            self.stripes,
            self.max_buckets,
        )?;

        let keys: FxHashSet<GroupKey> = states.iter().map(|s| s.key.clone()).collect();
        let series: BTreeSet<Series> = states.into_iter().flat_map(|s| s.series).collect();

        let session = BucketSession {
            keys,
            buckets,
            sampled: AtomicU64::new(0),
        };

        Ok(AggregationTraversal::new(
            vec![AggregationState::new(GroupKey::new(), series)],
            Box::new(session),
        ))
    }

    /// The aggregation shards run so that `reducer` can merge their output.
    ///
    /// Averages and deviations are sampled as spreads; every other kind is
    /// already mergeable.
    pub fn distributed(&self) -> SamplingInstance {
        SamplingInstance {
            kind: self.kind.distributed_kind(),
            ..self.clone()
        }
    }

    /// Re-buckets the output of `distributed` sessions at the same cadence.
    ///
    /// Counts are recombined by summing. Average and deviation buckets merge
    /// the spreads they receive and compute their statistic once.
    pub fn reducer(&self, range: &TimeRange) -> Result<Box<dyn ReducerSession>> {
        let buckets = Buckets::new(
            self.kind.reducer_kind(),
            self.size,
            self.size,
            range,
            self.stripes,
            self.max_buckets,
        )?;
        Ok(Box::new(BucketReducerSession { buckets }))
    }
}

enum BucketSet {
    Double(Vec<Box<dyn DoubleBucket>>),
    Spread(Vec<SpreadBucket>),
}

/// The buckets covering one query range
struct Buckets {
    start: Timestamp,
    size: i64,
    extent: i64,
    set: BucketSet,
}

impl Buckets {
    fn new(
        kind: BucketKind,
        size: i64,
        extent: i64,
        range: &TimeRange,
        stripes: usize,
        max_buckets: usize,
    ) -> Result<Self> {
        let rounded = range.rounded(size)?;
        let count = usize::try_from(rounded.duration() / size)
            .unwrap_or(0)
            .min(max_buckets);

        let set = match kind {
            BucketKind::Spread => BucketSet::Spread((0..count).map(|_| SpreadBucket::new()).collect()),
            kind => BucketSet::Double((0..count).filter_map(|_| kind.double_bucket(stripes)).collect()),
        };

        Ok(Self {
            start: rounded.start,
            size,
            extent,
            set,
        })
    }

    fn len(&self) -> usize {
        match &self.set {
            BucketSet::Double(b) => b.len(),
            BucketSet::Spread(b) => b.len(),
        }
    }

    fn timestamp(&self, index: usize) -> Timestamp {
        self.start.saturating_add(self.size.saturating_mul(index as i64))
    }

    /// Indexes of the buckets that `timestamp` falls into
    fn indexes(&self, timestamp: Timestamp) -> Range<usize> {
        let start = i128::from(self.start);
        let size = i128::from(self.size);
        let t = i128::from(timestamp);

        // Last bucket starting at or before t, first one ending after it.
        let last = (t - start).div_euclid(size);
        let first = (t - i128::from(self.extent) - start).div_euclid(size) + 1;

        let lo = first.max(0);
        let hi = (last + 1).min(self.len() as i128);
        if lo >= hi {
            return 0..0;
        }
        lo as usize..hi as usize
    }

    fn update_point(&self, key: &GroupKey, point: &Point) {
        let range = self.indexes(point.timestamp);
        match &self.set {
            BucketSet::Double(b) => b[range].iter().for_each(|b| b.update_point(key, point)),
            BucketSet::Spread(b) => b[range].iter().for_each(|b| b.update_point(key, point)),
        }
    }

    fn update_spread(&self, key: &GroupKey, spread: &Spread) {
        let range = self.indexes(spread.timestamp);
        match &self.set {
            BucketSet::Double(b) => b[range].iter().for_each(|b| b.update_spread(key, spread)),
            BucketSet::Spread(b) => b[range].iter().for_each(|b| b.update_spread(key, spread)),
        }
    }

    fn update_event(&self, key: &GroupKey, event: &Event) {
        let range = self.indexes(event.timestamp);
        match &self.set {
            BucketSet::Double(b) => b[range].iter().for_each(|b| b.update_event(key, event)),
            BucketSet::Spread(b) => b[range].iter().for_each(|b| b.update_event(key, event)),
        }
    }

    /// Feed a collection, returning the number of samples consumed
    fn update(&self, key: &GroupKey, values: &MetricCollection) -> usize {
        match values {
            MetricCollection::Points(points) => {
                points.iter().for_each(|p| self.update_point(key, p));
                points.len()
            }
            MetricCollection::Spreads(spreads) => {
                spreads.iter().for_each(|s| self.update_spread(key, s));
                spreads.len()
            }
            MetricCollection::Events(events) => {
                events.iter().for_each(|e| self.update_event(key, e));
                events.len()
            }
            MetricCollection::Groups(_) => 0,
        }
    }

    /// The non-empty buckets, `None` if there are none
    fn finish(&self) -> Option<MetricCollection> {
        let collection = match &self.set {
            BucketSet::Double(buckets) => MetricCollection::Points(
                buckets
                    .iter()
                    .enumerate()
                    .filter_map(|(i, bucket)| {
                        let value = bucket.value();
                        (!value.is_nan()).then(|| Point::new(self.timestamp(i), value))
                    })
                    .collect(),
            ),
            BucketSet::Spread(buckets) => MetricCollection::Spreads(
                buckets
                    .iter()
                    .enumerate()
                    .filter_map(|(i, bucket)| bucket.value(self.timestamp(i)))
                    .collect(),
            ),
        };

        (!collection.is_empty()).then_some(collection)
    }
}

/// Session sampling every group into one shared set of buckets
struct BucketSession {
    keys: FxHashSet<GroupKey>,
    buckets: Buckets,
    sampled: AtomicU64,
}

impl AggregationSession for BucketSession {
    fn update(&self, key: &GroupKey, values: MetricCollection) -> Result<()> {
        if !self.keys.contains(key) {
            let mut known: Vec<GroupKey> = self.keys.iter().cloned().collect();
            known.sort();
            return Err(AggregationError::MissingSession {
                key: key.clone(),
                group: key.clone(),
                known,
            });
        }

        let sampled = self.buckets.update(key, &values);
        self.sampled.fetch_add(sampled as u64, Ordering::Relaxed);
        Ok(())
    }

    fn result(self: Box<Self>) -> Result<AggregationResult> {
        let result = self
            .buckets
            .finish()
            .map(|metrics| AggregationData::new(GroupKey::new(), metrics))
            .into_iter()
            .collect();

        let statistics = Statistics::of(SAMPLED, self.sampled.load(Ordering::Relaxed));
        Ok(AggregationResult::new(result, statistics))
    }
}

struct BucketReducerSession {
    buckets: Buckets,
}

impl ReducerSession for BucketReducerSession {
    fn update(&self, key: &GroupKey, values: MetricCollection) {
        self.buckets.update(key, &values);
    }

    fn result(self: Box<Self>) -> ReducerResult {
        ReducerResult::new(self.buckets.finish().into_iter().collect(), Statistics::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(kind: BucketKind, size: i64, extent: i64) -> SamplingInstance {
        SamplingInstance::new(kind, size, extent, 0, 1_000_000).unwrap()
    }

    fn states() -> Vec<AggregationState> {
        vec![
            AggregationState::for_series(Series::of("cpu", &[("host", "a")])),
            AggregationState::for_series(Series::of("cpu", &[("host", "b")])),
        ]
    }

    fn run(kind: BucketKind, points: Vec<Point>) -> Vec<Point> {
        let range = TimeRange::new(0, 3_000);
        let states = states();
        let traversal = instance(kind, 1_000, 1_000).session(states.clone(), &range).unwrap();
        traversal.session.update_points(&states[0].key, points).unwrap();

        let result = traversal.session.result().unwrap();
        match result.result.into_iter().next() {
            Some(data) => data.metrics.as_points().unwrap_or_default().to_vec(),
            None => Vec::new(),
        }
    }

    #[test]
    fn test_invalid_definitions() {
        assert!(SamplingInstance::new(BucketKind::Sum, 0, 0, 0, 10).is_err());
        assert!(SamplingInstance::new(BucketKind::Sum, -5, 10, 0, 10).is_err());
        assert!(SamplingInstance::new(BucketKind::Sum, 10, 5, 0, 10).is_err());
        assert!(SamplingInstance::new(BucketKind::Sum, 10, 10, 0, 10).is_ok());
    }

    #[test]
    fn test_estimate() {
        let sum = instance(BucketKind::Sum, 1_000, 1_000);
        assert_eq!(sum.estimate(&TimeRange::new(0, 3_000)), 3);
        assert_eq!(sum.estimate(&TimeRange::new(0, 3_001)), 4);
        assert_eq!(sum.estimate(&TimeRange::new(0, 0)), 0);
    }

    #[test]
    fn test_single_state_with_union_of_series() {
        let range = TimeRange::new(0, 3_000);
        let traversal = instance(BucketKind::Sum, 1_000, 1_000)
            .session(states(), &range)
            .unwrap();

        assert_eq!(traversal.states.len(), 1);
        assert!(traversal.states[0].key.is_empty());
        assert_eq!(traversal.states[0].series.len(), 2);
    }

    #[test]
    fn test_same_bucket_statistics() {
        let points = vec![Point::new(1_000, 2.0), Point::new(1_500, 4.0)];

        assert_eq!(run(BucketKind::Count, points.clone()), vec![Point::new(1_000, 2.0)]);
        assert_eq!(run(BucketKind::Sum, points.clone()), vec![Point::new(1_000, 6.0)]);
        assert_eq!(run(BucketKind::Average, points.clone()), vec![Point::new(1_000, 3.0)]);
        assert_eq!(run(BucketKind::Variance, points.clone()), vec![Point::new(1_000, 1.0)]);
        assert_eq!(run(BucketKind::StdDev, points.clone()), vec![Point::new(1_000, 1.0)]);
        assert_eq!(run(BucketKind::Min, points.clone()), vec![Point::new(1_000, 2.0)]);
        assert_eq!(run(BucketKind::Max, points), vec![Point::new(1_000, 4.0)]);
    }

    #[test]
    fn test_empty_buckets_are_omitted() {
        let points = vec![Point::new(0, 1.0), Point::new(2_999, 5.0)];
        assert_eq!(
            run(BucketKind::Sum, points),
            vec![Point::new(0, 1.0), Point::new(2_000, 5.0)]
        );

        assert!(run(BucketKind::Sum, Vec::new()).is_empty());
    }

    #[test]
    fn test_out_of_range_samples_are_dropped() {
        let points = vec![Point::new(-1, 1.0), Point::new(3_000, 1.0), Point::new(500, 2.0)];
        assert_eq!(run(BucketKind::Sum, points), vec![Point::new(0, 2.0)]);
    }

    #[test]
    fn test_extent_overlaps_buckets() {
        let range = TimeRange::new(0, 3_000);
        let states = states();
        let traversal = instance(BucketKind::Sum, 1_000, 2_000)
            .session(states.clone(), &range)
            .unwrap();

        traversal
            .session
            .update_points(&states[0].key, vec![Point::new(1_500, 1.0)])
            .unwrap();

        let result = traversal.session.result().unwrap();
        assert_eq!(
            result.result[0].metrics,
            MetricCollection::Points(vec![Point::new(0, 1.0), Point::new(1_000, 1.0)])
        );
    }

    #[test]
    fn test_range_is_rounded() {
        let range = TimeRange::new(1_250, 2_100);
        let states = states();
        let traversal = instance(BucketKind::Count, 1_000, 1_000)
            .session(states.clone(), &range)
            .unwrap();

        traversal
            .session
            .update_points(&states[0].key, vec![Point::new(1_100, 1.0), Point::new(2_900, 1.0)])
            .unwrap();

        let result = traversal.session.result().unwrap();
        assert_eq!(result.result[0].metrics.timestamps(), vec![1_000, 2_000]);
    }

    #[test]
    fn test_max_buckets_truncates() {
        let range = TimeRange::new(0, 10_000);
        let states = states();
        let sampling = SamplingInstance::new(BucketKind::Count, 1_000, 1_000, 0, 2).unwrap();
        let traversal = sampling.session(states.clone(), &range).unwrap();

        traversal
            .session
            .update_points(
                &states[0].key,
                vec![Point::new(0, 1.0), Point::new(1_000, 1.0), Point::new(5_000, 1.0)],
            )
            .unwrap();

        let result = traversal.session.result().unwrap();
        assert_eq!(result.result[0].metrics.timestamps(), vec![0, 1_000]);
    }

    #[test]
    fn test_spreads_and_statistics() {
        let range = TimeRange::new(0, 2_000);
        let states = states();
        let traversal = instance(BucketKind::Spread, 1_000, 1_000)
            .session(states.clone(), &range)
            .unwrap();

        traversal
            .session
            .update_points(&states[0].key, vec![Point::new(100, 1.0), Point::new(200, 3.0)])
            .unwrap();
        traversal
            .session
            .update_spreads(&states[1].key, vec![Spread::new(1_100, 2, 4.0, 8.0, 2.0, 2.0)])
            .unwrap();

        let result = traversal.session.result().unwrap();
        assert_eq!(result.statistics.get(SAMPLED), 3);
        assert_eq!(
            result.result[0].metrics,
            MetricCollection::Spreads(vec![
                Spread::new(0, 2, 4.0, 10.0, 1.0, 3.0),
                Spread::new(1_000, 2, 4.0, 8.0, 2.0, 2.0),
            ])
        );
    }

    #[test]
    fn test_count_includes_events() {
        let range = TimeRange::new(0, 1_000);
        let states = states();
        let traversal = instance(BucketKind::Count, 1_000, 1_000)
            .session(states.clone(), &range)
            .unwrap();

        traversal
            .session
            .update_events(&states[0].key, vec![Event::new(10), Event::new(20)])
            .unwrap();

        let result = traversal.session.result().unwrap();
        assert_eq!(result.result[0].metrics, MetricCollection::Points(vec![Point::new(0, 2.0)]));
    }

    #[test]
    fn test_unknown_key_is_fatal() {
        let range = TimeRange::new(0, 1_000);
        let traversal = instance(BucketKind::Sum, 1_000, 1_000)
            .session(states(), &range)
            .unwrap();

        let other = Series::of("cpu", &[("host", "z")]).tags;
        let err = traversal
            .session
            .update_points(&other, vec![Point::new(0, 1.0)])
            .unwrap_err();
        assert!(matches!(err, AggregationError::MissingSession { .. }));
    }

    #[test]
    fn test_count_reducer_sums_partials() {
        let range = TimeRange::new(0, 2_000);
        let reducer = instance(BucketKind::Count, 1_000, 1_000).reducer(&range).unwrap();
        let key = GroupKey::new();

        reducer.update(&key, MetricCollection::Points(vec![Point::new(0, 2.0), Point::new(1_000, 1.0)]));
        reducer.update(&key, MetricCollection::Points(vec![Point::new(0, 3.0)]));

        let result = reducer.result();
        assert_eq!(
            result.result,
            vec![MetricCollection::Points(vec![Point::new(0, 5.0), Point::new(1_000, 1.0)])]
        );
    }

    #[test]
    fn test_distributed() {
        let stddev = instance(BucketKind::StdDev, 1_000, 2_000);
        let distributed = stddev.distributed();

        assert_eq!(distributed.kind(), BucketKind::Spread);
        assert_eq!(distributed.size(), 1_000);
        assert_eq!(distributed.extent(), 2_000);

        let max = instance(BucketKind::Max, 1_000, 1_000);
        assert_eq!(max.distributed(), max);
    }

    #[test]
    fn test_reducer_weighs_partials_by_sample_count() {
        let range = TimeRange::new(0, 1_000);
        let states = states();

        // One shard saw a single sample, the other three.
        let partial = |values: &[f64]| {
            let traversal = instance(BucketKind::Average, 1_000, 1_000)
                .distributed()
                .session(states.clone(), &range)
                .unwrap();
            let points = values.iter().map(|v| Point::new(0, *v)).collect();
            traversal.session.update_points(&states[0].key, points).unwrap();
            traversal.session.result().unwrap().result.remove(0).metrics
        };
        let one = partial(&[1.0]);
        let three = partial(&[3.0, 3.0, 3.0]);

        let expected = [
            (BucketKind::Average, 2.5),
            (BucketKind::Variance, 0.75),
            (BucketKind::StdDev, 0.75f64.sqrt()),
        ];

        for (kind, value) in expected {
            let reducer = instance(kind, 1_000, 1_000).reducer(&range).unwrap();
            reducer.update(&GroupKey::new(), one.clone());
            reducer.update(&GroupKey::new(), three.clone());

            let result = reducer.result().result;
            let points = result[0].as_points().unwrap();
            assert_eq!(points.len(), 1);
            assert!((points[0].value - value).abs() < 1e-12, "{}", kind.name());
        }
    }

    #[test]
    fn test_reducer_without_data() {
        let range = TimeRange::new(0, 2_000);
        let reducer = instance(BucketKind::Max, 1_000, 3_000).reducer(&range).unwrap();
        assert!(reducer.result().result.is_empty());
    }
}
