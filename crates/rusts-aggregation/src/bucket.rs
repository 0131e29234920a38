//! Bucket engine
//!
//! A bucket accumulates every sample that falls into one time window of a
//! sampling aggregation. Buckets are single-pass: no samples are retained, and
//! every kind keeps O(1) state regardless of how many samples it has seen.
//!
//! Buckets are updated through `&self` so that many ingest threads can feed
//! the same session. Reading a value is only meaningful once all updates
//! have completed.

use fxhash::FxHasher;
use parking_lot::Mutex;
use rusts_core::{Event, GroupKey, MetricType, Point, Spread, Timestamp};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

/// Running count, mean and sum of squared deviations (Welford).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Welford {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Welford {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one sample
    pub fn update(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    /// State of the samples summarized by `spread`
    pub fn from_spread(spread: &Spread) -> Welford {
        if spread.count == 0 {
            return Welford::new();
        }

        let n = spread.count as f64;
        let mean = spread.sum / n;
        // Rounding can push the sum of squared deviations slightly below 0.
        let m2 = (spread.sum2 - spread.sum * mean).max(0.0);

        Welford {
            count: spread.count,
            mean,
            m2,
        }
    }

    /// Combine two partial states (parallel variance formula)
    pub fn merge(&self, other: &Welford) -> Welford {
        if self.count == 0 {
            return *other;
        }
        if other.count == 0 {
            return *self;
        }

        let count = self.count.saturating_add(other.count);
        let delta = other.mean - self.mean;
        let mean = self.mean + delta * other.count as f64 / count as f64;
        let m2 = self.m2
            + other.m2
            + delta * delta * self.count as f64 * other.count as f64 / count as f64;

        Welford { count, mean, m2 }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean of the samples, NaN without samples
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return f64::NAN;
        }
        self.mean
    }

    /// Population variance, NaN without samples
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            return f64::NAN;
        }
        self.m2 / self.count as f64
    }

    /// Population standard deviation, NaN without samples
    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// A time window accumulating samples.
pub trait Bucket: Send + Sync {
    fn update_point(&self, key: &GroupKey, point: &Point);

    fn update_spread(&self, _key: &GroupKey, _spread: &Spread) {}

    fn update_event(&self, _key: &GroupKey, _event: &Event) {}
}

/// A bucket producing a single double, NaN meaning "no data".
pub trait DoubleBucket: Bucket {
    fn value(&self) -> f64;
}

/// `f64` stored as bits in an atomic
#[derive(Debug)]
struct AtomicDouble(AtomicU64);

impl AtomicDouble {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn update(&self, f: impl Fn(f64) -> f64) {
        // The closure always returns Some, so fetch_update cannot fail.
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some(f(f64::from_bits(bits)).to_bits())
            });
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }
}

/// Sum of all samples
#[derive(Debug)]
pub struct SumBucket {
    sum: AtomicDouble,
    count: AtomicU64,
}

impl SumBucket {
    pub fn new() -> Self {
        Self {
            sum: AtomicDouble::new(0.0),
            count: AtomicU64::new(0),
        }
    }

    fn add(&self, value: f64) {
        self.sum.update(|sum| sum + value);
        self.count.fetch_add(1, Ordering::AcqRel);
    }
}

impl Bucket for SumBucket {
    fn update_point(&self, _key: &GroupKey, point: &Point) {
        self.add(point.value);
    }

    fn update_spread(&self, _key: &GroupKey, spread: &Spread) {
        self.add(spread.sum);
    }
}

impl DoubleBucket for SumBucket {
    fn value(&self) -> f64 {
        if self.count.load(Ordering::Acquire) == 0 {
            return f64::NAN;
        }
        self.sum.load()
    }
}

/// Number of samples
#[derive(Debug, Default)]
pub struct CountBucket {
    count: AtomicU64,
}

impl CountBucket {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Bucket for CountBucket {
    fn update_point(&self, _key: &GroupKey, _point: &Point) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn update_spread(&self, _key: &GroupKey, spread: &Spread) {
        self.count.fetch_add(spread.count, Ordering::AcqRel);
    }

    fn update_event(&self, _key: &GroupKey, _event: &Event) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }
}

impl DoubleBucket for CountBucket {
    fn value(&self) -> f64 {
        match self.count.load(Ordering::Acquire) {
            0 => f64::NAN,
            count => count as f64,
        }
    }
}

/// Smallest sample
#[derive(Debug)]
pub struct MinBucket {
    min: AtomicDouble,
}

impl MinBucket {
    pub fn new() -> Self {
        Self {
            min: AtomicDouble::new(f64::NAN),
        }
    }
}

impl Bucket for MinBucket {
    fn update_point(&self, _key: &GroupKey, point: &Point) {
        // f64::min ignores a NaN operand, so the initial NaN is replaced.
        self.min.update(|min| min.min(point.value));
    }

    fn update_spread(&self, _key: &GroupKey, spread: &Spread) {
        self.min.update(|min| min.min(spread.min));
    }
}

impl DoubleBucket for MinBucket {
    fn value(&self) -> f64 {
        self.min.load()
    }
}

/// Largest sample
#[derive(Debug)]
pub struct MaxBucket {
    max: AtomicDouble,
}

impl MaxBucket {
    pub fn new() -> Self {
        Self {
            max: AtomicDouble::new(f64::NAN),
        }
    }
}

impl Bucket for MaxBucket {
    fn update_point(&self, _key: &GroupKey, point: &Point) {
        self.max.update(|max| max.max(point.value));
    }

    fn update_spread(&self, _key: &GroupKey, spread: &Spread) {
        self.max.update(|max| max.max(spread.max));
    }
}

impl DoubleBucket for MaxBucket {
    fn value(&self) -> f64 {
        self.max.load()
    }
}

/// Arithmetic mean of samples
#[derive(Debug, Default)]
pub struct AverageBucket {
    state: Mutex<(f64, u64)>,
}

impl AverageBucket {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Bucket for AverageBucket {
    fn update_point(&self, _key: &GroupKey, point: &Point) {
        let mut state = self.state.lock();
        state.0 += point.value;
        state.1 = state.1.saturating_add(1);
    }

    fn update_spread(&self, _key: &GroupKey, spread: &Spread) {
        let mut state = self.state.lock();
        state.0 += spread.sum;
        state.1 = state.1.saturating_add(spread.count);
    }
}

impl DoubleBucket for AverageBucket {
    fn value(&self) -> f64 {
        let (sum, count) = *self.state.lock();
        if count == 0 {
            return f64::NAN;
        }
        sum / count as f64
    }
}

/// Which second-moment statistic a moment bucket reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Moment {
    StdDev,
    Variance,
}

impl Moment {
    fn of(&self, state: &Welford) -> f64 {
        match self {
            Moment::StdDev => state.stddev(),
            Moment::Variance => state.variance(),
        }
    }
}

/// Standard deviation or variance behind a single lock
#[derive(Debug)]
pub struct MomentBucket {
    moment: Moment,
    state: Mutex<Welford>,
}

impl MomentBucket {
    pub fn new(moment: Moment) -> Self {
        Self {
            moment,
            state: Mutex::new(Welford::new()),
        }
    }
}

impl Bucket for MomentBucket {
    fn update_point(&self, _key: &GroupKey, point: &Point) {
        self.state.lock().update(point.value);
    }

    fn update_spread(&self, _key: &GroupKey, spread: &Spread) {
        let mut state = self.state.lock();
        *state = state.merge(&Welford::from_spread(spread));
    }
}

impl DoubleBucket for MomentBucket {
    fn value(&self) -> f64 {
        self.moment.of(&self.state.lock())
    }
}

/// Standard deviation or variance with state split over independently
/// locked stripes.
///
/// Each update picks a stripe by hashing its group key and timestamp; the
/// stripes are combined only when the value is read.
#[derive(Debug)]
pub struct StripedMomentBucket {
    moment: Moment,
    stripes: Vec<Mutex<Welford>>,
}

impl StripedMomentBucket {
    pub fn new(moment: Moment, stripes: usize) -> Self {
        let stripes = (0..stripes.max(1)).map(|_| Mutex::new(Welford::new())).collect();
        Self { moment, stripes }
    }

    fn stripe(&self, key: &GroupKey, timestamp: Timestamp) -> &Mutex<Welford> {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        timestamp.hash(&mut hasher);
        let index = (hasher.finish() % self.stripes.len() as u64) as usize;
        &self.stripes[index]
    }

    /// Combined state of every stripe
    pub fn combined(&self) -> Welford {
        self.stripes
            .iter()
            .fold(Welford::new(), |acc, stripe| acc.merge(&stripe.lock()))
    }
}

impl Bucket for StripedMomentBucket {
    fn update_point(&self, key: &GroupKey, point: &Point) {
        self.stripe(key, point.timestamp).lock().update(point.value);
    }

    fn update_spread(&self, key: &GroupKey, spread: &Spread) {
        let mut state = self.stripe(key, spread.timestamp).lock();
        *state = state.merge(&Welford::from_spread(spread));
    }
}

impl DoubleBucket for StripedMomentBucket {
    fn value(&self) -> f64 {
        self.moment.of(&self.combined())
    }
}

#[derive(Debug, Clone, Copy)]
struct SpreadState {
    count: u64,
    sum: f64,
    sum2: f64,
    min: f64,
    max: f64,
}

/// Count, sum, sum of squares, min and max of samples
#[derive(Debug, Default)]
pub struct SpreadBucket {
    state: Mutex<Option<SpreadState>>,
}

impl SpreadBucket {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, other: SpreadState) {
        let mut state = self.state.lock();
        *state = Some(match *state {
            None => other,
            Some(s) => SpreadState {
                count: s.count.saturating_add(other.count),
                sum: s.sum + other.sum,
                sum2: s.sum2 + other.sum2,
                min: s.min.min(other.min),
                max: s.max.max(other.max),
            },
        });
    }

    /// The accumulated spread at `timestamp`, if any sample arrived
    pub fn value(&self, timestamp: Timestamp) -> Option<Spread> {
        self.state
            .lock()
            .map(|s| Spread::new(timestamp, s.count, s.sum, s.sum2, s.min, s.max))
    }
}

impl Bucket for SpreadBucket {
    fn update_point(&self, _key: &GroupKey, point: &Point) {
        let v = point.value;
        self.add(SpreadState {
            count: 1,
            sum: v,
            sum2: v * v,
            min: v,
            max: v,
        });
    }

    fn update_spread(&self, _key: &GroupKey, spread: &Spread) {
        self.add(SpreadState {
            count: spread.count,
            sum: spread.sum,
            sum2: spread.sum2,
            min: spread.min,
            max: spread.max,
        });
    }
}

/// The kinds of bucket a sampling aggregation can use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketKind {
    Sum,
    Count,
    Min,
    Max,
    Average,
    StdDev,
    Variance,
    Spread,
}

impl BucketKind {
    pub const ALL: [BucketKind; 8] = [
        BucketKind::Sum,
        BucketKind::Count,
        BucketKind::Min,
        BucketKind::Max,
        BucketKind::Average,
        BucketKind::StdDev,
        BucketKind::Variance,
        BucketKind::Spread,
    ];

    /// Name used to look the aggregation up
    pub fn name(&self) -> &'static str {
        match self {
            BucketKind::Sum => "sum",
            BucketKind::Count => "count",
            BucketKind::Min => "min",
            BucketKind::Max => "max",
            BucketKind::Average => "average",
            BucketKind::StdDev => "stddev",
            BucketKind::Variance => "variance",
            BucketKind::Spread => "spread",
        }
    }

    /// Type of metric the buckets produce
    pub fn output_type(&self) -> MetricType {
        match self {
            BucketKind::Spread => MetricType::Spread,
            _ => MetricType::Point,
        }
    }

    /// Kind shards sample with so that their partials can be merged.
    ///
    /// A finished average or deviation cannot be recombined, so shards send
    /// spreads instead and the reducer computes the statistic once.
    pub fn distributed_kind(&self) -> BucketKind {
        match self {
            BucketKind::Average | BucketKind::StdDev | BucketKind::Variance => BucketKind::Spread,
            other => *other,
        }
    }

    /// Kind used to recombine partial results of this kind
    pub fn reducer_kind(&self) -> BucketKind {
        match self {
            BucketKind::Count => BucketKind::Sum,
            other => *other,
        }
    }

    /// Build a double-valued bucket, `None` for kinds producing spreads
    pub fn double_bucket(&self, stripes: usize) -> Option<Box<dyn DoubleBucket>> {
        let moment = |moment: Moment| -> Box<dyn DoubleBucket> {
            if stripes > 1 {
                Box::new(StripedMomentBucket::new(moment, stripes))
            } else {
                Box::new(MomentBucket::new(moment))
            }
        };

        Some(match self {
            BucketKind::Sum => Box::new(SumBucket::new()),
            BucketKind::Count => Box::new(CountBucket::new()),
            BucketKind::Min => Box::new(MinBucket::new()),
            BucketKind::Max => Box::new(MaxBucket::new()),
            BucketKind::Average => Box::new(AverageBucket::new()),
            BucketKind::StdDev => moment(Moment::StdDev),
            BucketKind::Variance => moment(Moment::Variance),
            BucketKind::Spread => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn moment_buckets(moment: Moment) -> Vec<Box<dyn DoubleBucket>> {
        vec![
            Box::new(MomentBucket::new(moment)),
            Box::new(StripedMomentBucket::new(moment, 8)),
        ]
    }

    fn feed(bucket: &dyn DoubleBucket, values: &[f64]) {
        let key = GroupKey::new();
        for (i, v) in values.iter().enumerate() {
            bucket.update_point(&key, &Point::new(i as i64, *v));
        }
    }

    #[test]
    fn test_welford_basic() {
        let mut state = Welford::new();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            state.update(v);
        }

        assert_eq!(state.count(), 8);
        assert!((state.mean() - 5.0).abs() < 1e-12);
        assert!((state.variance() - 4.0).abs() < 1e-12);
        assert!((state.stddev() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_welford_merge_matches_sequential() {
        let values: Vec<f64> = (0..100).map(|i| (i as f64 * 0.37).sin() * 10.0).collect();

        let mut all = Welford::new();
        let mut left = Welford::new();
        let mut right = Welford::new();
        for (i, v) in values.iter().enumerate() {
            all.update(*v);
            if i % 3 == 0 {
                left.update(*v);
            } else {
                right.update(*v);
            }
        }

        let merged = left.merge(&right);
        assert_eq!(merged.count(), all.count());
        assert!((merged.mean() - all.mean()).abs() < 1e-9);
        assert!((merged.variance() - all.variance()).abs() < 1e-9);

        assert_eq!(Welford::new().merge(&all), all);
        assert_eq!(all.merge(&Welford::new()), all);
    }

    #[test]
    fn test_nan_on_zero() {
        for bucket in moment_buckets(Moment::StdDev) {
            assert!(bucket.value().is_nan());
        }

        for bucket in moment_buckets(Moment::StdDev) {
            feed(bucket.as_ref(), &[0.0, 0.0]);
            assert!(!bucket.value().is_nan());
            assert_eq!(bucket.value(), 0.0);
        }
    }

    #[test]
    fn test_single_sample_is_zero() {
        for bucket in moment_buckets(Moment::StdDev) {
            feed(bucket.as_ref(), &[42.0]);
            assert_eq!(bucket.value(), 0.0);
        }
        for bucket in moment_buckets(Moment::Variance) {
            feed(bucket.as_ref(), &[42.0]);
            assert_eq!(bucket.value(), 0.0);
        }
    }

    #[test]
    fn test_expected_values() {
        let mut rng = rand::thread_rng();
        let values: Vec<f64> = (0..1000).map(|_| rng.gen::<f64>()).collect();

        for bucket in moment_buckets(Moment::StdDev) {
            feed(bucket.as_ref(), &values);
            let value = bucket.value();
            assert!((0.0..=1.0).contains(&value), "stddev out of range: {}", value);
        }
    }

    #[test]
    fn test_striped_matches_single_lock() {
        let values: Vec<f64> = (0..500).map(|i| (i % 17) as f64 * 1.5).collect();
        let buckets = moment_buckets(Moment::Variance);
        for bucket in &buckets {
            feed(bucket.as_ref(), &values);
        }
        assert!((buckets[0].value() - buckets[1].value()).abs() < 1e-9);
    }

    #[test]
    fn test_striped_concurrent_updates() {
        let bucket = StripedMomentBucket::new(Moment::Variance, 4);

        std::thread::scope(|scope| {
            for t in 0..4 {
                let bucket = &bucket;
                scope.spawn(move || {
                    let mut key = GroupKey::new();
                    key.insert("thread".to_string(), t.to_string());
                    for i in 0..250 {
                        bucket.update_point(&key, &Point::new(i, 1.0 + (i % 2) as f64));
                    }
                });
            }
        });

        let combined = bucket.combined();
        assert_eq!(combined.count(), 1000);
        assert!((bucket.value() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_simple_buckets() {
        let values = [5.0, 2.0, 8.0, 1.0];

        let sum = SumBucket::new();
        let count = CountBucket::new();
        let min = MinBucket::new();
        let max = MaxBucket::new();
        let avg = AverageBucket::new();

        let buckets: [&dyn DoubleBucket; 5] = [&sum, &count, &min, &max, &avg];
        for bucket in buckets {
            assert!(bucket.value().is_nan());
            feed(bucket, &values);
        }

        assert_eq!(sum.value(), 16.0);
        assert_eq!(count.value(), 4.0);
        assert_eq!(min.value(), 1.0);
        assert_eq!(max.value(), 8.0);
        assert_eq!(avg.value(), 4.0);
    }

    #[test]
    fn test_spread_updates() {
        let key = GroupKey::new();
        let spread = Spread::new(0, 3, 6.0, 14.0, 1.0, 3.0);

        let count = CountBucket::new();
        count.update_spread(&key, &spread);
        count.update_event(&key, &Event::new(0));
        assert_eq!(count.value(), 4.0);

        let avg = AverageBucket::new();
        avg.update_spread(&key, &spread);
        avg.update_point(&key, &Point::new(0, 6.0));
        assert_eq!(avg.value(), 3.0);

        let bucket = SpreadBucket::new();
        assert!(bucket.value(10).is_none());
        bucket.update_spread(&key, &spread);
        bucket.update_point(&key, &Point::new(0, 4.0));
        assert_eq!(bucket.value(10), Some(Spread::new(10, 4, 10.0, 30.0, 1.0, 4.0)));
    }

    #[test]
    fn test_welford_from_spread() {
        let values = [1.0, 3.0, 3.0, 3.0];
        let mut expected = Welford::new();
        let spread = SpreadBucket::new();
        for v in values {
            expected.update(v);
            spread.update_point(&GroupKey::new(), &Point::new(0, v));
        }

        let state = spread.value(0).map(|s| Welford::from_spread(&s)).unwrap();
        assert_eq!(state.count(), 4);
        assert!((state.mean() - 2.5).abs() < 1e-12);
        assert!((state.variance() - expected.variance()).abs() < 1e-12);

        assert_eq!(Welford::from_spread(&Spread::new(0, 0, 0.0, 0.0, 0.0, 0.0)), Welford::new());
    }

    #[test]
    fn test_moment_buckets_merge_spreads() {
        // One sample of 1.0 on one side, three of 3.0 on the other.
        let key = GroupKey::new();
        let one = Spread::new(0, 1, 1.0, 1.0, 1.0, 1.0);
        let three = Spread::new(0, 3, 9.0, 27.0, 3.0, 3.0);

        for bucket in moment_buckets(Moment::Variance) {
            bucket.update_spread(&key, &one);
            bucket.update_spread(&key, &three);
            assert!((bucket.value() - 0.75).abs() < 1e-12);
        }

        let avg = AverageBucket::new();
        avg.update_spread(&key, &one);
        avg.update_spread(&key, &three);
        assert_eq!(avg.value(), 2.5);
    }

    #[test]
    fn test_counts_saturate() {
        let key = GroupKey::new();
        let full = Spread::new(0, u64::MAX, 1.0, 1.0, 1.0, 1.0);

        let spread = SpreadBucket::new();
        spread.update_spread(&key, &full);
        spread.update_point(&key, &Point::new(0, 1.0));
        assert_eq!(spread.value(0).map(|s| s.count), Some(u64::MAX));

        let avg = AverageBucket::new();
        avg.update_spread(&key, &full);
        avg.update_spread(&key, &full);
        assert!(!avg.value().is_nan());
    }

    #[test]
    fn test_bucket_kinds() {
        for kind in BucketKind::ALL {
            assert_eq!(kind.double_bucket(0).is_none(), kind == BucketKind::Spread);
        }
        assert_eq!(BucketKind::Count.reducer_kind(), BucketKind::Sum);
        assert_eq!(BucketKind::Min.reducer_kind(), BucketKind::Min);
        assert_eq!(BucketKind::StdDev.distributed_kind(), BucketKind::Spread);
        assert_eq!(BucketKind::Average.distributed_kind(), BucketKind::Spread);
        assert_eq!(BucketKind::Sum.distributed_kind(), BucketKind::Sum);
        assert_eq!(BucketKind::Spread.output_type(), MetricType::Spread);
        assert_eq!(BucketKind::StdDev.name(), "stddev");
    }
}
