//! RusTs Aggregation - Downsampling, grouping and result combination
//!
//! This crate provides:
//! - Bucket engine (sum, count, min, max, average, stddev, variance, spread)
//! - Sorted merge of time-ordered metric batches
//! - Aggregation sessions fed concurrently by shard ingest workers
//! - Group, collapse and chain operators
//! - Reducers and the combiner merging per-shard partial results
//! - Aggregation descriptions and the name to aggregation registry

pub mod aggregation;
pub mod bucket;
pub mod chain;
pub mod config;
pub mod empty;
pub mod error;
pub mod grouping;
pub mod instance;
pub mod merge;
pub mod registry;
pub mod sampling;
pub mod session;
pub mod sharded;

pub use aggregation::{Aggregation, AggregationContext};
pub use bucket::{Bucket, BucketKind, DoubleBucket, Welford};
pub use chain::ChainInstance;
pub use config::AggregationConfig;
pub use error::{AggregationError, Result};
pub use grouping::{GroupingInstance, GroupingKind};
pub use instance::{AggregationCombiner, AggregationInstance, DefaultCombiner, ReducerCombiner};
pub use merge::{merge_sorted, MetricBuffers};
pub use registry::{AggregationArgs, AggregationBuilder, AggregationRegistry};
pub use sampling::SamplingInstance;
pub use session::{
    AggregationData, AggregationResult, AggregationSession, AggregationState,
    AggregationTraversal, ReducerResult, ReducerSession,
};
pub use sharded::{SeriesValues, SeriesValuesBuilder, ShardedResultGroup};
