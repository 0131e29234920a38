//! Cluster error types

use rusts_aggregation::AggregationError;
use rusts_core::CoreError;
use thiserror::Error;

/// Cluster errors
///
/// A failed shard is not one of these: it travels next to the results of
/// the other shards as a `ShardError`.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for cluster operations
pub type Result<T> = std::result::Result<T, ClusterError>;
