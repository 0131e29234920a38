//! Aggregation error types

use rusts_core::GroupKey;
use thiserror::Error;

/// Aggregation errors
#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("Invalid aggregation definition: {0}")]
    InvalidDefinition(String),

    #[error("No such aggregation: {0}")]
    NoSuchAggregation(String),

    /// An update arrived for a group key the session was never built with.
    #[error("No session for key {key:?} derived from {group:?}, has {known:?}")]
    MissingSession {
        key: GroupKey,
        group: GroupKey,
        known: Vec<GroupKey>,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Core(#[from] rusts_core::CoreError),
}

/// Result type for aggregation operations
pub type Result<T> = std::result::Result<T, AggregationError>;
