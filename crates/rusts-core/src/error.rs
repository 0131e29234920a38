//! Error types for rusts-core

use thiserror::Error;

/// Core error types
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Empty measurement name")]
    EmptyMeasurement,

    #[error("Empty tag key")]
    EmptyTagKey,

    #[error("Invalid cadence: {0}")]
    InvalidCadence(i64),
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
