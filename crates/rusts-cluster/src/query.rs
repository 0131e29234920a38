//! Cluster-level query coordination
//!
//! Collects what every shard answered and combines it into the query
//! result. A shard that failed does not fail the query: its error is
//! reported next to the groups of the shards that succeeded.

use crate::error::Result;
use crate::shard::ShardResultPart;
use rusts_aggregation::{AggregationInstance, ShardedResultGroup};
use rusts_core::{ShardTags, Statistics, TimeRange};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// A shard that could not answer
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Shard {shard:?} failed: {message}")]
pub struct ShardError {
    pub shard: ShardTags,
    pub message: String,
}

impl ShardError {
    pub fn new(shard: ShardTags, message: impl Into<String>) -> Self {
        Self {
            shard,
            message: message.into(),
        }
    }
}

/// The answer of one shard
pub type ShardResult = std::result::Result<ShardResultPart, ShardError>;

/// Combined result of a query across shards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub range: TimeRange,
    pub groups: Vec<ShardedResultGroup>,
    /// Shards that failed, ordered by shard tags
    pub errors: Vec<ShardError>,
    pub statistics: Statistics,
    /// Width of the buckets in `groups`, 0 if not downsampled
    pub cadence: i64,
}

impl QueryResult {
    /// True if every shard contributed
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Coordinates one query over the shards of a cluster
#[derive(Debug, Clone)]
pub struct ClusterQuery {
    instance: AggregationInstance,
    distributed: AggregationInstance,
    range: TimeRange,
}

impl ClusterQuery {
    pub fn new(instance: AggregationInstance, range: TimeRange) -> Self {
        let distributed = instance.distributed();
        Self {
            instance,
            distributed,
            range,
        }
    }

    pub fn instance(&self) -> &AggregationInstance {
        &self.instance
    }

    /// The aggregation every shard runs. `combine` expects shard parts
    /// produced with it.
    pub fn distributed(&self) -> &AggregationInstance {
        &self.distributed
    }

    pub fn range(&self) -> &TimeRange {
        &self.range
    }

    /// Combine the answers of every shard.
    ///
    /// Only fails if combining the successful parts fails. If every shard
    /// failed the result holds no groups and every error.
    pub fn combine(&self, parts: Vec<ShardResult>) -> Result<QueryResult> {
        let mut successful = Vec::with_capacity(parts.len());
        let mut errors = Vec::new();
        let mut statistics = Statistics::empty();

        for part in parts {
            match part {
                Ok(part) => {
                    statistics = statistics.merge(&part.statistics);
                    successful.push(part.groups);
                }
                Err(e) => {
                    warn!("Shard {:?} failed: {}", e.shard, e.message);
                    errors.push(e);
                }
            }
        }

        errors.sort_by(|a, b| a.shard.cmp(&b.shard));

        let shards = successful.len();
        let groups = self.instance.combiner(&self.range).combine(successful)?;

        debug!(
            "Combined {} shards into {} groups, {} shards failed",
            shards,
            groups.len(),
            errors.len()
        );

        Ok(QueryResult {
            range: self.range,
            groups,
            errors,
            statistics,
            cadence: self.instance.cadence(),
        })
    }
}
