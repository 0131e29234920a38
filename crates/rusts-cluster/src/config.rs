//! Query node configuration
//!
//! Loaded from TOML. The `[aggregation]` table configures how aggregation
//! sessions are built on this node.

use crate::error::{ClusterError, Result};
use rusts_aggregation::{AggregationConfig, AggregationContext};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for running queries on a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterQueryConfig {
    /// Minimum number of series before a shard ingests them in parallel.
    /// Default: 4
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,

    /// Number of threads in the ingest thread pool.
    /// Set to 0 to use the number of CPU cores.
    #[serde(default)]
    pub thread_pool_size: usize,

    #[serde(default)]
    pub aggregation: AggregationConfig,
}

fn default_parallel_threshold() -> usize {
    4
}

impl Default for ClusterQueryConfig {
    fn default() -> Self {
        Self {
            parallel_threshold: default_parallel_threshold(),
            thread_pool_size: 0,
            aggregation: AggregationConfig::default(),
        }
    }
}

impl ClusterQueryConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ClusterError::Configuration(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ClusterError::Configuration(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.aggregation.validate()?;
        Ok(())
    }

    /// A configuration that never ingests in parallel
    pub fn sequential() -> Self {
        Self {
            parallel_threshold: usize::MAX,
            thread_pool_size: 1,
            aggregation: AggregationConfig::default(),
        }
    }

    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    pub fn with_thread_pool_size(mut self, size: usize) -> Self {
        self.thread_pool_size = size;
        self
    }

    /// Returns true if `series_count` series should be ingested in parallel.
    pub fn should_parallelize(&self, series_count: usize) -> bool {
        series_count >= self.parallel_threshold
    }

    /// Returns num_cpus if thread_pool_size is 0.
    pub fn effective_thread_pool_size(&self) -> usize {
        if self.thread_pool_size == 0 {
            num_cpus::get()
        } else {
            self.thread_pool_size
        }
    }

    /// Context to apply query aggregations with
    pub fn aggregation_context(&self) -> AggregationContext {
        AggregationContext::new(self.aggregation.clone())
    }
}
