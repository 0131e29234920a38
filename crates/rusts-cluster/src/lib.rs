//! RusTs Cluster - Running aggregations across shards
//!
//! This crate provides:
//! - Shard-side execution of an aggregation over the series a shard holds
//! - Per-shard failures carried as data next to successful results
//! - The coordinator combining every shard's answer into the query result
//! - Query node configuration (TOML-based)
//!
//! Selecting shards, transporting their answers and retrying failed calls
//! belong to the caller.

pub mod config;
pub mod error;
pub mod query;
pub mod shard;

pub use config::ClusterQueryConfig;
pub use error::{ClusterError, Result};
pub use query::{ClusterQuery, QueryResult, ShardError, ShardResult};
pub use shard::{SeriesData, ShardQuery, ShardResultPart};
