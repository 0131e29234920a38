//! Name to aggregation lookup
//!
//! The registry is built once at startup and handed to whatever turns query
//! text into `Aggregation`s.

use crate::aggregation::Aggregation;
use crate::bucket::BucketKind;
use crate::error::{AggregationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Arguments an aggregation is built from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationArgs {
    /// Tags to group or collapse by
    pub of: Option<Vec<String>>,
    /// Aggregation applied to every group
    pub each: Option<Aggregation>,
    /// Stages of a chain
    pub chain: Vec<Aggregation>,
    /// Bucket width in milliseconds
    pub size: Option<i64>,
    /// Bucket extent in milliseconds
    pub extent: Option<i64>,
}

impl AggregationArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(mut self, of: &[&str]) -> Self {
        self.of = Some(of.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn each(mut self, each: Aggregation) -> Self {
        self.each = Some(each);
        self
    }

    pub fn chain(mut self, chain: Vec<Aggregation>) -> Self {
        self.chain = chain;
        self
    }

    pub fn size(mut self, size: i64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn extent(mut self, extent: i64) -> Self {
        self.extent = Some(extent);
        self
    }
}

/// Builds an aggregation from its arguments
pub type AggregationBuilder = fn(&AggregationArgs) -> Result<Aggregation>;

/// Table of every known aggregation
#[derive(Clone, Default)]
pub struct AggregationRegistry {
    builders: HashMap<String, AggregationBuilder>,
}

impl AggregationRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in aggregation
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        let builtins: [(&str, AggregationBuilder); 12] = [
            ("empty", build_empty),
            ("chain", build_chain),
            ("group", build_group),
            ("collapse", build_collapse),
            ("sum", |args| build_sampling(BucketKind::Sum, args)),
            ("count", |args| build_sampling(BucketKind::Count, args)),
            ("min", |args| build_sampling(BucketKind::Min, args)),
            ("max", |args| build_sampling(BucketKind::Max, args)),
            ("average", |args| build_sampling(BucketKind::Average, args)),
            ("stddev", |args| build_sampling(BucketKind::StdDev, args)),
            ("variance", |args| build_sampling(BucketKind::Variance, args)),
            ("spread", |args| build_sampling(BucketKind::Spread, args)),
        ];

        for (name, builder) in builtins {
            registry.builders.insert(name.to_string(), builder);
        }

        registry
    }

    /// Register a new aggregation under `name`
    pub fn register(&mut self, name: impl Into<String>, builder: AggregationBuilder) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(AggregationError::InvalidDefinition(
                "Aggregation name cannot be empty".to_string(),
            ));
        }
        if self.builders.contains_key(&name) {
            return Err(AggregationError::InvalidDefinition(format!(
                "Aggregation '{}' already registered",
                name
            )));
        }

        self.builders.insert(name, builder);
        Ok(())
    }

    /// Build the aggregation registered as `name`
    pub fn build(&self, name: &str, args: &AggregationArgs) -> Result<Aggregation> {
        let builder = self
            .builders
            .get(name)
            .ok_or_else(|| AggregationError::NoSuchAggregation(name.to_string()))?;
        builder(args)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.builders.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for AggregationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregationRegistry")
            .field("names", &self.names())
            .finish()
    }
}

fn unexpected(name: &str, argument: &str) -> AggregationError {
    AggregationError::InvalidDefinition(format!("{} does not take `{}`", name, argument))
}

fn build_empty(args: &AggregationArgs) -> Result<Aggregation> {
    if args != &AggregationArgs::default() {
        return Err(AggregationError::InvalidDefinition(
            "empty takes no arguments".to_string(),
        ));
    }
    Ok(Aggregation::Empty)
}

fn build_chain(args: &AggregationArgs) -> Result<Aggregation> {
    if args.of.is_some() {
        return Err(unexpected("chain", "of"));
    }
    if args.each.is_some() {
        return Err(unexpected("chain", "each"));
    }
    Ok(Aggregation::chain(args.chain.clone()))
}

fn grouping_args(name: &str, args: &AggregationArgs) -> Result<()> {
    if !args.chain.is_empty() {
        return Err(unexpected(name, "chain"));
    }
    if args.size.is_some() {
        return Err(unexpected(name, "size"));
    }
    if args.extent.is_some() {
        return Err(unexpected(name, "extent"));
    }
    Ok(())
}

fn build_group(args: &AggregationArgs) -> Result<Aggregation> {
    grouping_args("group", args)?;
    Ok(Aggregation::Group {
        of: args.of.clone(),
        each: args.each.clone().map(Box::new),
    })
}

fn build_collapse(args: &AggregationArgs) -> Result<Aggregation> {
    grouping_args("collapse", args)?;
    Ok(Aggregation::Collapse {
        of: args.of.clone(),
        each: args.each.clone().map(Box::new),
    })
}

fn build_sampling(kind: BucketKind, args: &AggregationArgs) -> Result<Aggregation> {
    let name = kind.name();
    if args.of.is_some() {
        return Err(unexpected(name, "of"));
    }
    if args.each.is_some() {
        return Err(unexpected(name, "each"));
    }
    if !args.chain.is_empty() {
        return Err(unexpected(name, "chain"));
    }

    for (argument, value) in [("size", args.size), ("extent", args.extent)] {
        if let Some(value) = value {
            if value <= 0 {
                return Err(AggregationError::InvalidDefinition(format!(
                    "{}: {} must be positive, got {}",
                    name, argument, value
                )));
            }
        }
    }

    Ok(Aggregation::sampling(kind, args.size, args.extent))
}
