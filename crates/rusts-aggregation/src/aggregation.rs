//! Aggregation descriptions
//!
//! An `Aggregation` is what a query asks for. Applying it to an
//! `AggregationContext` resolves defaults and tag requirements, producing
//! the `AggregationInstance` that sessions are built from.

use crate::bucket::BucketKind;
use crate::chain::ChainInstance;
use crate::config::AggregationConfig;
use crate::error::{AggregationError, Result};
use crate::grouping::{GroupingInstance, GroupingKind};
use crate::instance::AggregationInstance;
use crate::sampling::SamplingInstance;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Defaults and requirements an aggregation is applied with
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationContext {
    /// Cadence for sampling aggregations that specify none
    pub size: Option<i64>,
    /// Extent for sampling aggregations that specify none
    pub extent: Option<i64>,
    /// Tags that later stages need to see on their input
    pub required_tags: BTreeSet<String>,
    pub config: AggregationConfig,
}

impl AggregationContext {
    pub fn new(config: AggregationConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn with_size(mut self, size: i64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_extent(mut self, extent: i64) -> Self {
        self.extent = Some(extent);
        self
    }

    pub fn with_required_tags(mut self, required_tags: BTreeSet<String>) -> Self {
        self.required_tags = required_tags;
        self
    }
}

/// A requested aggregation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Aggregation {
    Empty,
    Sampling {
        kind: BucketKind,
        #[serde(default)]
        size: Option<i64>,
        #[serde(default)]
        extent: Option<i64>,
    },
    Group {
        #[serde(default)]
        of: Option<Vec<String>>,
        #[serde(default)]
        each: Option<Box<Aggregation>>,
    },
    Collapse {
        #[serde(default)]
        of: Option<Vec<String>>,
        #[serde(default)]
        each: Option<Box<Aggregation>>,
    },
    Chain {
        #[serde(default)]
        chain: Vec<Aggregation>,
    },
}

impl Aggregation {
    pub fn sampling(kind: BucketKind, size: Option<i64>, extent: Option<i64>) -> Self {
        Aggregation::Sampling { kind, size, extent }
    }

    pub fn group(of: &[&str], each: Option<Aggregation>) -> Self {
        Aggregation::Group {
            of: Some(of.iter().map(|t| t.to_string()).collect()),
            each: each.map(Box::new),
        }
    }

    pub fn collapse(of: &[&str], each: Option<Aggregation>) -> Self {
        Aggregation::Collapse {
            of: Some(of.iter().map(|t| t.to_string()).collect()),
            each: each.map(Box::new),
        }
    }

    pub fn chain(chain: Vec<Aggregation>) -> Self {
        Aggregation::Chain { chain }
    }

    /// Resolve this aggregation into an executable instance
    pub fn apply(&self, context: &AggregationContext) -> Result<AggregationInstance> {
        match self {
            Aggregation::Empty => Ok(AggregationInstance::Empty),
            Aggregation::Sampling { kind, size, extent } => {
                let size = size
                    .or(context.size)
                    .or(context.config.default_size)
                    .ok_or_else(|| {
                        AggregationError::InvalidDefinition(format!(
                            "{}: no size given",
                            kind.name()
                        ))
                    })?;
                let extent = extent.or(context.extent).unwrap_or(size);

                let instance = SamplingInstance::new(
                    *kind,
                    size,
                    extent,
                    context.config.bucket_stripes,
                    context.config.max_buckets,
                )?;
                Ok(AggregationInstance::Sampling(instance))
            }
            Aggregation::Group { of, each } => {
                apply_grouping(GroupingKind::Group, of.as_deref(), each.as_deref(), context)
            }
            Aggregation::Collapse { of, each } => {
                apply_grouping(GroupingKind::Collapse, of.as_deref(), each.as_deref(), context)
            }
            Aggregation::Chain { chain } => {
                // Applied back to front: each stage keeps the tags the next
                // stage requires.
                let mut required_tags = context.required_tags.clone();
                let mut stages = Vec::with_capacity(chain.len());

                for stage in chain.iter().rev() {
                    let stage_context = context.clone().with_required_tags(required_tags);
                    let instance = stage.apply(&stage_context)?;
                    required_tags = instance.required_tags();
                    stages.push(instance);
                }

                stages.reverse();
                Ok(AggregationInstance::Chain(ChainInstance::new(stages)))
            }
        }
    }
}

fn apply_grouping(
    kind: GroupingKind,
    of: Option<&[String]>,
    each: Option<&Aggregation>,
    context: &AggregationContext,
) -> Result<AggregationInstance> {
    let of = match of {
        Some(of) => {
            if of.iter().any(|t| t.is_empty()) {
                return Err(AggregationError::InvalidDefinition(format!(
                    "{}: empty tag name",
                    kind.name()
                )));
            }

            let mut of: BTreeSet<String> = of.iter().cloned().collect();
            match kind {
                GroupingKind::Group => of.extend(context.required_tags.iter().cloned()),
                GroupingKind::Collapse => of.retain(|t| !context.required_tags.contains(t)),
            }
            Some(of)
        }
        None => None,
    };

    // The inner aggregation sees one group at a time and owes nothing to
    // the stages around this one.
    let inner = context.clone().with_required_tags(BTreeSet::new());
    let each = match each {
        Some(each) => each.apply(&inner)?,
        None => AggregationInstance::Empty,
    };

    Ok(AggregationInstance::Grouping(GroupingInstance::new(kind, of, each)))
}
