//! Group and collapse operators
//!
//! Both partition series by a projection of their tags and run an
//! independent instance of the inner aggregation for every partition. They
//! only differ in the projection: `Group` keeps the listed tags, `Collapse`
//! drops them.

use crate::error::{AggregationError, Result};
use crate::instance::AggregationInstance;
use crate::merge::MetricBuffers;
use crate::session::{
    AggregationData, AggregationResult, AggregationSession, AggregationState,
    AggregationTraversal,
};
use fxhash::FxHashMap;
use rusts_core::{GroupKey, MetricCollection, Series, Statistics, TimeRange};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Tag projection used to derive group keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupingKind {
    /// Keep only the listed tags
    Group,
    /// Keep every tag except the listed ones
    Collapse,
}

impl GroupingKind {
    pub fn name(&self) -> &'static str {
        match self {
            GroupingKind::Group => "group",
            GroupingKind::Collapse => "collapse",
        }
    }

    /// Project `tags` onto a group key.
    ///
    /// Without a tag list every series ends up in the empty key.
    pub fn key(&self, of: Option<&BTreeSet<String>>, tags: &GroupKey) -> GroupKey {
        let Some(of) = of else {
            return GroupKey::new();
        };

        match self {
            GroupingKind::Group => of
                .iter()
                .filter_map(|k| tags.get_key_value(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            GroupingKind::Collapse => tags
                .iter()
                .filter(|(k, _)| !of.contains(*k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

/// A built group or collapse aggregation
#[derive(Debug, Clone, PartialEq)]
pub struct GroupingInstance {
    kind: GroupingKind,
    of: Option<BTreeSet<String>>,
    each: Box<AggregationInstance>,
}

impl GroupingInstance {
    pub fn new(kind: GroupingKind, of: Option<BTreeSet<String>>, each: AggregationInstance) -> Self {
        Self {
            kind,
            of,
            each: Box::new(each),
        }
    }

    pub fn kind(&self) -> GroupingKind {
        self.kind
    }

    pub fn of(&self) -> Option<&BTreeSet<String>> {
        self.of.as_ref()
    }

    /// The aggregation applied to every group
    pub fn each(&self) -> &AggregationInstance {
        &self.each
    }

    pub fn required_tags(&self) -> BTreeSet<String> {
        self.of.clone().unwrap_or_default()
    }

    fn key(&self, tags: &GroupKey) -> GroupKey {
        self.kind.key(self.of.as_ref(), tags)
    }

    /// Partition `states` by group key and build one inner session per key.
    ///
    /// A state is projected through its own key, not through the tags of
    /// its series, since updates arrive under that key. A state is never
    /// split across groups. The output holds one state per group key with every series the inner
    /// sessions reported.
    pub fn session(
        &self,
        states: Vec<AggregationState>,
        range: &TimeRange,
    ) -> Result<AggregationTraversal> {
        let mut partitions: BTreeMap<GroupKey, Vec<AggregationState>> = BTreeMap::new();
        for state in states {
            partitions.entry(self.key(&state.key)).or_default().push(state);
        }

        debug!(
            "{}: partitioned series into {} groups",
            self.kind.name(),
            partitions.len()
        );

        let mut sessions = FxHashMap::default();
        let mut next = Vec::with_capacity(partitions.len());

        for (key, states) in partitions {
            let traversal = self.each.session(states, range)?;
            let series: BTreeSet<Series> = traversal
                .states
                .into_iter()
                .flat_map(|s| s.series)
                .collect();

            next.push(AggregationState::new(key.clone(), series));
            sessions.insert(key, traversal.session);
        }

        let session = GroupSession {
            kind: self.kind,
            of: self.of.clone(),
            sessions,
        };

        Ok(AggregationTraversal::new(next, Box::new(session)))
    }

    /// The same grouping over the shard-side form of `each`
    pub fn distributed(&self) -> GroupingInstance {
        GroupingInstance::new(self.kind, self.of.clone(), self.each.distributed())
    }
}

/// Routes every update to the inner session of its group
struct GroupSession {
    kind: GroupingKind,
    of: Option<BTreeSet<String>>,
    sessions: FxHashMap<GroupKey, Box<dyn AggregationSession>>,
}

impl AggregationSession for GroupSession {
    fn update(&self, group: &GroupKey, values: MetricCollection) -> Result<()> {
        let key = self.kind.key(self.of.as_ref(), group);

        let Some(session) = self.sessions.get(&key) else {
            let mut known: Vec<GroupKey> = self.sessions.keys().cloned().collect();
            known.sort();
            return Err(AggregationError::MissingSession {
                key,
                group: group.clone(),
                known,
            });
        };

        session.update(group, values)
    }

    fn result(self: Box<Self>) -> Result<AggregationResult> {
        let mut groups: BTreeMap<GroupKey, MetricBuffers> = BTreeMap::new();
        let mut statistics = Statistics::empty();

        for (key, session) in self.sessions {
            let result = session.result()?;
            statistics = statistics.merge(&result.statistics);

            let buffers = groups.entry(key).or_default();
            for data in result.result {
                buffers.push(data.metrics);
            }
        }

        let mut result = Vec::new();
        for (key, buffers) in groups {
            for metrics in buffers.finish() {
                result.push(AggregationData::new(key.clone(), metrics));
            }
        }

        Ok(AggregationResult::new(result, statistics))
    }
}
