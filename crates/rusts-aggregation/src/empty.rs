//! Identity aggregation sessions
//!
//! Used when a query asks for no aggregation: every update is kept, and
//! finalizing merges the batches each group received.

use crate::error::{AggregationError, Result};
use crate::merge::{collect_into, MetricBuffers};
use crate::session::{
    AggregationData, AggregationResult, AggregationSession, AggregationState, ReducerResult,
    ReducerSession,
};
use fxhash::FxHashMap;
use parking_lot::Mutex;
use rusts_core::{Event, GroupKey, MetricCollection, MetricGroup, Point, Spread, Statistics};

/// Append-only batches for one group, one lock per metric type
#[derive(Default)]
struct SubSession {
    groups: Mutex<Vec<Vec<MetricGroup>>>,
    points: Mutex<Vec<Vec<Point>>>,
    events: Mutex<Vec<Vec<Event>>>,
    spreads: Mutex<Vec<Vec<Spread>>>,
}

impl SubSession {
    fn push(&self, values: MetricCollection) {
        if values.is_empty() {
            return;
        }

        match values {
            MetricCollection::Groups(v) => self.groups.lock().push(v),
            MetricCollection::Points(v) => self.points.lock().push(v),
            MetricCollection::Events(v) => self.events.lock().push(v),
            MetricCollection::Spreads(v) => self.spreads.lock().push(v),
        }
    }

    fn finish(self) -> Vec<MetricCollection> {
        let mut output = Vec::new();
        collect_into(&mut output, self.groups.into_inner());
        collect_into(&mut output, self.points.into_inner());
        collect_into(&mut output, self.events.into_inner());
        collect_into(&mut output, self.spreads.into_inner());
        output
    }
}

/// Session collecting every update under its original group key.
///
/// The key set is fixed when the session is built, so concurrent updates
/// only contend on the per-type lock of their own group.
pub struct CollectorSession {
    sessions: FxHashMap<GroupKey, SubSession>,
}

impl CollectorSession {
    pub fn new(states: &[AggregationState]) -> Self {
        let sessions = states
            .iter()
            .map(|s| (s.key.clone(), SubSession::default()))
            .collect();
        Self { sessions }
    }
}

impl AggregationSession for CollectorSession {
    fn update(&self, key: &GroupKey, values: MetricCollection) -> Result<()> {
        let session = self
            .sessions
            .get(key)
            .ok_or_else(|| AggregationError::MissingSession {
                key: key.clone(),
                group: key.clone(),
                known: self.sessions.keys().cloned().collect(),
            })?;

        session.push(values);
        Ok(())
    }

    fn result(self: Box<Self>) -> Result<AggregationResult> {
        let mut sessions: Vec<(GroupKey, SubSession)> = self.sessions.into_iter().collect();
        sessions.sort_by(|a, b| a.0.cmp(&b.0));

        let mut result = Vec::new();
        for (key, session) in sessions {
            for metrics in session.finish() {
                result.push(AggregationData::new(key.clone(), metrics));
            }
        }

        Ok(AggregationResult::new(result, Statistics::empty()))
    }
}

/// Reducer collecting every partial result regardless of key
#[derive(Default)]
pub struct CollectorReducerSession {
    buffers: Mutex<MetricBuffers>,
}

impl CollectorReducerSession {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReducerSession for CollectorReducerSession {
    fn update(&self, _key: &GroupKey, values: MetricCollection) {
        self.buffers.lock().push(values);
    }

    fn result(self: Box<Self>) -> ReducerResult {
        ReducerResult::new(self.buffers.into_inner().finish(), Statistics::empty())
    }
}
