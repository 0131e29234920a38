//! Sorted merge of metric sequences
//!
//! Every result-assembly step funnels through here: per-batch collectors,
//! group regrouping and reducers all hold several time-ordered sources for
//! one (group, type) pair and need a single time-ordered sequence out.

use rusts_core::{Event, Metric, MetricCollection, MetricGroup, Point, Spread, Timestamp};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Head element of one source while merging
struct Head<T> {
    timestamp: Timestamp,
    source: usize,
    metric: T,
}

impl<T> PartialEq for Head<T> {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp && self.source == other.source
    }
}

impl<T> Eq for Head<T> {}

impl<T> PartialOrd for Head<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Head<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Ties go to the earlier source, which keeps the merge deterministic.
        self.timestamp
            .cmp(&other.timestamp)
            .then(self.source.cmp(&other.source))
    }
}

/// Merge sources that are each sorted by timestamp into one sorted sequence.
///
/// A single source is returned as-is without touching its elements or its
/// allocation. With `k` sources the merge costs O(n log k). Metrics sharing
/// a timestamp are all kept: first by source position, then by their order
/// within the source.
pub fn merge_sorted<T: Metric>(mut sources: Vec<Vec<T>>) -> Vec<T> {
    if sources.len() <= 1 {
        return sources.pop().unwrap_or_default();
    }

    let total = sources.iter().map(Vec::len).sum();
    let mut output = Vec::with_capacity(total);

    let mut iters: Vec<std::vec::IntoIter<T>> = sources.into_iter().map(Vec::into_iter).collect();
    let mut heap = BinaryHeap::with_capacity(iters.len());

    for (source, iter) in iters.iter_mut().enumerate() {
        if let Some(metric) = iter.next() {
            heap.push(Reverse(Head {
                timestamp: metric.timestamp(),
                source,
                metric,
            }));
        }
    }

    while let Some(Reverse(head)) = heap.pop() {
        let source = head.source;
        output.push(head.metric);

        if let Some(metric) = iters[source].next() {
            heap.push(Reverse(Head {
                timestamp: metric.timestamp(),
                source,
                metric,
            }));
        }
    }

    output
}

/// Sorted batches for one group, kept apart by metric type.
///
/// Empty batches are dropped on the way in, so every collection produced by
/// `finish` is non-empty.
#[derive(Debug, Default)]
pub struct MetricBuffers {
    groups: Vec<Vec<MetricGroup>>,
    points: Vec<Vec<Point>>,
    events: Vec<Vec<Event>>,
    spreads: Vec<Vec<Spread>>,
}

impl MetricBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one sorted batch
    pub fn push(&mut self, collection: MetricCollection) {
        if collection.is_empty() {
            return;
        }

        match collection {
            MetricCollection::Groups(v) => self.groups.push(v),
            MetricCollection::Points(v) => self.points.push(v),
            MetricCollection::Events(v) => self.events.push(v),
            MetricCollection::Spreads(v) => self.spreads.push(v),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
            && self.points.is_empty()
            && self.events.is_empty()
            && self.spreads.is_empty()
    }

    /// Merge every type into one collection, in metric type order
    pub fn finish(self) -> Vec<MetricCollection> {
        let mut output = Vec::new();
        collect_into(&mut output, self.groups);
        collect_into(&mut output, self.points);
        collect_into(&mut output, self.events);
        collect_into(&mut output, self.spreads);
        output
    }
}

/// Merge `batches` and append the collection, unless there is nothing to add
pub(crate) fn collect_into<T: Metric>(output: &mut Vec<MetricCollection>, batches: Vec<Vec<T>>) {
    if batches.is_empty() {
        return;
    }
    output.push(T::collection(merge_sorted(batches)));
}
