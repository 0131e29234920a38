//! Query statistics counters

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named counters gathered while a query runs.
///
/// Merging adds counters with the same name, so merging is associative and
/// commutative with `Statistics::empty()` as identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    counters: BTreeMap<String, u64>,
}

impl Statistics {
    /// Statistics without any counters
    pub fn empty() -> Self {
        Self::default()
    }

    /// Statistics holding a single counter
    pub fn of(key: impl Into<String>, value: u64) -> Self {
        let mut counters = BTreeMap::new();
        counters.insert(key.into(), value);
        Self { counters }
    }

    /// Combine two sets of counters
    pub fn merge(&self, other: &Statistics) -> Statistics {
        let mut counters = self.counters.clone();
        for (key, value) in &other.counters {
            let counter = counters.entry(key.clone()).or_insert(0);
            *counter = counter.saturating_add(*value);
        }
        Statistics { counters }
    }

    /// Value of a counter, zero if absent
    pub fn get(&self, key: &str) -> u64 {
        self.counters.get(key).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}
