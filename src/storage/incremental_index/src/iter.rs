// Copyright 2024 RisingWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Materializing fact-map entries into rows, in key order (§4.8). Iteration
//! never mutates aggregator state: it only calls `BufferAggregator::get`.

use std::sync::Arc;

use crate::aggregator::AggregatedValue;

/// A value materialized for one column of an iterated row: either a single
/// dimension value, a multi-valued dimension's tuple, or an aggregator
/// result.
#[derive(Debug, Clone)]
pub enum MaterializedValue {
    Single(Arc<str>),
    Multi(Vec<Arc<str>>),
    Aggregated(AggregatedValue),
}

/// One row produced by [`crate::index::IncrementalIndex::iterator`],
/// preserving dimension-registry order followed by aggregator order
/// followed by post-aggregator order.
#[derive(Debug, Clone)]
pub struct MaterializedRow {
    pub timestamp: i64,
    /// `(column name, value)` pairs in materialization order: dimensions
    /// with a non-empty tuple (registry order), then aggregators
    /// (declared order), then post-aggregators (declared order).
    pub columns: Vec<(Arc<str>, MaterializedValue)>,
}

impl MaterializedRow {
    pub fn get(&self, column: &str) -> Option<&MaterializedValue> {
        self.columns
            .iter()
            .find(|(name, _)| name.as_ref() == column)
            .map(|(_, v)| v)
    }
}

/// A computation over a [`MaterializedRow`]'s already-materialized
/// dimension and aggregator columns, applied only during iteration —
/// never persisted into the arena (§4.8).
pub trait PostAggregator: Send + Sync {
    fn name(&self) -> &str;
    fn compute(&self, row: &MaterializedRow) -> MaterializedValue;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn materialized_row_get_finds_by_name() {
        let row = MaterializedRow {
            timestamp: 0,
            columns: vec![(
                Arc::from("count"),
                MaterializedValue::Aggregated(AggregatedValue::Long(3)),
            )],
        };
        assert!(matches!(
            row.get("count"),
            Some(MaterializedValue::Aggregated(AggregatedValue::Long(3)))
        ));
        assert!(row.get("missing").is_none());
    }
}
