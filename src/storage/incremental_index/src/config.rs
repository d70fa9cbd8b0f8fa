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

//! Construction-time configuration for an [`crate::index::IncrementalIndex`].
//!
//! This is a library embedded by a host process, not a standalone service,
//! so there is no file or environment parsing here (contrast
//! `risedevtool::config`, which does parse a file because it drives a CLI).
//! A hosting service is expected to build [`IndexConfig`] from whatever
//! configuration surface it already has.

use std::sync::Arc;

use crate::aggregator::{AggregatorFactory, ComplexMetricSerdeRegistry, QueryGranularity};
use crate::dictionary::DictionaryBackend;

/// Construction-time parameters for an incremental index.
pub struct IndexConfig {
    pub aggregators: Vec<Arc<dyn AggregatorFactory>>,
    pub arena_capacity: usize,
    pub min_timestamp: i64,
    pub granularity: Arc<dyn QueryGranularity>,
    pub dictionary_backend: DictionaryBackend,
    pub complex_metric_serdes: ComplexMetricSerdeRegistry,
}

impl IndexConfig {
    pub fn builder(
        granularity: Arc<dyn QueryGranularity>,
        arena_capacity: usize,
    ) -> IndexConfigBuilder {
        IndexConfigBuilder {
            aggregators: Vec::new(),
            arena_capacity,
            min_timestamp: i64::MIN,
            granularity,
            dictionary_backend: DictionaryBackend::default(),
            complex_metric_serdes: ComplexMetricSerdeRegistry::new(),
        }
    }

    /// `sum(aggregator.max_intermediate_size())`: the row stride `S`.
    pub fn row_stride(&self) -> usize {
        self.aggregators
            .iter()
            .map(|a| a.max_intermediate_size())
            .sum()
    }
}

pub struct IndexConfigBuilder {
    aggregators: Vec<Arc<dyn AggregatorFactory>>,
    arena_capacity: usize,
    min_timestamp: i64,
    granularity: Arc<dyn QueryGranularity>,
    dictionary_backend: DictionaryBackend,
    complex_metric_serdes: ComplexMetricSerdeRegistry,
}

impl IndexConfigBuilder {
    pub fn aggregator(mut self, aggregator: Arc<dyn AggregatorFactory>) -> Self {
        self.aggregators.push(aggregator);
        self
    }

    pub fn min_timestamp(mut self, min_timestamp: i64) -> Self {
        self.min_timestamp = min_timestamp;
        self
    }

    pub fn dictionary_backend(mut self, backend: DictionaryBackend) -> Self {
        self.dictionary_backend = backend;
        self
    }

    pub fn complex_metric_serdes(mut self, registry: ComplexMetricSerdeRegistry) -> Self {
        self.complex_metric_serdes = registry;
        self
    }

    pub fn build(self) -> IndexConfig {
        IndexConfig {
            aggregators: self.aggregators,
            arena_capacity: self.arena_capacity,
            min_timestamp: self.min_timestamp,
            granularity: self.granularity,
            dictionary_backend: self.dictionary_backend,
            complex_metric_serdes: self.complex_metric_serdes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::testing::CountAggregator;
    use crate::aggregator::DurationGranularity;

    #[test]
    fn row_stride_sums_aggregator_sizes() {
        let config = IndexConfig::builder(
            Arc::new(DurationGranularity { bucket_millis: 60_000 }),
            1024,
        )
        .aggregator(Arc::new(CountAggregator::factory()))
        .build();
        assert_eq!(config.row_stride(), 8);
    }
}
