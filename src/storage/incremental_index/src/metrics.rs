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

//! Ingestion metrics, in the style of
//! `risingwave_storage::monitor::state_store_metrics::HummockStateStoreMetrics`:
//! a `Registry`-backed struct of `prometheus` series constructed once and
//! cheaply `Arc`-cloned into the index. Observability only — a metrics
//! registration failure never affects ingestion outcomes.

use prometheus::{
    exponential_buckets, histogram_opts, register_histogram_with_registry,
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Histogram, IntCounter, IntCounterVec, IntGauge, Registry,
};

#[derive(Debug)]
pub struct IncrementalIndexMetrics {
    pub rows_ingested: IntCounter,
    pub rows_rejected: IntCounterVec,
    pub arena_bytes_used: IntGauge,
    pub ingest_duration: Histogram,
}

impl IncrementalIndexMetrics {
    pub fn new(registry: &Registry) -> Self {
        let rows_ingested = register_int_counter_with_registry!(
            "incremental_index_rows_ingested_total",
            "Total number of rows successfully folded into the index",
            registry
        )
        .unwrap();

        let rows_rejected = register_int_counter_vec_with_registry!(
            "incremental_index_rows_rejected_total",
            "Total number of rows rejected during ingestion, by reason",
            &["reason"],
            registry
        )
        .unwrap();

        let arena_bytes_used = register_int_gauge_with_registry!(
            "incremental_index_arena_bytes_used",
            "Bytes of the backing arena currently occupied by row slots",
            registry
        )
        .unwrap();

        let opts = histogram_opts!(
            "incremental_index_ingest_duration_seconds",
            "Wall time of a single add() call",
            exponential_buckets(1e-6, 4.0, 12).unwrap()
        );
        let ingest_duration = register_histogram_with_registry!(opts, registry).unwrap();

        Self {
            rows_ingested,
            rows_rejected,
            arena_bytes_used,
            ingest_duration,
        }
    }

    /// A metrics instance registered into a throwaway registry, for tests
    /// and for hosts that don't yet wire up a shared one.
    pub fn unused() -> Self {
        Self::new(&Registry::new())
    }
}
