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

//! The incremental index itself: the concurrent, in-memory, column-oriented
//! aggregation engine described by this crate's module docs (see `lib.rs`).

use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::aggregator::{AggregatorFactory, BufferAggregator, RowColumnSelectorFactory};
use crate::arena::{ArenaHolder, ByteArena, ByteArenaPool, HeapArenaPool};
use crate::config::IndexConfig;
use crate::dictionary::DimensionDictionary;
use crate::error::{IndexError, IndexResult};
use crate::fact_map::FactMap;
use crate::iter::{MaterializedRow, MaterializedValue, PostAggregator};
use crate::key::{DimValues, TimeAndDims};
use crate::metrics::IncrementalIndexMetrics;
use crate::registry::{DimensionRegistry, ValueKind};
use crate::row::{apply_chain, InputRow, RowTransformer};

/// One aggregator's placement within a row slot plus its bound
/// `BufferAggregator` and the mutex serializing its `aggregate` calls
/// across every slot (§5: "per-aggregator mutex ... serializes only
/// mutators of the same metric region").
struct AggregatorBinding {
    name: Arc<str>,
    type_name: Arc<str>,
    offset: usize,
    size: usize,
    aggregator: Box<dyn BufferAggregator>,
    lock: Mutex<()>,
}

/// The incremental, in-memory, column-oriented aggregation index.
///
/// See the crate-level docs for the concurrency model. In short: readers
/// (`iterator`, `facts`, accessors) never block on writers, and concurrent
/// `add` calls only ever contend on three short-held mutexes (dimension
/// discovery, slot reservation, and — per aggregator — the `aggregate`
/// call itself).
pub struct IncrementalIndex {
    config: IndexConfig,
    row_stride: usize,
    arena: Arc<ByteArena>,
    holder: Mutex<ArenaHolder>,
    fact_map: FactMap,
    registry: DimensionRegistry,
    bindings: Vec<AggregatorBinding>,
    transformers: Vec<Box<dyn RowTransformer>>,
    /// The logical allocation cursor: `num_entries * row_stride` is the
    /// next tentative slot offset. Guarded by the same lock used for the
    /// whole slot-reservation critical section (§4.6 step 5), so it
    /// doubles as the "insertion mutex".
    insertion_state: Mutex<usize>,
    metrics: Arc<IncrementalIndexMetrics>,
    closed: AtomicBool,
}

impl IncrementalIndex {
    /// Builds an index from `config`, acquiring its arena from `pool` (the
    /// default [`HeapArenaPool`] is almost always the right choice; a host
    /// embedding many indices may supply one that reuses freed memory).
    ///
    /// # Errors
    /// Propagates [`IndexError::UnknownType`] if a configured aggregator
    /// declares a complex type with no registered
    /// [`crate::aggregator::ComplexMetricSerde`] (§7: fail fast at
    /// construction, not on the first matching row).
    pub fn new(
        config: IndexConfig,
        pool: &dyn ByteArenaPool,
        metrics: Arc<IncrementalIndexMetrics>,
    ) -> IndexResult<Self> {
        Self::with_transformers(config, pool, metrics, Vec::new())
    }

    pub fn with_transformers(
        config: IndexConfig,
        pool: &dyn ByteArenaPool,
        metrics: Arc<IncrementalIndexMetrics>,
        transformers: Vec<Box<dyn RowTransformer>>,
    ) -> IndexResult<Self> {
        let row_stride = config.row_stride();
        let holder = pool.take(config.arena_capacity);
        let arena = holder.arena();

        let selectors = RowColumnSelectorFactory::new(config.complex_metric_serdes.clone());
        let mut bindings = Vec::with_capacity(config.aggregators.len());
        let mut offset = 0;
        for factory in &config.aggregators {
            let size = factory.max_intermediate_size();
            let aggregator = factory.factorize_buffered(&selectors)?;
            bindings.push(AggregatorBinding {
                name: Arc::from(factory.name()),
                type_name: Arc::from(factory.type_name()),
                offset,
                size,
                aggregator,
                lock: Mutex::new(()),
            });
            offset += size;
        }
        debug_assert_eq!(offset, row_stride);

        let dictionary_backend = config.dictionary_backend;
        Ok(Self {
            config,
            row_stride,
            arena,
            holder: Mutex::new(holder),
            fact_map: FactMap::new(),
            registry: DimensionRegistry::new(dictionary_backend),
            bindings,
            transformers,
            insertion_state: Mutex::new(0),
            metrics,
            closed: AtomicBool::new(false),
        })
    }

    /// Ingests `row`, returning the post-insert row count.
    ///
    /// # Errors
    /// [`IndexError::BelowMinTimestamp`] if `row`'s timestamp is earlier
    /// than `min_timestamp`; [`IndexError::ArenaFull`] if no slot is
    /// available. [`IndexError::TransformerYieldedNull`] is fatal: a
    /// configured transformer declined to produce a row.
    pub fn add(&self, row: Box<dyn InputRow>) -> IndexResult<usize> {
        let _timer = self.metrics.ingest_duration.start_timer();

        let row = apply_chain(&self.transformers, row).ok_or(IndexError::TransformerYieldedNull)?;

        let timestamp = row.timestamp();
        if timestamp < self.config.min_timestamp {
            self.metrics
                .rows_rejected
                .with_label_values(&["below_min_timestamp"])
                .inc();
            warn!(
                row_timestamp = timestamp,
                min_timestamp = self.config.min_timestamp,
                "rejecting row below min_timestamp"
            );
            return Err(IndexError::BelowMinTimestamp {
                row_timestamp: timestamp,
                min_timestamp: self.config.min_timestamp,
            });
        }
        let truncated = self
            .config
            .granularity
            .truncate(timestamp)
            .max(self.config.min_timestamp);

        let dims = self.resolve_dimensions(row.as_ref());
        let key = TimeAndDims::new(truncated, dims);

        let offset = match self.reserve_slot(key) {
            Ok(offset) => offset,
            Err(e) => {
                self.metrics
                    .rows_rejected
                    .with_label_values(&["arena_full"])
                    .inc();
                warn!(error = %e, "row rejected, arena is full");
                return Err(e);
            }
        };

        for binding in &self.bindings {
            let _guard = binding.lock.lock();
            let region = self.arena.slice_at(offset + binding.offset, binding.size)?;
            binding.aggregator.aggregate(region, row.as_ref());
        }

        self.metrics.rows_ingested.inc();
        self.metrics
            .arena_bytes_used
            .set((*self.insertion_state.lock() * self.row_stride) as i64);
        Ok(self.size())
    }

    /// Dimension resolution: §4.6 step 2–3. Lowercases dimension names and
    /// per-dim values, creating dictionaries and registry positions for
    /// dimensions seen for the first time.
    fn resolve_dimensions(&self, row: &dyn InputRow) -> Vec<Option<DimValues>> {
        self.registry.with_discovery_lock(|registry| {
            let mut tuple: Vec<Option<DimValues>> = vec![None; registry.len()];
            for raw_name in row.dimensions() {
                let name = raw_name.to_lowercase();
                let raw_values = row.dimension_values(raw_name);

                let position = match registry.position_of(&name) {
                    Some(position) => {
                        registry.observe(position, raw_values.len());
                        position
                    }
                    None => registry.append(&name, ValueKind::Str, raw_values.len()),
                };

                if position >= tuple.len() {
                    tuple.resize(position + 1, None);
                }

                let dictionary = registry
                    .dictionary_at(position)
                    .expect("dictionary created alongside registry position");
                tuple[position] = Some(normalize_values(&dictionary, raw_values));
            }
            tuple
        })
    }

    /// Slot reservation: §4.6 step 5. Returns the offset that now owns
    /// `key`, creating one if `key` is new.
    fn reserve_slot(&self, key: TimeAndDims) -> IndexResult<usize> {
        let mut num_entries = self.insertion_state.lock();
        let tentative = *num_entries * self.row_stride;

        let assigned = self.fact_map.put_if_absent(key.clone(), tentative);
        if assigned != tentative {
            // First-writer-wins: another insertion already owns this key.
            return Ok(assigned);
        }

        if tentative + self.row_stride > self.arena.capacity() {
            self.fact_map.remove(&key);
            return Err(IndexError::ArenaFull {
                offset: tentative,
                stride: self.row_stride,
                capacity: self.arena.capacity(),
            });
        }

        *num_entries += 1;
        for binding in &self.bindings {
            let region = self.arena.slice_at(tentative + binding.offset, binding.size)?;
            binding.aggregator.init(region);
        }
        Ok(tentative)
    }

    pub fn size(&self) -> usize {
        self.fact_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fact_map.is_empty()
    }

    pub fn min_time(&self) -> Option<i64> {
        self.fact_map.first_key().map(|k| k.timestamp)
    }

    pub fn max_time(&self) -> Option<i64> {
        self.fact_map.last_key().map(|k| k.timestamp)
    }

    /// Half-open `[min, granularity.next(max))`. Degenerates to
    /// `[min_timestamp, min_timestamp)` when empty.
    pub fn interval(&self) -> (i64, i64) {
        match (self.min_time(), self.max_time()) {
            (Some(min), Some(max)) => (min, self.config.granularity.next(max)),
            _ => (self.config.min_timestamp, self.config.min_timestamp),
        }
    }

    pub fn dimensions(&self) -> Vec<Arc<str>> {
        self.registry.names()
    }

    pub fn metric_names(&self) -> Vec<Arc<str>> {
        self.bindings.iter().map(|b| b.name.clone()).collect()
    }

    pub fn metric_type(&self, name: &str) -> Option<Arc<str>> {
        self.bindings
            .iter()
            .find(|b| b.name.as_ref() == name)
            .map(|b| b.type_name.clone())
    }

    pub fn metric_index(&self, name: &str) -> Option<usize> {
        self.bindings.iter().position(|b| b.name.as_ref() == name)
    }

    pub fn capabilities(&self, column: &str) -> Option<crate::registry::ColumnCapabilities> {
        let position = self.registry.position_of(column)?;
        self.registry.capabilities_at(position)
    }

    pub fn facts(&self) -> Vec<(TimeAndDims, usize)> {
        self.fact_map.entries()
    }

    pub fn sub_map(&self, lo: Bound<TimeAndDims>, hi: Bound<TimeAndDims>) -> Vec<(TimeAndDims, usize)> {
        self.fact_map.sub_map(lo, hi)
    }

    pub fn iterator(&self) -> Vec<MaterializedRow> {
        self.iterator_with_post_aggs(&[])
    }

    /// Materializes every fact-map entry in key order (§4.8), applying
    /// `post_aggs` in declared order after each row's dimensions and
    /// aggregator results are in place. Never mutates aggregator state.
    pub fn iterator_with_post_aggs(
        &self,
        post_aggs: &[Arc<dyn PostAggregator>],
    ) -> Vec<MaterializedRow> {
        self.fact_map
            .entries()
            .into_iter()
            .map(|(key, offset)| self.materialize(&key, offset, post_aggs))
            .collect()
    }

    fn materialize(
        &self,
        key: &TimeAndDims,
        offset: usize,
        post_aggs: &[Arc<dyn PostAggregator>],
    ) -> MaterializedRow {
        let mut columns = Vec::new();
        for (position, values) in key.dims.iter().enumerate() {
            let Some(values) = values else { continue };
            let name = self
                .registry
                .name_at(position)
                .expect("dim position named in key must exist in registry");
            let value = if values.len() == 1 {
                MaterializedValue::Single(values[0].clone())
            } else {
                MaterializedValue::Multi(values.iter().cloned().collect())
            };
            columns.push((name, value));
        }

        for binding in &self.bindings {
            // Shared read, not `slice_at`'s `&mut`: a concurrent `add` may be
            // merging into this very slot right now, holding only
            // `binding.lock` around its own `&mut` (see `add`/`reserve_slot`
            // above). Minting a second `&mut` here would alias it.
            let region = self
                .arena
                .slice_ref(offset + binding.offset, binding.size)
                .expect("slot for a key present in the fact map must be within the arena");
            columns.push((
                binding.name.clone(),
                MaterializedValue::Aggregated(binding.aggregator.get(region)),
            ));
        }

        let mut row = MaterializedRow {
            timestamp: key.timestamp,
            columns,
        };
        for post_agg in post_aggs {
            let value = post_agg.compute(&row);
            row.columns.push((Arc::from(post_agg.name()), value));
        }
        row
    }

    /// Releases the arena and tears down the aggregator bindings. Safe to
    /// call on an empty index; safe to call more than once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(rows = self.size(), "closing incremental index");
        for binding in &self.bindings {
            binding.aggregator.close();
        }
        self.holder.lock().close();
    }
}

/// Interns every raw value through `dictionary`, then sorts ascending,
/// preserving duplicates (§4.4).
fn normalize_values(dictionary: &DimensionDictionary, raw_values: &[String]) -> DimValues {
    let mut values: DimValues = raw_values
        .iter()
        .map(|v| {
            let id = dictionary.add_if_absent(v);
            dictionary
                .value_of(id)
                .expect("value_of must succeed immediately after add_if_absent")
        })
        .collect();
    values.sort_unstable();
    values
}
