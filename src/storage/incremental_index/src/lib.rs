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

//! An incremental, in-memory, column-oriented aggregation index.
//!
//! Rows are folded into a sorted map keyed on `(truncated timestamp,
//! per-dimension value tuple)`: a row whose key already exists merges into
//! that key's slot via the configured [`aggregator::BufferAggregator`]s
//! instead of allocating a new one. Dimension names and values are
//! discovered dynamically as rows are ingested (see [`registry`] and
//! [`dictionary`]); aggregator intermediate state lives in fixed-size
//! regions of a single preallocated [`arena::ByteArena`] rather than in
//! per-row heap objects, trading a hard capacity limit for predictable
//! memory use.
//!
//! The moving parts:
//! - [`key`] / [`fact_map`]: the composite key and the concurrent ordered
//!   map from key to slot offset.
//! - [`arena`]: the fixed-capacity byte region slots are carved out of.
//! - [`registry`] / [`dictionary`]: dynamic dimension discovery and
//!   per-dimension string interning.
//! - [`aggregator`] / [`row`]: the contracts a host supplies — this crate
//!   consumes `InputRow`s and `BufferAggregator`s, it does not implement
//!   either.
//! - [`index`]: [`index::IncrementalIndex`], tying the above together.
//! - [`config`]: construction-time parameters.
//! - [`metrics`]: `prometheus` series tracking ingestion.
//! - [`iter`]: read-side materialization and post-aggregation.
//! - [`error`]: the crate's error taxonomy.

pub mod aggregator;
pub mod arena;
pub mod config;
pub mod dictionary;
pub mod error;
pub mod fact_map;
pub mod index;
pub mod iter;
pub mod key;
pub mod metrics;
pub mod registry;
pub mod row;

pub use aggregator::{AggregatedValue, AggregatorFactory, BufferAggregator};
pub use config::{IndexConfig, IndexConfigBuilder};
pub use error::{IndexError, IndexResult};
pub use index::IncrementalIndex;
pub use iter::{MaterializedRow, MaterializedValue};
pub use row::{InputRow, RowTransformer};
