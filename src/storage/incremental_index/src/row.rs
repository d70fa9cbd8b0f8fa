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

//! The row contract this crate consumes but does not implement: parsing an
//! `InputRow` out of whatever wire format a host uses is explicitly out of
//! scope here (§1).

use bytes::Bytes;

/// A single ingested row, as handed to [`crate::index::IncrementalIndex::add`].
///
/// Dimension and metric names are matched case-insensitively; callers are
/// expected to have already lowercased names before they reach the index
/// (the index itself lowercases defensively, see `IncrementalIndex::add`).
pub trait InputRow: Send + Sync {
    /// Epoch milliseconds.
    fn timestamp(&self) -> i64;

    /// Dimension names named by this row, in no particular order.
    fn dimensions(&self) -> &[String];

    /// Raw string values for `dimension`. May be empty (no value) or
    /// contain more than one value (multi-valued dimension).
    fn dimension_values(&self, dimension: &str) -> &[String];

    /// The float value of metric `column`, for aggregators declared as
    /// numeric. `None` if the column is absent from this row.
    fn float_metric(&self, column: &str) -> Option<f64>;

    /// The raw, not-yet-deserialized bytes of `column`, for aggregators
    /// that consume a complex (non-float) type via a registered
    /// [`crate::aggregator::ComplexMetricSerde`].
    fn raw_value(&self, column: &str) -> Option<Bytes>;
}

/// A transformation applied to every row before ingestion (e.g. renaming
/// columns, deriving computed dimensions). Returning `None` is a fatal
/// invariant violation — see [`crate::error::IndexError::TransformerYieldedNull`].
pub trait RowTransformer: Send + Sync {
    fn transform(&self, row: Box<dyn InputRow>) -> Option<Box<dyn InputRow>>;
}

/// The identity transformer, used when a host has no row-level rewriting
/// to apply.
pub struct IdentityTransformer;

impl RowTransformer for IdentityTransformer {
    fn transform(&self, row: Box<dyn InputRow>) -> Option<Box<dyn InputRow>> {
        Some(row)
    }
}

/// Applies a chain of transformers in order, short-circuiting (and
/// propagating the failure) the moment one yields `None`.
pub fn apply_chain(
    chain: &[Box<dyn RowTransformer>],
    mut row: Box<dyn InputRow>,
) -> Option<Box<dyn InputRow>> {
    for transformer in chain {
        row = transformer.transform(row)?;
    }
    Some(row)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A minimal in-memory [`InputRow`] used throughout this crate's tests.
    pub struct MapRow {
        pub timestamp: i64,
        pub dims: Vec<String>,
        pub dim_values: std::collections::HashMap<String, Vec<String>>,
        pub floats: std::collections::HashMap<String, f64>,
    }

    impl MapRow {
        pub fn new(timestamp: i64) -> Self {
            Self {
                timestamp,
                dims: Vec::new(),
                dim_values: std::collections::HashMap::new(),
                floats: std::collections::HashMap::new(),
            }
        }

        pub fn with_dim(mut self, name: &str, values: &[&str]) -> Self {
            self.dims.push(name.to_string());
            self.dim_values.insert(
                name.to_string(),
                values.iter().map(|v| v.to_string()).collect(),
            );
            self
        }

        pub fn with_metric(mut self, name: &str, value: f64) -> Self {
            self.floats.insert(name.to_string(), value);
            self
        }
    }

    impl InputRow for MapRow {
        fn timestamp(&self) -> i64 {
            self.timestamp
        }

        fn dimensions(&self) -> &[String] {
            &self.dims
        }

        fn dimension_values(&self, dimension: &str) -> &[String] {
            self.dim_values
                .get(dimension)
                .map(|v| v.as_slice())
                .unwrap_or(&[])
        }

        fn float_metric(&self, column: &str) -> Option<f64> {
            self.floats.get(column).copied()
        }

        fn raw_value(&self, _column: &str) -> Option<Bytes> {
            None
        }
    }
}
