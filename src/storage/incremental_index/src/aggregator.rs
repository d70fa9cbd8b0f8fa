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

//! The aggregator contract this crate consumes but does not implement
//! (§1, §6): buffer aggregators, their factories, the complex-metric serde
//! registry, and the column selectors an aggregator uses to read "the
//! current row".
//!
//! The source threaded the current row through a thread-scoped slot that
//! selectors were constructed once (at factory time) to poll. This crate
//! instead passes the row explicitly into [`BufferAggregator::aggregate`]
//! and the selector accessors — the strategy the spec's own design notes
//! call out as preferable when not constrained by a pre-existing selector
//! interface. It gives the identical guarantee (a thread's aggregate call
//! only ever sees that thread's own row) without a thread-local or any
//! unsafe code; see `DESIGN.md`.

use std::any::Any;
use std::sync::Arc;

use crate::error::{IndexError, IndexResult};
use crate::row::InputRow;

/// The materialized result of a [`BufferAggregator`], returned by `get`.
#[derive(Debug, Clone)]
pub enum AggregatedValue {
    Long(i64),
    Float(f64),
    Str(String),
    /// A type-erased complex aggregation result (e.g. a sketch).
    Complex(Arc<dyn Any + Send + Sync>),
}

/// An aggregator whose intermediate state lives in a caller-supplied byte
/// region rather than in `self`. `init`/`aggregate`/`get` all operate on
/// the `buf` passed in, which is always exactly
/// [`AggregatorFactory::max_intermediate_size`] bytes — the region the
/// arena reserved for this aggregator within a row's slot.
pub trait BufferAggregator: Send + Sync {
    /// Initializes a freshly-reserved region. Called exactly once per slot,
    /// before the first `aggregate`.
    fn init(&self, buf: &mut [u8]);

    /// Folds `row` into the state held in `buf`.
    fn aggregate(&self, buf: &mut [u8], row: &dyn InputRow);

    /// Reads the current result without mutating `buf`.
    fn get(&self, buf: &[u8]) -> AggregatedValue;

    /// Releases any resources external to `buf` held by this aggregator.
    /// Most aggregators hold none and can use the default no-op.
    fn close(&self) {}
}

/// A selector bound to a particular aggregator at factory time, used to
/// read the current row's timestamp.
pub trait TimestampSelector: Send + Sync {
    fn get(&self, row: &dyn InputRow) -> i64 {
        row.timestamp()
    }
}

/// A selector bound to a named metric column, reading its float value.
pub trait FloatColumnSelector: Send + Sync {
    fn get_float(&self, row: &dyn InputRow) -> Option<f64>;
}

/// A selector bound to a named column, reading its raw or
/// complex-deserialized value.
pub trait ObjectColumnSelector: Send + Sync {
    fn get_object(&self, row: &dyn InputRow) -> Option<Arc<dyn Any + Send + Sync>>;
}

/// A selector bound to a named dimension, giving a lazy, row-local indexed
/// view over the row's values for that dimension. Cardinality (the number
/// of distinct values ever seen for the dimension) is explicitly
/// unsupported here, matching §4.7.
pub trait DimensionSelector: Send + Sync {
    /// Number of values this row contributes to the bound dimension.
    fn row_size(&self, row: &dyn InputRow) -> usize;

    /// The string value at `row_local_id` (0-based, row-local — not a
    /// dictionary id), or `None` if out of range.
    fn lookup_name(&self, row: &dyn InputRow, row_local_id: usize) -> Option<String>;

    /// The row-local id of `name` within this row's values for the bound
    /// dimension, or `None` if `name` does not occur in this row.
    fn lookup_id(&self, row: &dyn InputRow, name: &str) -> Option<usize>;
}

/// Produces the column-view selectors an [`AggregatorFactory`] binds at
/// construction time. A single implementation (below) serves every
/// aggregator; it is generic over column name, not over row shape.
pub trait ColumnSelectorFactory: Send + Sync {
    fn make_timestamp_selector(&self) -> Box<dyn TimestampSelector>;
    fn make_float_selector(&self, column: &str) -> Box<dyn FloatColumnSelector>;
    fn make_object_selector(&self, column: &str) -> Box<dyn ObjectColumnSelector>;
    fn make_dimension_selector(&self, dimension: &str) -> Box<dyn DimensionSelector>;

    /// Builds an object selector for an aggregator whose declared type is
    /// not float/double/long, consulting the complex-metric serde registry
    /// (§4.7). Declared on the trait (not just the concrete
    /// [`RowColumnSelectorFactory`]) so that `AggregatorFactory::factorize_buffered`
    /// implementations, which only ever see `&dyn ColumnSelectorFactory`,
    /// can reach it.
    ///
    /// # Errors
    /// [`IndexError::UnknownType`] if `type_name` has no registered serde.
    fn make_complex_object_selector(
        &self,
        column: &str,
        type_name: &str,
    ) -> IndexResult<Box<dyn ObjectColumnSelector>>;
}

/// Describes an aggregator slot: its name, declared type, byte footprint,
/// and how to build the bound [`BufferAggregator`].
pub trait AggregatorFactory: Send + Sync {
    /// Lowercased aggregator name, used as the materialized row's field
    /// name during iteration.
    fn name(&self) -> &str;

    /// The aggregator's declared type, e.g. `"longSum"`, `"hyperUnique"`.
    /// Used to resolve a [`ComplexMetricSerde`] when the type is not
    /// `"float"`/`"double"`/`"long"`.
    fn type_name(&self) -> &str;

    /// The fixed number of bytes this aggregator occupies within a slot.
    fn max_intermediate_size(&self) -> usize;

    /// Builds a [`BufferAggregator`] bound to column views produced by
    /// `selectors`. Column resolution (and any [`ComplexMetricSerde`]
    /// lookup for non-float types) happens here, fail-fast: see
    /// [`IndexError::UnknownType`].
    fn factorize_buffered(
        &self,
        selectors: &dyn ColumnSelectorFactory,
    ) -> IndexResult<Box<dyn BufferAggregator>>;
}

/// Extracts a typed value for a non-float complex metric column out of a
/// row. Implementations are registered by type name in a
/// [`ComplexMetricSerdeRegistry`].
pub trait ComplexMetricSerde: Send + Sync {
    fn extract(&self, row: &dyn InputRow, column: &str) -> Option<Arc<dyn Any + Send + Sync>>;
}

/// Looks up a [`ComplexMetricSerde`] by declared aggregator type name.
#[derive(Clone, Default)]
pub struct ComplexMetricSerdeRegistry {
    serdes: std::sync::Arc<parking_lot::RwLock<hashbrown::HashMap<String, Arc<dyn ComplexMetricSerde>>>>,
}

impl ComplexMetricSerdeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, type_name: impl Into<String>, serde: Arc<dyn ComplexMetricSerde>) {
        self.serdes.write().insert(type_name.into(), serde);
    }

    /// # Errors
    /// [`IndexError::UnknownType`] if no serde is registered for
    /// `type_name`. Callers are expected to call this at aggregator-binding
    /// construction time (fail-fast, §7).
    pub fn serde_for(&self, type_name: &str) -> IndexResult<Arc<dyn ComplexMetricSerde>> {
        self.serdes
            .read()
            .get(type_name)
            .cloned()
            .ok_or_else(|| IndexError::UnknownType {
                type_name: type_name.to_string(),
            })
    }
}

/// Floor/ceiling operations over epoch-millisecond timestamps, bucketing
/// rows into truncated-timestamp keys.
pub trait QueryGranularity: Send + Sync {
    fn truncate(&self, millis: i64) -> i64;
    fn next(&self, millis: i64) -> i64;
}

/// A fixed-width bucket granularity (e.g. "1 minute" = `DurationGranularity
/// { bucket_millis: 60_000 }`), the common case for the index's ingestion
/// path.
#[derive(Debug, Clone, Copy)]
pub struct DurationGranularity {
    pub bucket_millis: i64,
}

impl QueryGranularity for DurationGranularity {
    fn truncate(&self, millis: i64) -> i64 {
        millis.div_euclid(self.bucket_millis) * self.bucket_millis
    }

    fn next(&self, millis: i64) -> i64 {
        self.truncate(millis) + self.bucket_millis
    }
}

/// The coarsest granularity: every timestamp truncates to `floor` and
/// `next` is unreachable in practice (there is only ever one bucket).
#[derive(Debug, Clone, Copy)]
pub struct AllGranularity {
    pub floor: i64,
}

impl QueryGranularity for AllGranularity {
    fn truncate(&self, _millis: i64) -> i64 {
        self.floor
    }

    fn next(&self, _millis: i64) -> i64 {
        i64::MAX
    }
}

/// The default [`ColumnSelectorFactory`]: reads columns straight off the
/// [`InputRow`] by name, consulting `serdes` for non-float complex types.
pub struct RowColumnSelectorFactory {
    serdes: ComplexMetricSerdeRegistry,
}

impl RowColumnSelectorFactory {
    pub fn new(serdes: ComplexMetricSerdeRegistry) -> Self {
        Self { serdes }
    }
}

struct SimpleTimestampSelector;
impl TimestampSelector for SimpleTimestampSelector {}

struct NamedFloatSelector {
    column: String,
}
impl FloatColumnSelector for NamedFloatSelector {
    fn get_float(&self, row: &dyn InputRow) -> Option<f64> {
        row.float_metric(&self.column)
    }
}

struct RawObjectSelector {
    column: String,
}
impl ObjectColumnSelector for RawObjectSelector {
    fn get_object(&self, row: &dyn InputRow) -> Option<Arc<dyn Any + Send + Sync>> {
        // Callers needing a typed complex result should register a
        // `ComplexMetricSerde` instead of relying on this default, which
        // only exposes the presence of raw bytes, not their content.
        row.raw_value(&self.column)
            .map(|bytes| -> Arc<dyn Any + Send + Sync> { Arc::new(bytes) })
    }
}

struct SerdeObjectSelector {
    column: String,
    serde: Arc<dyn ComplexMetricSerde>,
}
impl ObjectColumnSelector for SerdeObjectSelector {
    fn get_object(&self, row: &dyn InputRow) -> Option<Arc<dyn Any + Send + Sync>> {
        self.serde.extract(row, &self.column)
    }
}

struct NamedDimensionSelector {
    dimension: String,
}
impl DimensionSelector for NamedDimensionSelector {
    fn row_size(&self, row: &dyn InputRow) -> usize {
        row.dimension_values(&self.dimension).len()
    }

    fn lookup_name(&self, row: &dyn InputRow, row_local_id: usize) -> Option<String> {
        row.dimension_values(&self.dimension)
            .get(row_local_id)
            .cloned()
    }

    fn lookup_id(&self, row: &dyn InputRow, name: &str) -> Option<usize> {
        row.dimension_values(&self.dimension)
            .iter()
            .position(|v| v == name)
    }
}

impl ColumnSelectorFactory for RowColumnSelectorFactory {
    fn make_timestamp_selector(&self) -> Box<dyn TimestampSelector> {
        Box::new(SimpleTimestampSelector)
    }

    fn make_float_selector(&self, column: &str) -> Box<dyn FloatColumnSelector> {
        Box::new(NamedFloatSelector {
            column: column.to_string(),
        })
    }

    fn make_object_selector(&self, column: &str) -> Box<dyn ObjectColumnSelector> {
        Box::new(RawObjectSelector {
            column: column.to_string(),
        })
    }

    fn make_dimension_selector(&self, dimension: &str) -> Box<dyn DimensionSelector> {
        Box::new(NamedDimensionSelector {
            dimension: dimension.to_string(),
        })
    }

    fn make_complex_object_selector(
        &self,
        column: &str,
        type_name: &str,
    ) -> IndexResult<Box<dyn ObjectColumnSelector>> {
        let serde = self.serdes.serde_for(type_name)?;
        Ok(Box::new(SerdeObjectSelector {
            column: column.to_string(),
            serde,
        }))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A minimal `longSum`-style aggregator used by the crate's own tests.
    //! Aggregator *implementations* are out of scope for this crate (§1);
    //! this exists only as a concrete fixture.

    use super::*;

    pub struct CountAggregator;

    impl CountAggregator {
        pub fn factory() -> CountAggregatorFactory {
            CountAggregatorFactory
        }
    }

    pub struct CountAggregatorFactory;

    impl AggregatorFactory for CountAggregatorFactory {
        fn name(&self) -> &str {
            "count"
        }

        fn type_name(&self) -> &str {
            "long"
        }

        fn max_intermediate_size(&self) -> usize {
            8
        }

        fn factorize_buffered(
            &self,
            selectors: &dyn ColumnSelectorFactory,
        ) -> IndexResult<Box<dyn BufferAggregator>> {
            let _ = selectors.make_timestamp_selector();
            Ok(Box::new(CountBufferAggregator))
        }
    }

    pub struct CountBufferAggregator;

    impl BufferAggregator for CountBufferAggregator {
        fn init(&self, buf: &mut [u8]) {
            buf.copy_from_slice(&0i64.to_le_bytes());
        }

        fn aggregate(&self, buf: &mut [u8], _row: &dyn InputRow) {
            let current = i64::from_le_bytes(buf.try_into().unwrap());
            buf.copy_from_slice(&(current + 1).to_le_bytes());
        }

        fn get(&self, buf: &[u8]) -> AggregatedValue {
            AggregatedValue::Long(i64::from_le_bytes(buf.try_into().unwrap()))
        }
    }

    pub struct LongSumAggregatorFactory {
        pub metric: String,
    }

    impl AggregatorFactory for LongSumAggregatorFactory {
        fn name(&self) -> &str {
            &self.metric
        }

        fn type_name(&self) -> &str {
            "long"
        }

        fn max_intermediate_size(&self) -> usize {
            8
        }

        fn factorize_buffered(
            &self,
            selectors: &dyn ColumnSelectorFactory,
        ) -> IndexResult<Box<dyn BufferAggregator>> {
            let float_selector = selectors.make_float_selector(&self.metric);
            Ok(Box::new(LongSumBufferAggregator { float_selector }))
        }
    }

    pub struct LongSumBufferAggregator {
        float_selector: Box<dyn FloatColumnSelector>,
    }

    impl BufferAggregator for LongSumBufferAggregator {
        fn init(&self, buf: &mut [u8]) {
            buf.copy_from_slice(&0i64.to_le_bytes());
        }

        fn aggregate(&self, buf: &mut [u8], row: &dyn InputRow) {
            let delta = self.float_selector.get_float(row).unwrap_or(0.0) as i64;
            let current = i64::from_le_bytes(buf.try_into().unwrap());
            buf.copy_from_slice(&(current + delta).to_le_bytes());
        }

        fn get(&self, buf: &[u8]) -> AggregatedValue {
            AggregatedValue::Long(i64::from_le_bytes(buf.try_into().unwrap()))
        }
    }

    /// A fixture aggregator declaring a non-float complex type, exercising
    /// the §4.7 serde-consulting path through `&dyn ColumnSelectorFactory`
    /// rather than the concrete `RowColumnSelectorFactory`.
    pub struct ComplexAggregatorFactory {
        pub metric: String,
        pub type_name: String,
    }

    impl AggregatorFactory for ComplexAggregatorFactory {
        fn name(&self) -> &str {
            &self.metric
        }

        fn type_name(&self) -> &str {
            &self.type_name
        }

        fn max_intermediate_size(&self) -> usize {
            8
        }

        fn factorize_buffered(
            &self,
            selectors: &dyn ColumnSelectorFactory,
        ) -> IndexResult<Box<dyn BufferAggregator>> {
            let object_selector =
                selectors.make_complex_object_selector(&self.metric, &self.type_name)?;
            Ok(Box::new(ComplexBufferAggregator { object_selector }))
        }
    }

    pub struct ComplexBufferAggregator {
        object_selector: Box<dyn ObjectColumnSelector>,
    }

    impl BufferAggregator for ComplexBufferAggregator {
        fn init(&self, buf: &mut [u8]) {
            buf.copy_from_slice(&0i64.to_le_bytes());
        }

        fn aggregate(&self, buf: &mut [u8], row: &dyn InputRow) {
            if self.object_selector.get_object(row).is_some() {
                let current = i64::from_le_bytes(buf.try_into().unwrap());
                buf.copy_from_slice(&(current + 1).to_le_bytes());
            }
        }

        fn get(&self, buf: &[u8]) -> AggregatedValue {
            AggregatedValue::Long(i64::from_le_bytes(buf.try_into().unwrap()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::row::testing::MapRow;

    #[test]
    fn unknown_complex_type_is_reported() {
        let registry = ComplexMetricSerdeRegistry::new();
        let err = registry.serde_for("hyperUnique").unwrap_err();
        assert!(matches!(err, IndexError::UnknownType { .. }));
    }

    struct FixedSerde;
    impl ComplexMetricSerde for FixedSerde {
        fn extract(&self, _row: &dyn InputRow, _column: &str) -> Option<Arc<dyn Any + Send + Sync>> {
            Some(Arc::new(1u8))
        }
    }

    /// The serde-consulting selector is reachable through
    /// `&dyn ColumnSelectorFactory`, the only handle an `AggregatorFactory`
    /// implementation ever receives (§4.7).
    #[test]
    fn complex_object_selector_is_reachable_through_the_trait_object() {
        let serdes = ComplexMetricSerdeRegistry::new();
        serdes.register("hyperUnique", Arc::new(FixedSerde));
        let selectors: Box<dyn ColumnSelectorFactory> =
            Box::new(RowColumnSelectorFactory::new(serdes));
        let aggregator = ComplexAggregatorFactory {
            metric: "sketch".to_string(),
            type_name: "hyperUnique".to_string(),
        }
        .factorize_buffered(selectors.as_ref())
        .unwrap();
        let mut buf = [0u8; 8];
        aggregator.init(&mut buf);
        aggregator.aggregate(&mut buf, &MapRow::new(0));
        assert!(matches!(aggregator.get(&buf), AggregatedValue::Long(1)));
    }

    /// No serde registered for the declared complex type: `factorize_buffered`
    /// fails fast with `UnknownType` (§7), reachable the same way a host
    /// aggregator would hit it.
    #[test]
    fn factorize_buffered_fails_fast_on_unregistered_complex_type() {
        let selectors: Box<dyn ColumnSelectorFactory> =
            Box::new(RowColumnSelectorFactory::new(ComplexMetricSerdeRegistry::new()));
        let err = ComplexAggregatorFactory {
            metric: "sketch".to_string(),
            type_name: "hyperUnique".to_string(),
        }
        .factorize_buffered(selectors.as_ref())
        .unwrap_err();
        assert!(matches!(err, IndexError::UnknownType { .. }));
    }

    #[test]
    fn duration_granularity_truncates_down() {
        let g = DurationGranularity { bucket_millis: 60_000 };
        assert_eq!(g.truncate(61_000), 60_000);
        assert_eq!(g.truncate(119_000), 60_000);
        assert_eq!(g.next(61_000), 120_000);
    }

    #[test]
    fn count_aggregator_accumulates_across_calls() {
        let selectors = RowColumnSelectorFactory::new(ComplexMetricSerdeRegistry::new());
        let aggregator = CountAggregator::factory()
            .factorize_buffered(&selectors)
            .unwrap();
        let mut buf = [0u8; 8];
        aggregator.init(&mut buf);
        let row = MapRow::new(0);
        aggregator.aggregate(&mut buf, &row);
        aggregator.aggregate(&mut buf, &row);
        assert!(matches!(aggregator.get(&buf), AggregatedValue::Long(2)));
    }
}
