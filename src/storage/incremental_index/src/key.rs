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

//! The composite key that identifies a merged row: a truncated timestamp
//! plus a per-dimension tuple of sorted, canonical values.

use smallvec::SmallVec;

/// A single dimension's contribution to a [`TimeAndDims`] key: either
/// absent (the row never named this dimension) or a non-empty, ascending
/// tuple of canonical values.
///
/// `SmallVec<[_; 1]>` avoids a heap allocation for the overwhelmingly
/// common single-value case while still supporting multi-valued
/// dimensions.
pub type DimValues = SmallVec<[std::sync::Arc<str>; 1]>;

/// `(truncated timestamp, per-dimension value tuple)`.
///
/// Ordering is lexicographic: first by timestamp, then position-by-position
/// over the dimension tuple (a tuple that runs out first is treated as
/// absent from there on, which always sorts before a present value — so a
/// shorter tuple that agrees with a longer one on every shared position
/// sorts first). Within one position, an absent value sorts strictly
/// before a present one, and two present multi-values compare by
/// `(length, then elementwise string compare)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeAndDims {
    pub timestamp: i64,
    /// Index-aligned with the dimension registry at the time of
    /// insertion; shorter than the registry's current length is normal
    /// (later-discovered dimensions are conceptually absent here).
    pub dims: Vec<Option<DimValues>>,
}

impl TimeAndDims {
    pub fn new(timestamp: i64, dims: Vec<Option<DimValues>>) -> Self {
        Self { timestamp, dims }
    }
}

/// Orders two same-position dimension values, treating absence as strictly
/// smaller and, among present tuples, shorter-then-lexicographic.
fn cmp_dim(a: &Option<DimValues>, b: &Option<DimValues>) -> std::cmp::Ordering {
    use std::cmp::Ordering::*;
    match (a, b) {
        (None, None) => Equal,
        (None, Some(_)) => Less,
        (Some(_), None) => Greater,
        (Some(a), Some(b)) => a
            .len()
            .cmp(&b.len())
            .then_with(|| a.iter().cmp(b.iter())),
    }
}

impl PartialOrd for TimeAndDims {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeAndDims {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering::*;

        self.timestamp.cmp(&other.timestamp).then_with(|| {
            // Two registry-aligned tuples of possibly differing length
            // (the registry grows monotonically, so an older key's tuple
            // may be a strict prefix of a newer one). Compare position by
            // position; a tuple that runs out first is treated the same
            // as having absent values from there on, which is always
            // `Less` than an actually-present value at that position. If
            // every shared position compares equal, the shorter tuple
            // sorts first.
            let mut a = self.dims.iter();
            let mut b = other.dims.iter();
            loop {
                match (a.next(), b.next()) {
                    (None, None) => return Equal,
                    (None, Some(_)) => return Less,
                    (Some(_), None) => return Greater,
                    (Some(x), Some(y)) => {
                        let ord = cmp_dim(x, y);
                        if ord != Equal {
                            return ord;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dv(values: &[&str]) -> Option<DimValues> {
        Some(values.iter().map(|v| std::sync::Arc::from(*v)).collect())
    }

    #[test]
    fn orders_by_timestamp_first() {
        let a = TimeAndDims::new(0, vec![]);
        let b = TimeAndDims::new(1, vec![]);
        assert!(a < b);
    }

    #[test]
    fn absent_sorts_before_present_at_equal_prefix() {
        let a = TimeAndDims::new(0, vec![None]);
        let b = TimeAndDims::new(0, vec![dv(&["x"])]);
        assert!(a < b);
    }

    #[test]
    fn shorter_tuple_sorts_before_longer_at_equal_prefix() {
        let a = TimeAndDims::new(0, vec![dv(&["x"])]);
        let b = TimeAndDims::new(0, vec![dv(&["x", "y"])]);
        assert!(a < b);
    }

    #[test]
    fn equal_keys_compare_equal() {
        let a = TimeAndDims::new(5, vec![dv(&["a", "b"])]);
        let b = TimeAndDims::new(5, vec![dv(&["a", "b"])]);
        assert_eq!(a.cmp(&b), std::cmp::Ordering::Equal);
        assert_eq!(a, b);
    }

    #[test]
    fn multi_value_positions_compare_by_length_before_content() {
        // Within a single dimension's tuple, a 2-element tuple sorts before
        // a 3-element one even if its first element is lexicographically
        // larger ("z" > "a"), because length is compared before content.
        let shorter = TimeAndDims::new(0, vec![dv(&["z", "z"])]);
        let longer = TimeAndDims::new(0, vec![dv(&["a", "a", "a"])]);
        assert!(shorter < longer);
    }

    #[test]
    fn differing_tuple_length_keys_compare_by_length_then_elementwise() {
        // Row1 discovered only dim 'a'; Row2 additionally discovered 'b'.
        let row1 = TimeAndDims::new(0, vec![dv(&["1"])]);
        let row2 = TimeAndDims::new(0, vec![dv(&["1"]), dv(&["2"])]);
        assert_ne!(row1, row2);
        assert!(row1 < row2);
    }
}
