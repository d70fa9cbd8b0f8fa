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

use thiserror::Error;

pub type IndexResult<T> = std::result::Result<T, IndexError>;

/// Errors raised by [`crate::index::IncrementalIndex`].
///
/// `BelowMinTimestamp`, `ArenaFull` and `NotSorted` are row- or call-level
/// rejections: the index is left in a fully usable state and the caller may
/// retry with a different input. The remaining variants indicate an
/// invariant of the index was violated by its caller or its schema and are
/// fatal: the index must not be used afterwards.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("row timestamp {row_timestamp} is below min_timestamp {min_timestamp}")]
    BelowMinTimestamp {
        row_timestamp: i64,
        min_timestamp: i64,
    },

    #[error(
        "arena full: slot at offset {offset} + stride {stride} exceeds capacity {capacity}"
    )]
    ArenaFull {
        offset: usize,
        stride: usize,
        capacity: usize,
    },

    #[error("no complex metric serde registered for type {type_name:?}")]
    UnknownType { type_name: String },

    #[error("dictionary for dimension {dimension:?} was created more than once")]
    DuplicateDimension { dimension: String },

    #[error("sorted_rank/sorted_value called before sort() on this dictionary")]
    NotSorted,

    #[error("row transformer yielded no row")]
    TransformerYieldedNull,

    #[error("I/O failure while closing index: {0}")]
    IoFailure(#[from] std::io::Error),
}

impl IndexError {
    /// Row-level rejections leave the index usable; invariant violations do not.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IndexError::UnknownType { .. }
                | IndexError::DuplicateDimension { .. }
                | IndexError::TransformerYieldedNull
        )
    }
}
