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

//! The concurrent, sorted key → slot-offset index.
//!
//! Modeled directly on this crate's in-memory state store
//! (`crate::memory::MemoryStateStore`'s `Arc<RwLock<BTreeMap<_, _>>>`):
//! a single `RwLock`-guarded `BTreeMap` gives us a total order for cheap,
//! plus reads that don't block each other. Writers only ever take the
//! write lock for the short `put_if_absent`/`remove` operations the
//! ingestion path needs; nothing here blocks on I/O.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::key::TimeAndDims;

/// Concurrent, sorted `TimeAndDims -> row slot offset` mapping.
///
/// First-writer-wins: [`FactMap::put_if_absent`] never overwrites an
/// existing offset for an equal key, so a second ingestion of the same key
/// observes (and aggregates into) the original slot.
#[derive(Clone)]
pub struct FactMap {
    inner: Arc<RwLock<BTreeMap<TimeAndDims, usize>>>,
}

impl Default for FactMap {
    fn default() -> Self {
        Self::new()
    }
}

impl FactMap {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts `offset` for `key` if absent. Returns the offset that now
    /// maps to `key`: `offset` itself if this call won, or the
    /// previously-stored offset if another writer got there first.
    pub fn put_if_absent(&self, key: TimeAndDims, offset: usize) -> usize {
        *self.inner.write().entry(key).or_insert(offset)
    }

    /// Removes `key`. Used to roll back a tentative insertion that turned
    /// out to overflow the arena.
    pub fn remove(&self, key: &TimeAndDims) {
        self.inner.write().remove(key);
    }

    pub fn first_key(&self) -> Option<TimeAndDims> {
        self.inner.read().keys().next().cloned()
    }

    pub fn last_key(&self) -> Option<TimeAndDims> {
        self.inner.read().keys().next_back().cloned()
    }

    /// Snapshots the entries whose keys fall in `lo..hi` (inclusive lower
    /// bound, exclusive upper bound) in key order.
    ///
    /// Like `crate::memory::batched_iter`, this copies out a batch rather
    /// than returning a guard-tied iterator: it trades a point-in-time
    /// snapshot for never holding the lock across caller-controlled work.
    pub fn sub_map(&self, lo: Bound<TimeAndDims>, hi: Bound<TimeAndDims>) -> Vec<(TimeAndDims, usize)> {
        self.inner
            .read()
            .range((lo, hi))
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Snapshots every entry in key order.
    pub fn entries(&self) -> Vec<(TimeAndDims, usize)> {
        self.inner
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }
}
