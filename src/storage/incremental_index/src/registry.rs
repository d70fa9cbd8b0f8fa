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

//! The ordered set of discovered dimension names, plus per-column
//! capability flags. Append-only: a dimension's position, once assigned,
//! never changes for the life of the index.

use parking_lot::{Mutex, RwLock};

use crate::dictionary::{DictionaryBackend, DimensionDictionary};

/// Declared value kind of a column. Every dimension starts as `Str` the
/// first time it is sighted; the index never reclassifies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Str,
    Float,
    Complex,
}

/// Mutable capability flags for a single column, updated during ingestion.
#[derive(Debug, Clone, Copy)]
pub struct ColumnCapabilities {
    pub kind: ValueKind,
    has_multiple_values: bool,
    is_spatially_indexed: bool,
}

impl ColumnCapabilities {
    fn new(kind: ValueKind) -> Self {
        Self {
            kind,
            has_multiple_values: false,
            is_spatially_indexed: false,
        }
    }

    pub fn has_multiple_values(&self) -> bool {
        self.has_multiple_values
    }

    pub fn is_spatially_indexed(&self) -> bool {
        self.is_spatially_indexed
    }

    /// Monotonic: once set, stays set for the life of the column.
    fn observe_value_count(&mut self, count: usize) {
        if count > 1 {
            self.has_multiple_values = true;
        }
    }
}

struct Entry {
    name: std::sync::Arc<str>,
    dictionary: std::sync::Arc<DimensionDictionary>,
    capabilities: ColumnCapabilities,
}

/// Append-only registry of dimension names discovered during ingestion.
///
/// New names are appended under a single mutex ([`DimensionRegistry::mutex`]
/// below, held by the caller across dictionary creation too) so that a
/// dimension's position and its dictionary come into existence atomically
/// with respect to other discoveries.
pub struct DimensionRegistry {
    backend: DictionaryBackend,
    entries: RwLock<Vec<Entry>>,
    positions: RwLock<hashbrown::HashMap<std::sync::Arc<str>, usize, ahash::RandomState>>,
    /// Held across the "does this dimension exist, and if not create it"
    /// sequence in the ingestion path; see `IncrementalIndex::add`.
    discovery_lock: Mutex<()>,
}

impl DimensionRegistry {
    pub fn new(backend: DictionaryBackend) -> Self {
        Self {
            backend,
            entries: RwLock::new(Vec::new()),
            positions: RwLock::new(hashbrown::HashMap::with_hasher(ahash::RandomState::new())),
            discovery_lock: Mutex::new(()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.positions.read().get(name).copied()
    }

    pub fn name_at(&self, position: usize) -> Option<std::sync::Arc<str>> {
        self.entries.read().get(position).map(|e| e.name.clone())
    }

    pub fn dictionary_at(&self, position: usize) -> Option<std::sync::Arc<DimensionDictionary>> {
        self.entries
            .read()
            .get(position)
            .map(|e| e.dictionary.clone())
    }

    /// Ordered list of every discovered dimension name.
    pub fn names(&self) -> Vec<std::sync::Arc<str>> {
        self.entries.read().iter().map(|e| e.name.clone()).collect()
    }

    pub fn capabilities_at(&self, position: usize) -> Option<ColumnCapabilities> {
        self.entries.read().get(position).map(|e| e.capabilities)
    }

    /// Holds the discovery lock for the duration of `f`, which should
    /// resolve every dimension named on a single row: for already-known
    /// dimensions, call `observe`; for unknown ones, call `append`. Holding
    /// the lock across the whole row keeps a single row's dimension
    /// resolution atomic with respect to concurrent discovery by other
    /// rows.
    pub fn with_discovery_lock<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        let _guard = self.discovery_lock.lock();
        f(self)
    }

    /// Appends a brand-new dimension, lowercased by the caller, creating
    /// its dictionary. Must only be called while holding the discovery
    /// lock (see [`Self::with_discovery_lock`]).
    pub fn append(&self, name: &str, kind: ValueKind, value_count: usize) -> usize {
        let name: std::sync::Arc<str> = std::sync::Arc::from(name);
        let mut capabilities = ColumnCapabilities::new(kind);
        capabilities.observe_value_count(value_count);
        let entry = Entry {
            name: name.clone(),
            dictionary: std::sync::Arc::new(DimensionDictionary::new(self.backend)),
            capabilities,
        };
        let mut entries = self.entries.write();
        let position = entries.len();
        entries.push(entry);
        drop(entries);
        self.positions.write().insert(name, position);
        position
    }

    /// Records that a row contributed `value_count` values to the
    /// dimension at `position`, updating its multi-valued flag
    /// monotonically.
    pub fn observe(&self, position: usize, value_count: usize) {
        if let Some(entry) = self.entries.write().get_mut(position) {
            entry.capabilities.observe_value_count(value_count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_assigns_stable_positions() {
        let registry = DimensionRegistry::new(DictionaryBackend::Retained);
        let a = registry.append("a", ValueKind::Str, 1);
        let b = registry.append("b", ValueKind::Str, 1);
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(registry.position_of("a"), Some(0));
        assert_eq!(registry.position_of("b"), Some(1));
    }

    #[test]
    fn multi_valued_flag_is_monotonic() {
        let registry = DimensionRegistry::new(DictionaryBackend::Retained);
        let pos = registry.append("tag", ValueKind::Str, 1);
        assert!(!registry.capabilities_at(pos).unwrap().has_multiple_values());
        registry.observe(pos, 3);
        assert!(registry.capabilities_at(pos).unwrap().has_multiple_values());
        registry.observe(pos, 1);
        assert!(registry.capabilities_at(pos).unwrap().has_multiple_values());
    }
}
