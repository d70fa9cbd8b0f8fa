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

//! Per-dimension string dictionaries.
//!
//! Values seen while ingesting a dimension's rows are interned here: each
//! distinct string gets a dense, 0-based, insertion-order id that is stable
//! for the life of the index. A dictionary also supports an on-demand
//! sorted view for rank lookups, used by rank-based post-aggregations.
//!
//! Comparisons across dictionary instances must never rely on the identity
//! of the interned string, only its content: two independently-interned
//! equal strings compare equal but are not guaranteed to be the same
//! allocation. Identity is an optimization reserved for the case where both
//! operands are already known to have come from the same dictionary.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::error::{IndexError, IndexResult};

/// Backend selection for [`DimensionDictionary`], mirroring the source's
/// on-heap/off-heap split. Both backends give identical semantics; they
/// differ only in whether canonicalized strings are retained forever or
/// may be evicted from the interning cache under memory pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictionaryBackend {
    /// Every interned string is retained for the life of the dictionary.
    /// Appropriate for small dictionaries or when canonicalization
    /// identity is relied on elsewhere.
    Retained,
    /// Canonicalization is served from a bounded LRU cache; entries may be
    /// evicted and re-created. A portable stand-in for the source's
    /// GC-reclaimable weak cache.
    BoundedCache { capacity: usize },
}

impl Default for DictionaryBackend {
    fn default() -> Self {
        DictionaryBackend::Retained
    }
}

enum Interner {
    Retained(RwLock<hashbrown::HashSet<std::sync::Arc<str>, ahash::RandomState>>),
    BoundedCache(Mutex<lru::LruCache<std::sync::Arc<str>, ()>>),
}

impl Interner {
    fn new(backend: DictionaryBackend) -> Self {
        match backend {
            DictionaryBackend::Retained => {
                Interner::Retained(RwLock::new(hashbrown::HashSet::with_hasher(
                    ahash::RandomState::new(),
                )))
            }
            DictionaryBackend::BoundedCache { capacity } => Interner::BoundedCache(Mutex::new(
                lru::LruCache::new(std::num::NonZeroUsize::new(capacity.max(1)).unwrap()),
            )),
        }
    }

    /// Returns the canonical `Arc<str>` equal to `v`, inserting it if this
    /// is the first time `v` is seen. Idempotent on equal inputs.
    fn intern(&self, v: &str) -> std::sync::Arc<str> {
        match self {
            Interner::Retained(set) => {
                if let Some(existing) = set.read().get(v) {
                    return existing.clone();
                }
                let mut set = set.write();
                if let Some(existing) = set.get(v) {
                    return existing.clone();
                }
                let arc: std::sync::Arc<str> = std::sync::Arc::from(v);
                set.insert(arc.clone());
                arc
            }
            Interner::BoundedCache(cache) => {
                let mut cache = cache.lock();
                // `LruCache` keys compare by content, so a lookup by `v`
                // finds an equal entry regardless of allocation identity.
                if let Some((k, _)) = cache.iter().find(|(k, _)| k.as_ref() == v) {
                    return k.clone();
                }
                let arc: std::sync::Arc<str> = std::sync::Arc::from(v);
                cache.put(arc.clone(), ());
                arc
            }
        }
    }
}

/// A per-dimension string → id bidirectional store.
///
/// `add` is single-writer: the ingestion path serializes calls to `add` on
/// the same dictionary through the registry/dictionary-creation mutex plus
/// its own internal lock, so id assignment is always dense and monotonic.
/// `intern` and the read accessors may be called concurrently with `add`.
pub struct DimensionDictionary {
    interner: Interner,
    /// Write-serialized: id -> canonical value, insertion order.
    by_id: RwLock<Vec<std::sync::Arc<str>>>,
    /// Write-serialized: canonical value -> id.
    ids: RwLock<hashbrown::HashMap<std::sync::Arc<str>, u32, ahash::RandomState>>,
    add_lock: Mutex<()>,
    sorted: RwLock<Option<Vec<std::sync::Arc<str>>>>,
    dirty_since_sort: AtomicBool,
}

impl DimensionDictionary {
    pub fn new(backend: DictionaryBackend) -> Self {
        Self {
            interner: Interner::new(backend),
            by_id: RwLock::new(Vec::new()),
            ids: RwLock::new(hashbrown::HashMap::with_hasher(ahash::RandomState::new())),
            add_lock: Mutex::new(()),
            sorted: RwLock::new(None),
            dirty_since_sort: AtomicBool::new(true),
        }
    }

    /// Returns the canonical identity for `v`. Does not assign an id.
    pub fn intern(&self, v: &str) -> std::sync::Arc<str> {
        self.interner.intern(v)
    }

    pub fn contains(&self, v: &str) -> bool {
        self.ids.read().contains_key(v)
    }

    /// Assigns the next id to `v` if it is not already present, and returns
    /// the resulting id. At most one thread may observe a given `v` as
    /// freshly-assigned; callers serialize `add` for a given dictionary.
    ///
    /// Per the spec's note on the source's dimension-holder `add` path: we
    /// canonicalize *after* recording the id mapping, not before, so that
    /// the canonical string stored in `by_id`/`ids` is the same allocation
    /// returned to callers of `intern` going forward.
    pub fn add_if_absent(&self, v: &str) -> u32 {
        if let Some(&id) = self.ids.read().get(v) {
            return id;
        }
        let _guard = self.add_lock.lock();
        // Re-check under the lock: another thread may have added `v`
        // between our optimistic read and acquiring `add_lock`.
        if let Some(&id) = self.ids.read().get(v) {
            return id;
        }
        let canonical = self.interner.intern(v);
        let id = {
            let mut by_id = self.by_id.write();
            let id = by_id.len() as u32;
            by_id.push(canonical.clone());
            id
        };
        self.ids.write().insert(canonical, id);
        self.dirty_since_sort.store(true, Ordering::Release);
        id
    }

    /// Returns the id for `v`, or `None` if `v` was never added.
    ///
    /// The source's equivalent (`getId`) looks up a boxed id with no null
    /// guard; we make the absent case explicit instead of panicking.
    pub fn id_of(&self, v: &str) -> Option<u32> {
        self.ids.read().get(v).copied()
    }

    /// Returns the canonical value for `id`, or `None` if out of range.
    pub fn value_of(&self, id: u32) -> Option<std::sync::Arc<str>> {
        self.by_id.read().get(id as usize).cloned()
    }

    pub fn size(&self) -> usize {
        self.by_id.read().len()
    }

    /// Materializes a sorted view of all interned values, invalidating any
    /// prior sorted view. Subsequent `add_if_absent` calls mark the view
    /// stale again; call `sort()` again before relying on `sorted_rank`.
    pub fn sort(&self) {
        let mut values = self.by_id.read().clone();
        values.sort_unstable();
        *self.sorted.write() = Some(values);
        self.dirty_since_sort.store(false, Ordering::Release);
    }

    /// Binary-searches the sorted view for `v`, returning its rank.
    ///
    /// # Errors
    /// [`IndexError::NotSorted`] if `sort()` has not been called, or has
    /// been invalidated by a subsequent `add_if_absent`.
    pub fn sorted_rank(&self, v: &str) -> IndexResult<Option<usize>> {
        if self.dirty_since_sort.load(Ordering::Acquire) {
            return Err(IndexError::NotSorted);
        }
        let sorted = self.sorted.read();
        let sorted = sorted.as_ref().ok_or(IndexError::NotSorted)?;
        Ok(sorted.binary_search_by(|probe| probe.as_ref().cmp(v)).ok())
    }

    pub fn sorted_value(&self, rank: usize) -> IndexResult<Option<std::sync::Arc<str>>> {
        if self.dirty_since_sort.load(Ordering::Acquire) {
            return Err(IndexError::NotSorted);
        }
        let sorted = self.sorted.read();
        let sorted = sorted.as_ref().ok_or(IndexError::NotSorted)?;
        Ok(sorted.get(rank).cloned())
    }
}

impl std::fmt::Debug for DimensionDictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DimensionDictionary")
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_assigns_dense_ids() {
        let dict = DimensionDictionary::new(DictionaryBackend::Retained);
        assert_eq!(dict.add_if_absent("a"), 0);
        assert_eq!(dict.add_if_absent("b"), 1);
        assert_eq!(dict.add_if_absent("a"), 0);
        assert_eq!(dict.size(), 2);
    }

    #[test]
    fn intern_is_idempotent_on_equal_inputs() {
        let dict = DimensionDictionary::new(DictionaryBackend::Retained);
        let a1 = dict.intern("x");
        let a2 = dict.intern("x");
        assert_eq!(a1, a2);
    }

    #[test]
    fn id_of_absent_value_is_none() {
        let dict = DimensionDictionary::new(DictionaryBackend::Retained);
        assert_eq!(dict.id_of("missing"), None);
    }

    #[test]
    fn sorted_rank_before_sort_fails() {
        let dict = DimensionDictionary::new(DictionaryBackend::Retained);
        dict.add_if_absent("a");
        assert!(matches!(dict.sorted_rank("a"), Err(IndexError::NotSorted)));
    }

    #[test]
    fn sort_then_rank_round_trips() {
        let dict = DimensionDictionary::new(DictionaryBackend::Retained);
        dict.add_if_absent("c");
        dict.add_if_absent("a");
        dict.add_if_absent("b");
        dict.sort();
        assert_eq!(dict.sorted_rank("a").unwrap(), Some(0));
        assert_eq!(dict.sorted_rank("b").unwrap(), Some(1));
        assert_eq!(dict.sorted_rank("c").unwrap(), Some(2));
        assert_eq!(dict.sorted_value(1).unwrap().as_deref(), Some("b"));
    }

    #[test]
    fn add_after_sort_invalidates_view() {
        let dict = DimensionDictionary::new(DictionaryBackend::Retained);
        dict.add_if_absent("a");
        dict.sort();
        dict.add_if_absent("z");
        assert!(matches!(dict.sorted_rank("a"), Err(IndexError::NotSorted)));
    }

    #[test]
    fn bounded_cache_backend_still_canonicalizes() {
        let dict = DimensionDictionary::new(DictionaryBackend::BoundedCache { capacity: 2 });
        let id = dict.add_if_absent("v1");
        assert_eq!(dict.value_of(id).unwrap().as_ref(), "v1");
    }
}
