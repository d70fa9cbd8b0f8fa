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

use std::cell::UnsafeCell;

use crate::error::{IndexError, IndexResult};

/// A fixed-capacity byte region subdivided into equal-size slots.
///
/// The arena performs no bookkeeping of its own: callers (the ingestion
/// path, under the insertion mutex) own the logical cursor and are
/// responsible for never handing out two overlapping slots. Given that
/// discipline, concurrent writers touching disjoint slots never alias, so
/// [`ByteArena`] is `Sync` despite its interior mutability.
pub struct ByteArena {
    bytes: UnsafeCell<Box<[u8]>>,
    capacity: usize,
}

// SAFETY: callers only ever obtain non-overlapping `&mut [u8]` slices via
// `slice_at`, enforced by the offset bookkeeping in the ingestion path
// (each key maps to a unique, never-reused offset). Shared access to
// disjoint regions of the same backing allocation is sound.
unsafe impl Sync for ByteArena {}
// SAFETY: see above; no thread-affine state is held.
unsafe impl Send for ByteArena {}

impl ByteArena {
    /// Allocates a new arena of `capacity` zero-initialized bytes.
    ///
    /// Aggregators are still required to self-initialize their region via
    /// `BufferAggregator::init` before reading it; the zeroing here is not
    /// a substitute for `init`.
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: UnsafeCell::new(vec![0u8; capacity].into_boxed_slice()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns a mutable view of `len` bytes starting at `offset`.
    ///
    /// Reserved for the write path (slot init/aggregate), which already
    /// serializes access to a given slot through the per-aggregator mutex
    /// (§5); readers must use [`Self::slice_ref`] instead, since a reader
    /// holds no lock and a concurrent writer merging into the same key may
    /// be mutating the same slot at the same time.
    ///
    /// # Safety
    /// The caller must guarantee that no other live slice overlaps
    /// `[offset, offset + len)`. The ingestion path upholds this by handing
    /// out each offset exactly once (see [`crate::fact_map::FactMap`]).
    ///
    /// # Errors
    /// Returns [`IndexError::ArenaFull`] if the requested range would
    /// exceed `capacity`.
    pub fn slice_at(&self, offset: usize, len: usize) -> IndexResult<&mut [u8]> {
        if offset + len > self.capacity {
            return Err(IndexError::ArenaFull {
                offset,
                stride: len,
                capacity: self.capacity,
            });
        }
        // SAFETY: bounds were just checked above. Aliasing-freedom is a
        // contract on the caller, documented above.
        let ptr = unsafe { (*self.bytes.get()).as_mut_ptr().add(offset) };
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr, len) })
    }

    /// Returns a shared view of `len` bytes starting at `offset`, for the
    /// read path (`BufferAggregator::get` during iteration, §4.8).
    ///
    /// Unlike [`Self::slice_at`], this never aliases a writer's `&mut`
    /// unsoundly: a shared read racing a concurrent in-place write to the
    /// same bytes is a data race on the byte contents (the value read may
    /// be stale or torn), not undefined behavior, because no other `&mut`
    /// is minted to overlap it.
    ///
    /// # Errors
    /// Returns [`IndexError::ArenaFull`] if the requested range would
    /// exceed `capacity`.
    pub fn slice_ref(&self, offset: usize, len: usize) -> IndexResult<&[u8]> {
        if offset + len > self.capacity {
            return Err(IndexError::ArenaFull {
                offset,
                stride: len,
                capacity: self.capacity,
            });
        }
        // SAFETY: bounds were just checked above. This mints only a shared
        // reference, so it never conflicts with the aliasing rules unless a
        // `&mut` from `slice_at` is simultaneously live over the same range
        // — callers must not call `get` concurrently with `init`/`aggregate`
        // on the same offset without the per-aggregator mutex held by one
        // side; `IncrementalIndex` never does (see `index.rs`'s `materialize`).
        let ptr = unsafe { (*self.bytes.get()).as_ptr().add(offset) };
        Ok(unsafe { std::slice::from_raw_parts(ptr, len) })
    }
}

impl std::fmt::Debug for ByteArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteArena")
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// A scoped handle to a [`ByteArena`] obtained from an external pool.
///
/// Modeled on the `Keyspace`/storage-handle acquisition pattern used
/// elsewhere in this crate: the holder owns the arena for the lifetime of
/// the index and releases it (by dropping it) exactly once, on
/// [`crate::index::IncrementalIndex::close`], on every exit path.
pub trait ByteArenaPool: Send + Sync {
    fn take(&self, capacity: usize) -> ArenaHolder;
}

/// Holds an `Arc<ByteArena>`: the index keeps its own clone for lock-free
/// hot-path access ([`crate::index::IncrementalIndex`]'s `arena` field),
/// while the holder itself is only ever touched inside `close()`, dropping
/// this reference. The backing memory is actually freed once every clone
/// (including the index's own) is gone.
pub struct ArenaHolder {
    arena: Option<std::sync::Arc<ByteArena>>,
}

impl ArenaHolder {
    pub fn new(arena: ByteArena) -> Self {
        Self {
            arena: Some(std::sync::Arc::new(arena)),
        }
    }

    pub fn arena(&self) -> std::sync::Arc<ByteArena> {
        self.arena
            .clone()
            .expect("ArenaHolder used after close()")
    }

    /// Releases this holder's reference to the arena. Idempotent: a second
    /// call is a no-op.
    pub fn close(&mut self) {
        self.arena.take();
    }
}

/// The trivial in-process pool: every `take` allocates a fresh arena.
/// Sufficient for a single index; a host embedding many indices may swap in
/// a pool that reuses freed backing memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapArenaPool;

impl ByteArenaPool for HeapArenaPool {
    fn take(&self, capacity: usize) -> ArenaHolder {
        ArenaHolder::new(ByteArena::new(capacity))
    }
}
