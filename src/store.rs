// Copyright 2024 Saptak Santra
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

//! Cell store: on-demand loading and the registry of live cells

use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use parking_lot::{Mutex, RwLock};

use crate::adjacency;
use crate::cell::Cell;
use crate::coord::CellKey;
use crate::error::Result;
use crate::simulation::{CellLoader, EmptyLoader};

/// Registry mapping each [`CellKey`] to its one live [`Cell`].
///
/// Lookups take a shared read lock. Construction of a key holds that key's
/// load slot and re-checks the map, so concurrent requests for one key can
/// never produce two live cells. Loads of different keys run concurrently,
/// and a slow content load never blocks readers.
pub struct CellStore {
    /// Live cells
    active: RwLock<AHashMap<CellKey, Arc<Cell>>>,

    /// Per-key load slots for keys currently being constructed
    loading: Mutex<AHashMap<CellKey, Arc<Mutex<()>>>>,

    /// Cells created since the last partition pass
    pending: Mutex<AHashSet<CellKey>>,

    /// World content source
    loader: Box<dyn CellLoader>,

    /// Tick stamped on newly loaded cells
    current_tick: AtomicU64,
}

impl Default for CellStore {
    fn default() -> Self {
        Self::new(Box::new(EmptyLoader))
    }
}

impl CellStore {
    pub fn new(loader: Box<dyn CellLoader>) -> Self {
        Self {
            active: RwLock::new(AHashMap::new()),
            loading: Mutex::new(AHashMap::new()),
            pending: Mutex::new(AHashSet::new()),
            loader,
            current_tick: AtomicU64::new(0),
        }
    }

    /// Return the live cell for `key`, loading it if needed.
    ///
    /// With `load_adjacents`, the up-to-8 overworld neighbors are loaded too
    /// (without their own adjacents), so an interaction spanning a grid
    /// boundary always has both sides resident. `permaload` is sticky.
    /// New cells wait in the pending set until the next partition pass.
    pub fn get_or_load(
        &self,
        key: CellKey,
        load_adjacents: bool,
        permaload: bool,
    ) -> Result<Arc<Cell>> {
        let cell = match self.get(&key) {
            Some(cell) => cell,
            None => self.load_new(key)?,
        };

        if permaload {
            cell.set_permaload();
        }

        // Neighbors may have been unloaded since the last request, so the
        // whole ring is checked every time
        if load_adjacents && !cell.is_isolated() {
            for neighbor in adjacency::neighbor_keys(&key) {
                if !self.is_loaded(&neighbor) {
                    self.get_or_load(neighbor, false, false)?;
                }
            }
        }

        Ok(cell)
    }

    fn load_new(&self, key: CellKey) -> Result<Arc<Cell>> {
        let slot = Arc::clone(self.loading.lock().entry(key).or_default());
        let result = {
            let _load = slot.lock();
            self.construct(key)
        };

        // Last holder of the slot retires it
        let mut loading = self.loading.lock();
        if Arc::strong_count(&slot) <= 2 {
            loading.remove(&key);
        }
        result
    }

    /// Build and register the cell for `key`. Caller holds the key's load slot.
    fn construct(&self, key: CellKey) -> Result<Arc<Cell>> {
        // Another thread may have finished this load while we waited
        if let Some(cell) = self.get(&key) {
            return Ok(cell);
        }

        let content = self.loader.load(key)?;
        let cell = Arc::new(Cell::new(key, content.objects, self.current_tick()));

        {
            // Lock order: pending, then active
            let mut pending = self.pending.lock();
            let mut active = self.active.write();
            match active.entry(key) {
                Entry::Occupied(_) => {
                    // Only loaders insert and they hold the key's load slot,
                    // so this is a locking bug. The caller gets a cell but it stays
                    // untracked so the inconsistency remains visible.
                    tracing::error!(
                        cell = %key,
                        "cell registration collided with an existing entry; returning untracked cell"
                    );
                    return Ok(cell);
                }
                Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(&cell));
                    pending.insert(key);
                }
            }
        }

        adjacency::refresh_adjacency(self, &cell, true);
        tracing::trace!(cell = %key, "cell loaded");

        Ok(cell)
    }

    /// Live cell for `key`, without loading
    pub fn get(&self, key: &CellKey) -> Option<Arc<Cell>> {
        self.active.read().get(key).cloned()
    }

    pub fn is_loaded(&self, key: &CellKey) -> bool {
        self.active.read().contains_key(key)
    }

    /// Number of live cells, grouped or not
    pub fn len(&self) -> usize {
        self.active.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.read().is_empty()
    }

    /// Sorted snapshot of live keys
    pub fn keys(&self) -> Vec<CellKey> {
        let mut keys: Vec<CellKey> = self.active.read().keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Snapshot of live cells
    pub fn cells(&self) -> Vec<Arc<Cell>> {
        self.active.read().values().cloned().collect()
    }

    /// Remove `key` from the registry. Only the unload phase calls this.
    pub(crate) fn unregister(&self, key: &CellKey) -> Option<Arc<Cell>> {
        let mut pending = self.pending.lock();
        let removed = self.active.write().remove(key);
        pending.remove(key);
        removed
    }

    /// Live cells already handed to the partitioner, read consistently
    /// against concurrent loads
    pub fn settled_len(&self) -> usize {
        let pending = self.pending.lock();
        self.active.read().len().saturating_sub(pending.len())
    }

    /// Drain the pending-addition set, sorted for a deterministic pass
    pub(crate) fn take_pending(&self) -> Vec<CellKey> {
        let pending = std::mem::take(&mut *self.pending.lock());
        let mut keys: Vec<CellKey> = pending.into_iter().collect();
        keys.sort_unstable();
        keys
    }

    /// Cells loaded but not yet grouped
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_pending(&self, key: &CellKey) -> bool {
        self.pending.lock().contains(key)
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick.load(Ordering::Relaxed)
    }

    pub(crate) fn set_current_tick(&self, tick: u64) {
        self.current_tick.store(tick, Ordering::Relaxed);
    }
}
