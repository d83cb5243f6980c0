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

//! A single loaded landblock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam::atomic::AtomicCell;
use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;

use crate::coord::{CellCoord, CellKey};
use crate::diagnostics;
use crate::ids::{GroupId, ObjectId};

/// Cached list of loaded neighbor keys
pub type NeighborList = SmallVec<[CellKey; 8]>;

/// One live landblock (or one instanced copy of it).
///
/// Cells are owned by the [`CellStore`](crate::store::CellStore) and shared
/// as `Arc<Cell>`. The object list sits behind its own mutex, which is only
/// ever contended if two groups touch the same cell, i.e. never while the
/// spacing invariant holds.
#[derive(Debug)]
pub struct Cell {
    key: CellKey,
    isolated: bool,
    permaload: AtomicBool,
    neighbors: Mutex<NeighborList>,
    objects: Mutex<Vec<ObjectId>>,
    group: AtomicCell<Option<GroupId>>,
    last_active_tick: AtomicU64,
    access_violations: AtomicU64,
}

impl Cell {
    /// Create an ungrouped cell holding `objects`
    pub fn new(key: CellKey, objects: Vec<ObjectId>, loaded_at_tick: u64) -> Self {
        Self {
            key,
            isolated: key.is_instanced(),
            permaload: AtomicBool::new(false),
            neighbors: Mutex::new(SmallVec::new()),
            objects: Mutex::new(objects),
            group: AtomicCell::new(None),
            last_active_tick: AtomicU64::new(loaded_at_tick),
            access_violations: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> CellKey {
        self.key
    }

    pub fn coord(&self) -> CellCoord {
        self.key.coord
    }

    /// Instanced cells are never adjacent to anything and always form their own group
    pub fn is_isolated(&self) -> bool {
        self.isolated
    }

    pub fn is_permaload(&self) -> bool {
        self.permaload.load(Ordering::Acquire)
    }

    /// Mark as permanently loaded. Sticky: there is no way to clear it.
    pub fn set_permaload(&self) {
        self.permaload.store(true, Ordering::Release);
    }

    /// Snapshot of the cached loaded-neighbor list
    pub fn neighbors(&self) -> NeighborList {
        self.neighbors.lock().clone()
    }

    pub(crate) fn set_neighbors(&self, neighbors: NeighborList) {
        *self.neighbors.lock() = neighbors;
    }

    /// Group this cell was last placed in, None until the next partition pass
    pub fn group(&self) -> Option<GroupId> {
        self.group.load()
    }

    pub(crate) fn set_group(&self, group: Option<GroupId>) {
        self.group.store(group);
    }

    /// Lock the object list for reading or mutation.
    ///
    /// While a worker is ticking a group, touching a cell that belongs to a
    /// different group is reported as a concurrency bug.
    pub fn objects(&self) -> MutexGuard<'_, Vec<ObjectId>> {
        diagnostics::check_cell_access(self);
        self.objects.lock()
    }

    /// Number of objects, without the cross-group access check
    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    pub(crate) fn insert_object(&self, object: ObjectId) {
        let mut objects = self.objects.lock();
        if !objects.contains(&object) {
            objects.push(object);
        }
    }

    pub(crate) fn remove_object(&self, object: ObjectId) -> bool {
        let mut objects = self.objects.lock();
        match objects.iter().position(|&o| o == object) {
            Some(pos) => {
                objects.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn last_active_tick(&self) -> u64 {
        self.last_active_tick.load(Ordering::Relaxed)
    }

    pub(crate) fn touch(&self, tick: u64) {
        self.last_active_tick.fetch_max(tick, Ordering::Relaxed);
    }

    /// Cross-group accesses detected on this cell
    pub fn access_violations(&self) -> u64 {
        self.access_violations.load(Ordering::Relaxed)
    }

    pub(crate) fn record_access_violation(&self) {
        self.access_violations.fetch_add(1, Ordering::Relaxed);
    }
}
