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

//! Seams to the simulation and the world content source.

use std::sync::Arc;

use crate::cell::Cell;
use crate::coord::CellKey;
use crate::destruction::DestructionQueue;
use crate::error::Result;
use crate::executor::TickPhase;
use crate::ids::ObjectId;
use crate::relocation::RelocationBuffer;
use crate::store::CellStore;

/// What a callback can see besides the cell it is ticking
pub struct TickContext<'a> {
    pub tick: u64,
    pub phase: TickPhase,
    store: &'a CellStore,
    destruction: &'a DestructionQueue,
}

impl<'a> TickContext<'a> {
    pub(crate) fn new(
        tick: u64,
        phase: TickPhase,
        store: &'a CellStore,
        destruction: &'a DestructionQueue,
    ) -> Self {
        Self {
            tick,
            phase,
            store,
            destruction,
        }
    }

    /// The cell registry. Loading from a worker is allowed; the new cell is
    /// grouped at the start of the next tick.
    pub fn store(&self) -> &'a CellStore {
        self.store
    }

    /// Ask for `key` to be unloaded in this tick's unload phase
    pub fn request_unload(&self, key: CellKey) -> bool {
        self.destruction.enqueue(key)
    }
}

/// Per-cell tick callbacks.
///
/// The scheduler only guarantees when and on which thread each callback runs:
/// `physics` and `parallel` run on a worker owning the cell's whole group
/// (or the tick thread in sequential mode), `sequential` always runs on the
/// tick thread with no other group in flight.
pub trait TickHooks: Send + Sync {
    /// Advance objects. Objects leaving the cell must be recorded in
    /// `relocations`, never moved directly.
    fn physics(&self, _ctx: &TickContext<'_>, _cell: &Cell, _relocations: &mut RelocationBuffer) {}

    /// Logic that is safe to run concurrently across groups
    fn parallel(&self, _ctx: &TickContext<'_>, _cell: &Cell) {}

    /// Logic that must not overlap with any other group
    fn sequential(&self, _ctx: &TickContext<'_>, _cell: &Cell) {}
}

/// Shared hooks, so a caller can keep a handle on its own state
impl<T: TickHooks + ?Sized> TickHooks for Arc<T> {
    fn physics(&self, ctx: &TickContext<'_>, cell: &Cell, relocations: &mut RelocationBuffer) {
        (**self).physics(ctx, cell, relocations);
    }

    fn parallel(&self, ctx: &TickContext<'_>, cell: &Cell) {
        (**self).parallel(ctx, cell);
    }

    fn sequential(&self, ctx: &TickContext<'_>, cell: &Cell) {
        (**self).sequential(ctx, cell);
    }
}

/// Hooks that do nothing. Useful for partition-only tooling.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl TickHooks for NoopHooks {}

/// Static content pulled in when a cell is first loaded
#[derive(Debug, Default, Clone)]
pub struct CellContent {
    pub objects: Vec<ObjectId>,
}

/// World content source.
///
/// Called by [`CellStore::get_or_load`] under the store's load lock; a slow
/// loader delays other loads but never readers.
pub trait CellLoader: Send + Sync {
    fn load(&self, key: CellKey) -> Result<CellContent>;
}

impl<F> CellLoader for F
where
    F: Fn(CellKey) -> Result<CellContent> + Send + Sync,
{
    fn load(&self, key: CellKey) -> Result<CellContent> {
        self(key)
    }
}

/// Loader producing empty cells
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyLoader;

impl CellLoader for EmptyLoader {
    fn load(&self, _key: CellKey) -> Result<CellContent> {
        Ok(CellContent::default())
    }
}
