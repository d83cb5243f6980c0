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

//! Deferred cross-boundary object moves

use crate::coord::CellKey;
use crate::ids::ObjectId;
use crate::store::CellStore;

/// Object that crossed into another cell during physics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    pub object: ObjectId,
    pub from: CellKey,
    pub to: CellKey,
}

/// Buffer of relocations collected by one worker during the physics phase.
///
/// Applying a relocation writes to a cell that may belong to another group,
/// so nothing here touches cells until [`RelocationBuffer::apply`] runs on
/// the tick thread after the physics barrier.
#[derive(Debug, Default)]
pub struct RelocationBuffer {
    relocations: Vec<Relocation>,
}

impl RelocationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            relocations: Vec::with_capacity(capacity),
        }
    }

    /// Queue a move of `object` from `from` to `to`
    pub fn push(&mut self, object: ObjectId, from: CellKey, to: CellKey) {
        if from == to {
            return;
        }
        self.relocations.push(Relocation { object, from, to });
    }

    /// Move everything from `other` into this buffer
    pub fn append(&mut self, other: &mut RelocationBuffer) {
        self.relocations.append(&mut other.relocations);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relocation> {
        self.relocations.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.relocations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.relocations.len()
    }

    pub fn clear(&mut self) {
        self.relocations.clear();
    }

    /// Apply all relocations and clear the buffer. Returns how many objects moved.
    ///
    /// Destinations are loaded with their adjacents so an object near the new
    /// cell's edge always has both sides resident. New cells join the
    /// partition at the start of the next tick. If the destination cannot be
    /// loaded the object stays where it was.
    pub fn apply(&mut self, store: &CellStore, tick: u64) -> usize {
        let mut moved = 0;
        for relocation in self.relocations.drain(..) {
            let Some(source) = store.get(&relocation.from) else {
                tracing::warn!(
                    object = ?relocation.object,
                    from = %relocation.from,
                    "relocation source no longer loaded; dropping move"
                );
                continue;
            };
            if !source.remove_object(relocation.object) {
                tracing::warn!(
                    object = ?relocation.object,
                    from = %relocation.from,
                    "relocated object not found in its source cell"
                );
                continue;
            }

            match store.get_or_load(relocation.to, true, false) {
                Ok(destination) => {
                    destination.insert_object(relocation.object);
                    destination.touch(tick);
                    moved += 1;
                }
                Err(err) => {
                    tracing::error!(
                        object = ?relocation.object,
                        to = %relocation.to,
                        error = %err,
                        "relocation destination failed to load; object kept in place"
                    );
                    source.insert_object(relocation.object);
                }
            }
        }
        moved
    }
}
