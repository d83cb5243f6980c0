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

//! Neighbor computation and neighbor-cache maintenance

use smallvec::SmallVec;

use crate::cell::{Cell, NeighborList};
use crate::coord::{CellCoord, CellKey};
use crate::store::CellStore;

/// Offsets in N, S, W, E, NW, NE, SW, SE order
const NEIGHBOR_OFFSETS: [(i32, i32); 8] = [
    (0, 1),
    (0, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (1, 1),
    (-1, -1),
    (1, -1),
];

/// The up-to-8 grid neighbors of `coord`, clipped to the grid
pub fn neighbors(coord: CellCoord) -> SmallVec<[CellCoord; 8]> {
    NEIGHBOR_OFFSETS
        .iter()
        .filter_map(|&(dx, dy)| coord.offset(dx, dy))
        .collect()
}

/// Neighbor keys of `key`. Instances have none.
pub fn neighbor_keys(key: &CellKey) -> SmallVec<[CellKey; 8]> {
    if key.is_instanced() {
        return SmallVec::new();
    }
    neighbors(key.coord)
        .into_iter()
        .map(CellKey::overworld)
        .collect()
}

/// Neighbor keys of `key` that are currently loaded
pub fn loaded_neighbors(store: &CellStore, key: &CellKey) -> NeighborList {
    neighbor_keys(key)
        .into_iter()
        .filter(|k| store.is_loaded(k))
        .collect()
}

/// Rebuild `cell`'s neighbor cache from loaded neighbors only.
///
/// With `propagate`, each of those neighbors is refreshed too (one level,
/// no further), which is enough to make every cell touched by a single load
/// or unload consistent again.
pub fn refresh_adjacency(store: &CellStore, cell: &Cell, propagate: bool) {
    let loaded = loaded_neighbors(store, &cell.key());

    if propagate {
        for neighbor_key in &loaded {
            if let Some(neighbor) = store.get(neighbor_key) {
                refresh_adjacency(store, &neighbor, false);
            }
        }
    }

    cell.set_neighbors(loaded);
}

/// Refresh the caches of cells that neighbored an unloaded cell
pub fn refresh_former_neighbors(store: &CellStore, former: &[CellKey]) {
    for key in former {
        if let Some(neighbor) = store.get(key) {
            refresh_adjacency(store, &neighbor, false);
        }
    }
}
