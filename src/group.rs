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

//! Landblock groups: the unit of parallel scheduling.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::coord::{CellCoord, CellKey};

/// Axis-aligned bounding box of a group's coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: CellCoord,
    pub max: CellCoord,
}

impl Bounds {
    pub fn of(coord: CellCoord) -> Self {
        Self {
            min: coord,
            max: coord,
        }
    }

    pub fn include(&mut self, coord: CellCoord) {
        self.min.x = self.min.x.min(coord.x);
        self.min.y = self.min.y.min(coord.y);
        self.max.x = self.max.x.max(coord.x);
        self.max.y = self.max.y.max(coord.y);
    }

    /// Chebyshev distance from `coord` to the box; 0 inside.
    ///
    /// A lower bound on the distance to any member inside the box.
    pub fn distance_to(&self, coord: CellCoord) -> u32 {
        let gap = |v: u8, lo: u8, hi: u8| -> u32 {
            if v < lo {
                u32::from(lo - v)
            } else if v > hi {
                u32::from(v - hi)
            } else {
                0
            }
        };
        gap(coord.x, self.min.x, self.max.x).max(gap(coord.y, self.min.y, self.max.y))
    }

    /// Chebyshev gap between two boxes; 0 when they overlap
    pub fn gap(&self, other: &Bounds) -> u32 {
        let axis = |a_lo: u8, a_hi: u8, b_lo: u8, b_hi: u8| -> u32 {
            if b_lo > a_hi {
                u32::from(b_lo - a_hi)
            } else if a_lo > b_hi {
                u32::from(a_lo - b_hi)
            } else {
                0
            }
        };
        axis(self.min.x, self.max.x, other.min.x, other.max.x)
            .max(axis(self.min.y, self.max.y, other.min.y, other.max.y))
    }

    fn on_edge(&self, coord: CellCoord) -> bool {
        coord.x == self.min.x || coord.x == self.max.x || coord.y == self.min.y || coord.y == self.max.y
    }
}

/// Call `f` for every key in `set` strictly closer than `spacing` to `coord`.
///
/// Probes the `(2s-1)^2` window around `coord` when that is cheaper than a
/// scan of the set. Only meaningful for overworld keys.
pub(crate) fn for_each_within<F>(set: &AHashSet<CellKey>, coord: CellCoord, spacing: u32, mut f: F)
where
    F: FnMut(CellKey),
{
    if spacing == 0 || set.is_empty() {
        return;
    }
    let radius = (spacing - 1).min(u32::from(u8::MAX)) as i32;
    let window = ((2 * radius + 1) * (2 * radius + 1)) as usize;

    if window < set.len() {
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if let Some(c) = coord.offset(dx, dy) {
                    let key = CellKey::overworld(c);
                    if set.contains(&key) {
                        f(key);
                    }
                }
            }
        }
    } else {
        for key in set {
            if key.coord.distance(coord) < spacing {
                f(*key);
            }
        }
    }
}

/// A set of landblocks scheduled as one unit.
///
/// Overworld groups are maximal clusters of cells connected through the
/// minimum-spacing relation; an instanced cell always sits alone in an
/// isolated group. A group whose split search ran out of budget may be
/// internally disconnected; it still ticks correctly, just sequentially.
#[derive(Debug, Clone)]
pub struct Group {
    members: AHashSet<CellKey>,
    isolated: bool,
    bounds: Option<Bounds>,
    split_pending: bool,
}

impl Group {
    /// Group holding exactly `key`. Isolated when `key` is an instance.
    pub fn singleton(key: CellKey) -> Self {
        let mut members = AHashSet::with_capacity(1);
        members.insert(key);
        Self {
            members,
            isolated: key.is_instanced(),
            bounds: Some(Bounds::of(key.coord)),
            split_pending: false,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, key: &CellKey) -> bool {
        self.members.contains(key)
    }

    pub fn is_isolated(&self) -> bool {
        self.isolated
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    /// True when the last split search did not finish
    pub fn is_split_pending(&self) -> bool {
        self.split_pending
    }

    pub(crate) fn set_split_pending(&mut self, pending: bool) {
        self.split_pending = pending;
    }

    pub fn members(&self) -> impl Iterator<Item = &CellKey> {
        self.members.iter()
    }

    pub(crate) fn member_set(&self) -> &AHashSet<CellKey> {
        &self.members
    }

    /// Members in key order
    pub fn sorted_members(&self) -> Vec<CellKey> {
        let mut keys: Vec<CellKey> = self.members.iter().copied().collect();
        keys.sort_unstable();
        keys
    }

    pub(crate) fn insert(&mut self, key: CellKey) {
        if self.members.insert(key) {
            match &mut self.bounds {
                Some(b) => b.include(key.coord),
                None => self.bounds = Some(Bounds::of(key.coord)),
            }
        }
    }

    pub(crate) fn remove(&mut self, key: &CellKey) -> bool {
        if !self.members.remove(key) {
            return false;
        }
        if self.bounds.is_some_and(|b| b.on_edge(key.coord)) {
            self.recompute_bounds();
        }
        true
    }

    /// Move every member of `other` into this group
    pub(crate) fn absorb(&mut self, other: Group) {
        self.split_pending |= other.split_pending;
        for key in other.members {
            self.insert(key);
        }
    }

    /// Remove `keys` from this group and return them as a new group
    pub(crate) fn extract(&mut self, keys: AHashSet<CellKey>) -> Group {
        self.members.retain(|k| !keys.contains(k));
        self.recompute_bounds();

        let mut split = Group {
            members: keys,
            isolated: self.isolated,
            bounds: None,
            split_pending: false,
        };
        split.recompute_bounds();
        split
    }

    fn recompute_bounds(&mut self) {
        let mut coords = self.members.iter().map(|k| k.coord);
        self.bounds = coords.next().map(|first| {
            let mut bounds = Bounds::of(first);
            for c in coords {
                bounds.include(c);
            }
            bounds
        });
    }

    /// Closest member to `coord` and its distance
    pub fn nearest_member(&self, coord: CellCoord) -> Option<(CellKey, u32)> {
        self.members
            .iter()
            .map(|k| (*k, k.coord.distance(coord)))
            .min_by_key(|&(k, d)| (d, k))
    }

    /// Minimum distance between `coord` and any member
    pub fn boundary_distance(&self, coord: CellCoord) -> Option<u32> {
        self.nearest_member(coord).map(|(_, d)| d)
    }

    /// True when some member is strictly closer than `spacing` to `coord`.
    /// Isolated groups never match.
    pub fn is_within_spacing(&self, coord: CellCoord, spacing: u32) -> bool {
        if self.isolated {
            return false;
        }
        match self.bounds {
            Some(b) if b.distance_to(coord) < spacing => {}
            _ => return false,
        }
        let mut found = false;
        for_each_within(&self.members, coord, spacing, |_| found = true);
        found
    }
}
