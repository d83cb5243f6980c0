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

//! Group partitioner
//!
//! Keeps every loaded landblock in exactly one [`Group`] such that no two
//! groups hold cells closer than the minimum spacing. Groups are merged
//! incrementally as cells load and split (under a time budget) as they
//! unload, instead of recomputing connectivity every tick.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::{AHashMap, AHashSet};
use serde::Serialize;
use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::cell::Cell;
use crate::coord::CellKey;
use crate::error::{InvariantViolation, Result};
use crate::group::{for_each_within, Bounds, Group};
use crate::ids::GroupId;
use crate::store::CellStore;

/// BFS steps between deadline checks during a split search
const SPLIT_CHECK_INTERVAL: usize = 32;

/// Result of one pass over the pending-addition set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddReport {
    /// Cells placed into a group
    pub added: usize,
    /// New groups created (singletons and instances)
    pub created: usize,
    /// Groups absorbed into another because a new cell bridged them
    pub merged: usize,
    /// Pending keys whose cell was unloaded before it could be grouped
    pub skipped: usize,
}

/// Result of a throttled split search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitOutcome {
    /// Parallel ticking is off; nothing to gain from splitting
    NotAttempted,
    /// Group is still one component
    Connected,
    /// Search finished; `new_groups` components were split off
    Split { new_groups: usize },
    /// Budget ran out; `new_groups` components found so far were applied
    Deferred { new_groups: usize },
}

impl SplitOutcome {
    pub fn new_groups(&self) -> usize {
        match self {
            SplitOutcome::Split { new_groups } | SplitOutcome::Deferred { new_groups } => {
                *new_groups
            }
            _ => 0,
        }
    }
}

/// Result of removing one cell from the partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// Cell was not in any group (still pending, or already removed)
    NotGrouped,
    /// Cell was the last member; the group is gone
    GroupDeleted,
    /// Group survives; split search result attached
    Kept(SplitOutcome),
}

/// Admin-facing snapshot of one group
#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub id: GroupId,
    pub len: usize,
    pub isolated: bool,
    pub bounds: Option<Bounds>,
    pub split_pending: bool,
}

/// Cells of one group, in key order, for one tick
#[derive(Debug, Clone)]
pub struct GroupBatch {
    pub id: GroupId,
    pub cells: Vec<Arc<Cell>>,
}

/// Maintains the group list. Owned and mutated by the tick thread only.
pub struct Partitioner {
    groups: SlotMap<GroupId, Group>,
    membership: AHashMap<CellKey, GroupId>,
    min_spacing: u32,
    split_budget: Duration,
    parallel: bool,
}

impl Partitioner {
    pub fn new(min_spacing: u32, split_budget: Duration, parallel: bool) -> Self {
        Self {
            groups: SlotMap::with_key(),
            membership: AHashMap::new(),
            min_spacing: min_spacing.max(1),
            split_budget,
            parallel,
        }
    }

    pub fn min_spacing(&self) -> u32 {
        self.min_spacing
    }

    pub fn split_budget(&self) -> Duration {
        self.split_budget
    }

    pub fn set_split_budget(&mut self, budget: Duration) {
        self.split_budget = budget;
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// Switching parallel on marks every multi-cell group for a split retry,
    /// since removals while sequential never searched for splits.
    pub fn set_parallel(&mut self, parallel: bool) {
        if parallel && !self.parallel {
            for group in self.groups.values_mut() {
                if group.len() > 1 && !group.is_isolated() {
                    group.set_split_pending(true);
                }
            }
        }
        self.parallel = parallel;
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Sum of all group sizes
    pub fn grouped_cell_count(&self) -> usize {
        self.groups.values().map(Group::len).sum()
    }

    pub fn group_of(&self, key: &CellKey) -> Option<GroupId> {
        self.membership.get(key).copied()
    }

    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(id)
    }

    pub fn groups(&self) -> impl Iterator<Item = (GroupId, &Group)> {
        self.groups.iter()
    }

    /// Group summaries, largest first
    pub fn summaries(&self) -> Vec<GroupSummary> {
        let mut summaries: Vec<GroupSummary> = self
            .groups
            .iter()
            .map(|(id, g)| GroupSummary {
                id,
                len: g.len(),
                isolated: g.is_isolated(),
                bounds: g.bounds(),
                split_pending: g.is_split_pending(),
            })
            .collect();
        summaries.sort_by(|a, b| b.len.cmp(&a.len));
        summaries
    }

    /// Freeze the group list for one tick.
    ///
    /// Largest groups come first so the pool starts the longest jobs early.
    pub fn batches(&self, store: &CellStore) -> Vec<GroupBatch> {
        let mut batches: Vec<GroupBatch> = self
            .groups
            .iter()
            .map(|(id, group)| GroupBatch {
                id,
                cells: group
                    .sorted_members()
                    .iter()
                    .filter_map(|k| store.get(k))
                    .collect(),
            })
            .collect();
        batches.sort_by(|a, b| b.cells.len().cmp(&a.cells.len()));
        batches
    }

    // ------------------------------------------------------------------
    // Add path
    // ------------------------------------------------------------------

    /// Place every pending cell into a group.
    ///
    /// Runs once per tick on the tick thread, before any phase. A new cell
    /// within spacing of several groups bridges them: they all merge.
    pub fn process_pending_additions(&mut self, store: &CellStore) -> AddReport {
        let pending = store.take_pending();
        let mut report = AddReport::default();
        if pending.is_empty() {
            return report;
        }

        let _span = tracing::debug_span!("partition.add", pending = pending.len()).entered();

        for key in pending {
            let Some(cell) = store.get(&key) else {
                tracing::debug!(cell = %key, "pending cell unloaded before grouping");
                report.skipped += 1;
                continue;
            };
            if self.membership.contains_key(&key) {
                tracing::warn!(cell = %key, "pending cell already grouped");
                continue;
            }
            self.add_cell(&cell, store, &mut report);
            report.added += 1;
        }

        #[cfg(debug_assertions)]
        if let Err(violation) = self.verify_conservation(store) {
            tracing::error!(%violation, "partition conservation check failed after additions");
        }

        report
    }

    fn add_cell(&mut self, cell: &Cell, store: &CellStore, report: &mut AddReport) {
        let key = cell.key();

        if cell.is_isolated() {
            let id = self.create_group(Group::singleton(key));
            cell.set_group(Some(id));
            report.created += 1;
            return;
        }

        let coord = key.coord;
        let spacing = self.min_spacing;
        let matches: SmallVec<[GroupId; 4]> = self
            .groups
            .iter()
            .filter(|(_, g)| g.is_within_spacing(coord, spacing))
            .map(|(id, _)| id)
            .collect();

        let target = match matches.as_slice() {
            [] => {
                let id = self.create_group(Group::singleton(key));
                report.created += 1;
                id
            }
            [only] => {
                self.groups[*only].insert(key);
                self.membership.insert(key, *only);
                *only
            }
            many => {
                // Bridge: fold every other match into the largest one
                let target = *many
                    .iter()
                    .max_by_key(|id| self.groups[**id].len())
                    .unwrap_or(&many[0]);
                self.groups[target].insert(key);
                self.membership.insert(key, target);

                for &other in many.iter().filter(|&&id| id != target) {
                    if let Some(absorbed) = self.groups.remove(other) {
                        for member in absorbed.members() {
                            self.membership.insert(*member, target);
                            if let Some(c) = store.get(member) {
                                c.set_group(Some(target));
                            }
                        }
                        self.groups[target].absorb(absorbed);
                        report.merged += 1;
                    }
                }
                tracing::debug!(
                    cell = %key,
                    merged = many.len(),
                    size = self.groups[target].len(),
                    "bridging cell merged groups"
                );
                target
            }
        };

        cell.set_group(Some(target));
    }

    fn create_group(&mut self, group: Group) -> GroupId {
        let members: Vec<CellKey> = group.members().copied().collect();
        let id = self.groups.insert(group);
        for key in members {
            self.membership.insert(key, id);
        }
        id
    }

    // ------------------------------------------------------------------
    // Remove path
    // ------------------------------------------------------------------

    /// Take `key` out of its group, deleting or splitting the group as needed.
    ///
    /// Adjacency of former neighbors is the caller's job, once the cell is
    /// gone from the store.
    pub fn remove(&mut self, key: &CellKey, store: &CellStore) -> RemoveOutcome {
        let Some(id) = self.membership.remove(key) else {
            return RemoveOutcome::NotGrouped;
        };
        let Some(group) = self.groups.get_mut(id) else {
            tracing::error!(cell = %key, ?id, "membership index points at a missing group");
            return RemoveOutcome::NotGrouped;
        };

        group.remove(key);
        if group.is_empty() {
            self.groups.remove(id);
            return RemoveOutcome::GroupDeleted;
        }

        if !self.parallel {
            return RemoveOutcome::Kept(SplitOutcome::NotAttempted);
        }

        RemoveOutcome::Kept(self.try_split(id, store))
    }

    /// Retry every split that previously ran out of budget.
    ///
    /// With a zero budget no search can make progress, so pending groups
    /// are left alone until the budget is raised.
    pub fn retry_pending_splits(&mut self, store: &CellStore) -> usize {
        if self.split_budget.is_zero() {
            return 0;
        }
        let pending: Vec<GroupId> = self
            .groups
            .iter()
            .filter(|(_, g)| g.is_split_pending())
            .map(|(id, _)| id)
            .collect();
        pending
            .into_iter()
            .map(|id| self.try_split(id, store).new_groups())
            .sum()
    }

    /// Time-boxed connectivity search over group `id`.
    ///
    /// Repeatedly flood-fills one component from the remaining members. Each
    /// completed component that is not the last becomes a new group. When the
    /// deadline passes, completed components are still applied and the group
    /// stays marked `split_pending` for a later attempt.
    pub fn try_split(&mut self, id: GroupId, store: &CellStore) -> SplitOutcome {
        let deadline = Instant::now() + self.split_budget;
        let spacing = self.min_spacing;

        let Some(group) = self.groups.get_mut(id) else {
            return SplitOutcome::Connected;
        };
        if group.is_isolated() || group.len() <= 1 {
            group.set_split_pending(false);
            return SplitOutcome::Connected;
        }
        let already_deferred = group.is_split_pending();

        let mut remaining: AHashSet<CellKey> = group.member_set().clone();
        let mut components: Vec<AHashSet<CellKey>> = Vec::new();
        let mut timed_out = false;
        let mut steps = 0usize;

        'search: loop {
            if Instant::now() >= deadline {
                timed_out = true;
                break;
            }
            let Some(seed) = remaining.iter().next().copied() else {
                break;
            };
            remaining.remove(&seed);

            let mut component = AHashSet::new();
            component.insert(seed);
            let mut frontier = VecDeque::from([seed]);

            while let Some(current) = frontier.pop_front() {
                steps += 1;
                if steps % SPLIT_CHECK_INTERVAL == 0 && Instant::now() >= deadline {
                    timed_out = true;
                    break 'search;
                }
                let mut reached: SmallVec<[CellKey; 16]> = SmallVec::new();
                for_each_within(&remaining, current.coord, spacing, |k| reached.push(k));
                for k in reached {
                    remaining.remove(&k);
                    component.insert(k);
                    frontier.push_back(k);
                }
            }

            if remaining.is_empty() {
                // Last component stays in the original group
                break;
            }
            components.push(component);
        }

        let new_groups = components.len();
        for component in components {
            let split = match self.groups.get_mut(id) {
                Some(group) => group.extract(component),
                None => break,
            };
            let new_id = self.groups.insert(split);
            for member in self.groups[new_id].members() {
                self.membership.insert(*member, new_id);
                if let Some(cell) = store.get(member) {
                    cell.set_group(Some(new_id));
                }
            }
        }

        if let Some(group) = self.groups.get_mut(id) {
            group.set_split_pending(timed_out);
        }

        if timed_out {
            // Warn once per deferral; retries of the same group stay quiet
            if already_deferred {
                tracing::debug!(?id, new_groups, steps, "split retry deferred again");
            } else {
                tracing::warn!(
                    ?id,
                    budget = ?self.split_budget,
                    new_groups,
                    steps,
                    "group split search exceeded its budget; remainder deferred"
                );
            }
            SplitOutcome::Deferred { new_groups }
        } else if new_groups > 0 {
            tracing::debug!(?id, new_groups, "group split after removal");
            SplitOutcome::Split { new_groups }
        } else {
            SplitOutcome::Connected
        }
    }

    // ------------------------------------------------------------------
    // Verification
    // ------------------------------------------------------------------

    /// Sum of group sizes must equal the number of grouped live cells
    pub fn verify_conservation(&self, store: &CellStore) -> std::result::Result<(), InvariantViolation> {
        let grouped = self.grouped_cell_count();
        let active = store.settled_len();
        if grouped != active || self.membership.len() != grouped {
            return Err(InvariantViolation::Conservation { grouped, active });
        }
        Ok(())
    }

    /// No two distinct overworld groups hold cells closer than the spacing
    pub fn verify_separation(&self) -> std::result::Result<(), InvariantViolation> {
        let overworld: Vec<&Group> = self.groups.values().filter(|g| !g.is_isolated()).collect();

        for (i, a) in overworld.iter().enumerate() {
            for b in &overworld[i + 1..] {
                if let (Some(ba), Some(bb)) = (a.bounds(), b.bounds()) {
                    if ba.gap(&bb) >= self.min_spacing {
                        continue;
                    }
                }
                let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
                for key in small.members() {
                    if let Some((other, distance)) = large.nearest_member(key.coord) {
                        if distance < self.min_spacing {
                            return Err(InvariantViolation::Separation {
                                a: *key,
                                b: other,
                                distance,
                                min_spacing: self.min_spacing,
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Every member's back-reference matches the index and the cell's own group id
    pub fn verify_membership(&self, store: &CellStore) -> std::result::Result<(), InvariantViolation> {
        for (id, group) in &self.groups {
            for key in group.members() {
                let indexed = self.membership.get(key) == Some(&id);
                let cell_agrees = store.get(key).map_or(true, |c| c.group() == Some(id));
                if !indexed || !cell_agrees {
                    return Err(InvariantViolation::Membership { key: *key });
                }
            }
        }
        Ok(())
    }

    /// Run every invariant check
    pub fn check_invariants(&self, store: &CellStore) -> Result<()> {
        self.verify_conservation(store)?;
        self.verify_separation()?;
        self.verify_membership(store)?;
        Ok(())
    }
}
