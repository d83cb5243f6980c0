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

//! Concurrency diagnostics and tick timing.
//!
//! Each worker publishes the group it is ticking in a thread-local slot
//! through [`GroupScope`]. [`Cell::objects`](crate::cell::Cell::objects)
//! consults that slot, so a callback reaching into another group's cell
//! during a parallel phase is logged instead of silently racing.

use std::cell::Cell as ThreadCell;
use std::collections::VecDeque;
use std::time::Duration;

use crate::cell::Cell;
use crate::ids::GroupId;

thread_local! {
    static CURRENT_GROUP: ThreadCell<Option<GroupId>> = const { ThreadCell::new(None) };
}

/// RAII guard publishing the group the current thread is ticking.
///
/// The previous value is restored on drop so nested scopes (a sequential
/// phase running on the tick thread inside a test harness, say) behave.
pub struct GroupScope {
    previous: Option<GroupId>,
}

impl GroupScope {
    pub fn enter(group: GroupId) -> Self {
        let previous = CURRENT_GROUP.with(|slot| slot.replace(Some(group)));
        Self { previous }
    }
}

impl Drop for GroupScope {
    fn drop(&mut self) {
        CURRENT_GROUP.with(|slot| slot.set(self.previous));
    }
}

/// Group the calling thread is currently ticking, if any
pub fn current_group() -> Option<GroupId> {
    CURRENT_GROUP.with(|slot| slot.get())
}

/// Report access to `cell` from a worker that is ticking a different group.
///
/// Returns false when a violation was detected. Cells that are not grouped
/// yet (loaded mid-tick) are not checked.
pub fn check_cell_access(cell: &Cell) -> bool {
    let Some(ticking) = current_group() else {
        return true;
    };
    match cell.group() {
        Some(owner) if owner != ticking => {
            cell.record_access_violation();
            tracing::error!(
                cell = %cell.key(),
                ?owner,
                ?ticking,
                "cross-group cell access during tick; partition spacing invariant not protecting this path"
            );
            false
        }
        _ => true,
    }
}

/// Rolling tick-time statistics
#[derive(Clone, Debug)]
pub struct TickDiagnostics {
    tick_times: VecDeque<Duration>,
    max_samples: usize,
    overruns: u64,
}

impl Default for TickDiagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl TickDiagnostics {
    pub fn new() -> Self {
        Self::with_window(120)
    }

    pub fn with_window(max_samples: usize) -> Self {
        Self {
            tick_times: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
            overruns: 0,
        }
    }

    /// Record a completed tick and whether it blew the budget
    pub fn record_tick(&mut self, time: Duration, budget: Duration) {
        self.tick_times.push_back(time);
        if self.tick_times.len() > self.max_samples {
            self.tick_times.pop_front();
        }
        if time > budget {
            self.overruns += 1;
        }
    }

    pub fn avg_tick_time(&self) -> Duration {
        if self.tick_times.is_empty() {
            return Duration::ZERO;
        }
        self.tick_times.iter().sum::<Duration>() / self.tick_times.len() as u32
    }

    pub fn max_tick_time(&self) -> Duration {
        self.tick_times.iter().copied().max().unwrap_or(Duration::ZERO)
    }

    pub fn min_tick_time(&self) -> Duration {
        self.tick_times.iter().copied().min().unwrap_or(Duration::ZERO)
    }

    /// Ticks over budget since creation
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    pub fn sample_count(&self) -> usize {
        self.tick_times.len()
    }

    pub fn log(&self) {
        tracing::info!(
            avg = ?self.avg_tick_time(),
            min = ?self.min_tick_time(),
            max = ?self.max_tick_time(),
            overruns = self.overruns,
            "tick diagnostics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::CellKey;
    use slotmap::SlotMap;

    #[test]
    fn test_group_scope_restores_previous() {
        let mut ids: SlotMap<GroupId, ()> = SlotMap::with_key();
        let a = ids.insert(());
        let b = ids.insert(());

        assert_eq!(current_group(), None);
        {
            let _outer = GroupScope::enter(a);
            assert_eq!(current_group(), Some(a));
            {
                let _inner = GroupScope::enter(b);
                assert_eq!(current_group(), Some(b));
            }
            assert_eq!(current_group(), Some(a));
        }
        assert_eq!(current_group(), None);
    }

    #[test]
    fn test_cross_group_access_detected() {
        let mut ids: SlotMap<GroupId, ()> = SlotMap::with_key();
        let mine = ids.insert(());
        let other = ids.insert(());

        let cell = Cell::new(CellKey::at(5, 5).unwrap(), Vec::new(), 0);
        cell.set_group(Some(other));

        // Outside any scope nothing is checked
        assert!(check_cell_access(&cell));

        let _scope = GroupScope::enter(mine);
        assert!(!check_cell_access(&cell));
        assert_eq!(cell.access_violations(), 1);

        cell.set_group(Some(mine));
        assert!(check_cell_access(&cell));
        assert_eq!(cell.access_violations(), 1);
    }

    #[test]
    fn test_tick_diagnostics_window() {
        let mut diag = TickDiagnostics::with_window(3);
        let budget = Duration::from_millis(50);
        for ms in [10, 20, 30, 60] {
            diag.record_tick(Duration::from_millis(ms), budget);
        }
        assert_eq!(diag.sample_count(), 3);
        assert_eq!(diag.min_tick_time(), Duration::from_millis(20));
        assert_eq!(diag.max_tick_time(), Duration::from_millis(60));
        assert_eq!(diag.avg_tick_time(), Duration::from_millis(110) / 3);
        assert_eq!(diag.overruns(), 1);
    }
}
