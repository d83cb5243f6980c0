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

//! World: owns the landblocks and drives the tick

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::info_span;

use crate::adjacency;
use crate::cell::Cell;
use crate::config::SchedulerConfig;
use crate::coord::CellKey;
use crate::destruction::DestructionQueue;
use crate::diagnostics::TickDiagnostics;
use crate::error::{Result, SchedulerError};
use crate::executor::{PhaseInput, PhaseProfiler, PhaseTiming, TickExecutor, TickPhase, TickProfile};
use crate::partition::{GroupSummary, Partitioner, RemoveOutcome};
use crate::simulation::{CellLoader, EmptyLoader, NoopHooks, TickHooks};
use crate::store::CellStore;
use crate::time::TickPacer;

/// The landblock world.
///
/// Owns the cell store, the partition, the executor and the destruction
/// queue. All partition mutation happens inside [`World::tick`] on the
/// calling thread; other threads interact through a [`WorldHandle`].
pub struct World {
    /// Live cells
    store: Arc<CellStore>,

    /// Group list, mutated only here
    partitioner: Partitioner,

    executor: TickExecutor,

    /// Cells to unload at the end of the tick
    destruction: Arc<DestructionQueue>,

    hooks: Box<dyn TickHooks>,

    config: SchedulerConfig,

    diagnostics: TickDiagnostics,

    profiler: PhaseProfiler,

    /// Last completed tick
    tick: u64,

    shutting_down: Arc<AtomicBool>,
}

impl World {
    /// Build a world and load the configured preload list.
    ///
    /// Preloaded cells are grouped before this returns.
    pub fn new(
        config: SchedulerConfig,
        loader: Box<dyn CellLoader>,
        hooks: Box<dyn TickHooks>,
    ) -> Result<Self> {
        config.validate()?;

        let executor = TickExecutor::new(
            config.parallel,
            config.parallel_physics,
            config.worker_threads,
        )?;
        let partitioner = Partitioner::new(
            config.min_spacing,
            config.split_budget(),
            executor.is_parallel(),
        );

        let mut world = Self {
            store: Arc::new(CellStore::new(loader)),
            partitioner,
            executor,
            destruction: Arc::new(DestructionQueue::new()),
            hooks,
            config,
            diagnostics: TickDiagnostics::new(),
            profiler: PhaseProfiler::new(),
            tick: 0,
            shutting_down: Arc::new(AtomicBool::new(false)),
        };

        for entry in &world.config.preload {
            let key = entry.key()?;
            world
                .store
                .get_or_load(key, entry.include_adjacents, entry.permaload)?;
        }
        if !world.config.preload.is_empty() {
            let report = world.partitioner.process_pending_additions(&world.store);
            tracing::info!(
                cells = report.added,
                groups = world.partitioner.group_count(),
                "preload complete"
            );
        }

        Ok(world)
    }

    /// World with empty cells and no-op hooks
    pub fn with_config(config: SchedulerConfig) -> Result<Self> {
        Self::new(config, Box::new(EmptyLoader), Box::new(NoopHooks))
    }

    pub fn handle(&self) -> WorldHandle {
        WorldHandle {
            store: Arc::clone(&self.store),
            destruction: Arc::clone(&self.destruction),
            shutting_down: Arc::clone(&self.shutting_down),
        }
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Run one full tick: partition, physics, parallel, sequential, unload.
    pub fn tick(&mut self) -> Result<TickProfile> {
        self.tick += 1;
        let tick = self.tick;
        let span = info_span!("world.tick", tick);
        let _span_guard = span.enter();

        let start = Instant::now();
        self.store.set_current_tick(tick);
        let mut profile = TickProfile {
            tick,
            ..TickProfile::default()
        };

        // Partition: fold in cells loaded since the last tick, then freeze
        let phase_start = Instant::now();
        let report = self.partitioner.process_pending_additions(&self.store);
        profile.cells_added = report.added;
        profile.groups_merged = report.merged;
        if self.partitioner.is_parallel() {
            profile.groups_split += self.partitioner.retry_pending_splits(&self.store);
        }
        let batches = self.partitioner.batches(&self.store);
        profile.groups = batches.len();
        profile.cells = batches.iter().map(|b| b.cells.len()).sum();
        Self::record_phase(&mut self.profiler, &mut profile, TickPhase::Partition, phase_start);

        let input = PhaseInput {
            tick,
            batches: &batches,
            hooks: self.hooks.as_ref(),
            store: &self.store,
            destruction: &self.destruction,
        };

        // Physics, then relocations on this thread after the barrier
        let phase_start = Instant::now();
        {
            let _phase = info_span!("phase.physics", groups = profile.groups).entered();
            let mut relocations = self.executor.run_physics(input);
            profile.relocations = relocations.apply(&self.store, tick);
        }
        Self::record_phase(&mut self.profiler, &mut profile, TickPhase::Physics, phase_start);

        let phase_start = Instant::now();
        {
            let _phase = info_span!("phase.parallel", groups = profile.groups).entered();
            self.executor.run_parallel(input);
        }
        Self::record_phase(&mut self.profiler, &mut profile, TickPhase::Parallel, phase_start);

        let phase_start = Instant::now();
        {
            let _phase = info_span!("phase.sequential").entered();
            self.executor.run_sequential(input);
        }
        Self::record_phase(&mut self.profiler, &mut profile, TickPhase::Sequential, phase_start);
        drop(batches);

        let phase_start = Instant::now();
        {
            let _phase = info_span!("phase.unload").entered();
            let (unloaded, splits) = self.unload(tick);
            profile.cells_unloaded = unloaded;
            profile.groups_split += splits;
        }
        Self::record_phase(&mut self.profiler, &mut profile, TickPhase::Unload, phase_start);

        profile.total = start.elapsed();
        let budget = self.config.tick_budget();
        self.diagnostics.record_tick(profile.total, budget);
        if profile.total > budget {
            tracing::warn!(
                tick,
                elapsed = ?profile.total,
                ?budget,
                groups = profile.groups,
                cells = profile.cells,
                "tick overran its budget"
            );
        }
        tracing::debug!(
            tick,
            groups = profile.groups,
            cells = profile.cells,
            added = profile.cells_added,
            unloaded = profile.cells_unloaded,
            relocations = profile.relocations,
            "tick complete"
        );

        Ok(profile)
    }

    fn record_phase(
        profiler: &mut PhaseProfiler,
        profile: &mut TickProfile,
        phase: TickPhase,
        start: Instant,
    ) {
        let duration = start.elapsed();
        profiler.record(phase, duration);
        profile.phases.push(PhaseTiming { phase, duration });
    }

    /// Drain the destruction queue through the remove path.
    /// Returns (cells unloaded, groups split off).
    fn unload(&mut self, tick: u64) -> (usize, usize) {
        if self.is_shutting_down() {
            // Cells loaded after shutdown began go too
            for key in self.store.keys() {
                self.destruction.enqueue(key);
            }
        } else if let Some(idle_ticks) = self.config.idle_unload_ticks {
            self.queue_idle_cells(tick, idle_ticks);
        }

        let mut unloaded = 0;
        let mut splits = 0;
        for key in self.destruction.drain() {
            let Some(cell) = self.store.unregister(&key) else {
                tracing::error!(cell = %key, "unload requested for a cell that is not loaded");
                continue;
            };

            if let RemoveOutcome::Kept(split) = self.partitioner.remove(&key, &self.store) {
                splits += split.new_groups();
            }
            adjacency::refresh_former_neighbors(&self.store, &cell.neighbors());
            cell.set_group(None);
            unloaded += 1;
            tracing::trace!(cell = %key, "cell unloaded");
        }

        #[cfg(debug_assertions)]
        if unloaded > 0 {
            if let Err(violation) = self.partitioner.verify_conservation(&self.store) {
                tracing::error!(%violation, "partition conservation check failed after unload");
            }
        }

        (unloaded, splits)
    }

    /// Queue grouped, non-permanent cells that have held no objects for
    /// `idle_ticks` ticks. An occupied cell keeps its loaded neighbors active
    /// too, so both sides of its boundary stay resident.
    fn queue_idle_cells(&self, tick: u64, idle_ticks: u64) {
        let cells = self.store.cells();
        for cell in cells.iter().filter(|c| c.object_count() > 0) {
            cell.touch(tick);
            for neighbor in cell.neighbors() {
                if let Some(neighbor) = self.store.get(&neighbor) {
                    neighbor.touch(tick);
                }
            }
        }

        for cell in &cells {
            if cell.object_count() > 0 || cell.is_permaload() || cell.group().is_none() {
                continue;
            }
            if tick.saturating_sub(cell.last_active_tick()) >= idle_ticks
                && self.destruction.enqueue(cell.key())
            {
                tracing::debug!(cell = %cell.key(), idle_ticks, "queueing idle cell for unload");
            }
        }
    }

    /// Tick at the configured rate until `stop` is set, or until a shutdown
    /// has fully drained. Returns the number of ticks run.
    pub fn run_until(&mut self, stop: &AtomicBool) -> Result<u64> {
        let mut pacer = TickPacer::new(self.config.tick_rate_hz);
        let mut last = Instant::now();
        let mut ran = 0;

        loop {
            if stop.load(Ordering::Acquire) || (self.is_shutting_down() && self.is_drained()) {
                break;
            }
            let now = Instant::now();
            let due = pacer.advance(now.duration_since(last));
            last = now;

            for _ in 0..due {
                self.tick()?;
                ran += 1;
                if stop.load(Ordering::Acquire) {
                    break;
                }
            }

            let wait = pacer.until_next_step();
            if wait > Duration::ZERO {
                thread::sleep(wait);
            }
        }

        self.diagnostics.log();
        Ok(ran)
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Queue every live cell for unload, permanent ones included.
    /// Subsequent ticks drain the world.
    pub fn begin_shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let keys = self.store.keys();
        tracing::info!(cells = keys.len(), "world shutdown started");
        for key in keys {
            self.destruction.enqueue(key);
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// No cells, groups or queued unloads remain
    pub fn is_drained(&self) -> bool {
        self.store.is_empty() && self.destruction.is_empty() && self.partitioner.group_count() == 0
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Load a cell from the tick thread. It joins the partition next tick.
    pub fn load(&self, key: CellKey, load_adjacents: bool, permaload: bool) -> Result<Arc<Cell>> {
        self.store.get_or_load(key, load_adjacents, permaload)
    }

    /// Live cell for `key`
    pub fn cell(&self, key: &CellKey) -> Result<Arc<Cell>> {
        self.store
            .get(key)
            .ok_or(SchedulerError::CellNotLoaded(*key))
    }

    pub fn request_unload(&self, key: CellKey) -> bool {
        self.destruction.enqueue(key)
    }

    pub fn store(&self) -> &CellStore {
        &self.store
    }

    pub fn partitioner(&self) -> &Partitioner {
        &self.partitioner
    }

    pub fn destruction(&self) -> &DestructionQueue {
        &self.destruction
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Last completed tick, 0 before the first
    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn diagnostics(&self) -> &TickDiagnostics {
        &self.diagnostics
    }

    pub fn profiler(&self) -> &PhaseProfiler {
        &self.profiler
    }

    pub fn executor(&self) -> &TickExecutor {
        &self.executor
    }

    pub fn group_count(&self) -> usize {
        self.partitioner.group_count()
    }

    pub fn summaries(&self) -> Vec<GroupSummary> {
        self.partitioner.summaries()
    }

    pub fn set_split_budget(&mut self, budget: Duration) {
        self.config.split_budget_us = u64::try_from(budget.as_micros()).unwrap_or(u64::MAX);
        self.partitioner.set_split_budget(budget);
    }

    /// Run every partition invariant check
    pub fn check_invariants(&self) -> Result<()> {
        self.partitioner.check_invariants(&self.store)
    }
}

/// Cloneable handle for threads outside the tick loop.
///
/// Loads and unload requests made through a handle take effect at the next
/// tick boundary.
#[derive(Clone)]
pub struct WorldHandle {
    store: Arc<CellStore>,
    destruction: Arc<DestructionQueue>,
    shutting_down: Arc<AtomicBool>,
}

impl WorldHandle {
    pub fn load(&self, key: CellKey, load_adjacents: bool, permaload: bool) -> Result<Arc<Cell>> {
        self.store.get_or_load(key, load_adjacents, permaload)
    }

    pub fn get(&self, key: &CellKey) -> Option<Arc<Cell>> {
        self.store.get(key)
    }

    pub fn is_loaded(&self, key: &CellKey) -> bool {
        self.store.is_loaded(key)
    }

    pub fn loaded_count(&self) -> usize {
        self.store.len()
    }

    pub fn request_unload(&self, key: CellKey) -> bool {
        self.destruction.enqueue(key)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PreloadEntry;
    use crate::ids::ObjectId;
    use crate::simulation::CellContent;

    fn key(x: i32, y: i32) -> CellKey {
        CellKey::at(x, y).unwrap()
    }

    fn config(parallel: bool) -> SchedulerConfig {
        SchedulerConfig {
            min_spacing: 2,
            parallel,
            ..SchedulerConfig::default()
        }
    }

    #[test]
    fn test_preload_is_grouped() {
        let mut cfg = config(false);
        cfg.preload
            .push(PreloadEntry::new(key(10, 10)).with_adjacents().permanent());
        cfg.preload.push(PreloadEntry::new(key(100, 100)));
        let world = World::with_config(cfg).unwrap();

        assert_eq!(world.store().len(), 10);
        assert_eq!(world.group_count(), 2);
        assert!(world.store().get(&key(10, 10)).unwrap().is_permaload());
        world.check_invariants().unwrap();
    }

    #[test]
    fn test_tick_groups_and_unloads() {
        let mut world = World::with_config(config(true)).unwrap();
        world.load(key(5, 5), false, false).unwrap();
        world.load(key(5, 6), false, false).unwrap();
        world.load(key(5, 7), false, false).unwrap();

        let profile = world.tick().unwrap();
        assert_eq!(profile.tick, 1);
        assert_eq!(profile.cells_added, 3);
        assert_eq!(profile.groups, 1);
        assert_eq!(profile.phases.len(), TickPhase::ALL.len());

        assert!(world.request_unload(key(5, 6)));
        let profile = world.tick().unwrap();
        assert_eq!(profile.cells_unloaded, 1);
        assert_eq!(profile.groups_split, 1);
        assert_eq!(world.group_count(), 2);
        assert!(world.store().get(&key(5, 5)).unwrap().neighbors().is_empty());
        world.check_invariants().unwrap();
    }

    #[test]
    fn test_unknown_unload_is_skipped() {
        let mut world = World::with_config(config(false)).unwrap();
        assert!(matches!(
            world.cell(&key(9, 9)),
            Err(SchedulerError::CellNotLoaded(_))
        ));
        world.request_unload(key(9, 9));
        let profile = world.tick().unwrap();
        assert_eq!(profile.cells_unloaded, 0);
        assert!(world.destruction().is_empty());
    }

    #[test]
    fn test_idle_cells_are_unloaded() {
        let mut cfg = config(false);
        cfg.idle_unload_ticks = Some(3);
        let mut world = World::with_config(cfg).unwrap();
        world.load(key(1, 1), false, false).unwrap();
        world.load(key(50, 50), false, true).unwrap();

        // Loaded at tick 0; idle for three ticks at the end of tick 3
        for _ in 0..2 {
            world.tick().unwrap();
        }
        assert!(world.store().is_loaded(&key(1, 1)));
        world.tick().unwrap();
        assert!(!world.store().is_loaded(&key(1, 1)));
        assert!(world.store().is_loaded(&key(50, 50)));
    }

    #[test]
    fn test_occupied_cell_keeps_neighbors_through_idle_sweep() {
        let mut cfg = config(false);
        cfg.idle_unload_ticks = Some(2);
        let loader = |k: CellKey| -> Result<CellContent> {
            let objects = if k == key(10, 10) { vec![ObjectId(1)] } else { Vec::new() };
            Ok(CellContent { objects })
        };
        let mut world = World::new(cfg, Box::new(loader), Box::new(NoopHooks)).unwrap();
        world.load(key(10, 10), true, false).unwrap();
        world.load(key(100, 100), false, false).unwrap();

        for _ in 0..4 {
            world.tick().unwrap();
        }
        for neighbor in adjacency::neighbor_keys(&key(10, 10)) {
            assert!(world.store().is_loaded(&neighbor), "{neighbor} was swept");
        }
        assert!(!world.store().is_loaded(&key(100, 100)));
        assert_eq!(world.store().len(), 9);
        world.check_invariants().unwrap();
    }

    #[test]
    fn test_reload_with_adjacents_after_neighbor_unload() {
        let mut world = World::with_config(config(true)).unwrap();
        world.load(key(10, 10), true, false).unwrap();
        world.tick().unwrap();

        world.request_unload(key(11, 10));
        world.tick().unwrap();
        assert!(!world.store().is_loaded(&key(11, 10)));

        world.load(key(10, 10), true, false).unwrap();
        assert!(world.store().is_loaded(&key(11, 10)));
        let profile = world.tick().unwrap();
        assert_eq!(profile.cells_added, 1);
        assert_eq!(world.store().get(&key(10, 10)).unwrap().neighbors().len(), 8);
        world.check_invariants().unwrap();
    }

    #[test]
    fn test_shutdown_drains_everything() {
        let mut world = World::with_config(config(true)).unwrap();
        let handle = world.handle();
        handle.load(key(3, 3), true, true).unwrap();
        world.tick().unwrap();
        assert!(!world.is_drained());

        world.begin_shutdown();
        assert!(handle.is_shutting_down());
        world.tick().unwrap();
        assert!(world.is_drained());
        assert_eq!(handle.loaded_count(), 0);
    }

    #[test]
    fn test_run_until_stops() {
        let mut cfg = config(false);
        cfg.tick_rate_hz = 200;
        let mut world = World::with_config(cfg).unwrap();
        let stop = AtomicBool::new(false);

        thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(60));
                stop.store(true, Ordering::Release);
            });
            let ran = world.run_until(&stop).unwrap();
            assert!(ran > 0);
        });
        assert!(world.current_tick() > 0);
    }

    #[test]
    fn test_handle_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WorldHandle>();
    }
}
