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

//! End-to-end tick scenarios

#[cfg(test)]
mod tests {
    #![allow(clippy::module_inception)]
    use crate::{
        Cell, CellContent, CellKey, EmptyLoader, ObjectId, RelocationBuffer, Result,
        SchedulerConfig, TickContext, TickHooks, TickPhase, World,
    };
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(x: i32, y: i32) -> CellKey {
        CellKey::at(x, y).unwrap()
    }

    fn config(parallel: bool) -> SchedulerConfig {
        SchedulerConfig {
            min_spacing: 2,
            parallel,
            parallel_physics: parallel,
            worker_threads: Some(4),
            ..SchedulerConfig::default()
        }
    }

    /// Loader that puts one object in each overworld cell on a multiple of 10
    fn seeded_loader(k: CellKey) -> Result<CellContent> {
        let (x, y) = (k.coord.x, k.coord.y);
        let objects = if x % 10 == 0 && y % 10 == 0 && k.variant.is_none() {
            vec![ObjectId((u64::from(x) << 8) | u64::from(y))]
        } else {
            Vec::new()
        };
        Ok(CellContent { objects })
    }

    #[derive(Default)]
    struct PhaseLog {
        events: Mutex<Vec<(u64, TickPhase, CellKey)>>,
    }

    impl TickHooks for PhaseLog {
        fn physics(&self, ctx: &TickContext<'_>, cell: &Cell, _relocations: &mut RelocationBuffer) {
            self.events.lock().push((ctx.tick, TickPhase::Physics, cell.key()));
        }

        fn parallel(&self, ctx: &TickContext<'_>, cell: &Cell) {
            self.events.lock().push((ctx.tick, TickPhase::Parallel, cell.key()));
        }

        fn sequential(&self, ctx: &TickContext<'_>, cell: &Cell) {
            self.events.lock().push((ctx.tick, TickPhase::Sequential, cell.key()));
        }
    }

    #[test]
    fn test_merge_scenario_through_world() -> Result<()> {
        let mut world = World::with_config(config(true))?;
        world.load(key(10, 10), false, false)?;
        world.load(key(10, 20), false, false)?;
        world.tick()?;
        assert_eq!(world.group_count(), 2);

        world.load(key(10, 11), false, false)?;
        let profile = world.tick()?;
        assert_eq!(profile.cells_added, 1);
        assert_eq!(world.group_count(), 2);

        let partition = world.partitioner();
        assert_eq!(partition.group_of(&key(10, 10)), partition.group_of(&key(10, 11)));
        world.check_invariants()?;
        Ok(())
    }

    #[test]
    fn test_isolated_instance_ticks_in_its_own_group() -> Result<()> {
        let mut world = World::with_config(config(true))?;
        let overworld = key(30, 30);
        let instance = CellKey::instanced(overworld.coord, 9);
        world.load(overworld, true, false)?;
        world.load(instance, true, false)?;
        let profile = world.tick()?;

        // 9 overworld cells in one group plus the instance alone
        assert_eq!(profile.groups, 2);
        assert_eq!(profile.cells, 10);
        let id = world.partitioner().group_of(&instance).unwrap();
        assert!(world.partitioner().group(id).unwrap().is_isolated());
        Ok(())
    }

    #[test]
    fn test_phase_order_within_tick() -> Result<()> {
        for parallel in [false, true] {
            let log = Arc::new(PhaseLog::default());
            let mut world = World::new(
                config(parallel),
                Box::new(EmptyLoader),
                Box::new(Arc::clone(&log)),
            )?;
            for k in [key(1, 1), key(1, 2), key(40, 40), key(90, 90)] {
                world.load(k, false, false)?;
            }
            world.tick()?;
            world.tick()?;

            let events = log.events.lock();
            assert_eq!(events.len(), 2 * 3 * 4);
            let rank = |phase: TickPhase| phase as usize;
            for pair in events.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                assert!(
                    (a.0, rank(a.1)) <= (b.0, rank(b.1)),
                    "phase {} of tick {} logged after phase {} of tick {}",
                    b.1,
                    b.0,
                    a.1,
                    a.0
                );
            }
        }
        Ok(())
    }

    /// Moves every object one cell east during physics and counts objects
    /// seen in the parallel phase
    #[derive(Default)]
    struct Drift {
        seen: AtomicUsize,
    }

    impl TickHooks for Drift {
        fn physics(&self, _ctx: &TickContext<'_>, cell: &Cell, relocations: &mut RelocationBuffer) {
            let Some(east) = cell.coord().offset(1, 0) else {
                return;
            };
            for object in cell.objects().iter() {
                relocations.push(*object, cell.key(), CellKey::overworld(east));
            }
        }

        fn parallel(&self, _ctx: &TickContext<'_>, cell: &Cell) {
            self.seen.fetch_add(cell.objects().len(), Ordering::SeqCst);
        }
    }

    #[test]
    fn test_relocation_feeds_back_into_partition() -> Result<()> {
        let drift = Arc::new(Drift::default());
        let mut world = World::new(
            config(true),
            Box::new(seeded_loader),
            Box::new(Arc::clone(&drift)),
        )?;
        world.load(key(20, 20), false, false)?;
        assert_eq!(world.store().get(&key(20, 20)).unwrap().object_count(), 1);

        let profile = world.tick()?;
        assert_eq!(profile.relocations, 1);
        // Destination loaded with adjacents; grouped next tick
        assert!(world.store().is_loaded(&key(21, 20)));
        assert!(world.store().is_loaded(&key(22, 21)));
        assert_eq!(world.store().get(&key(21, 20)).unwrap().object_count(), 1);
        // Only (20, 20) was ticked, and its object had already moved on
        assert_eq!(drift.seen.load(Ordering::SeqCst), 0);

        let profile = world.tick()?;
        assert_eq!(profile.cells_added, 8);
        assert_eq!(profile.relocations, 1);
        world.check_invariants()?;
        Ok(())
    }

    /// Reaches into a fixed cell from every other cell's parallel callback
    struct Trespasser {
        target: CellKey,
    }

    impl TickHooks for Trespasser {
        fn parallel(&self, ctx: &TickContext<'_>, cell: &Cell) {
            if cell.key() == self.target {
                return;
            }
            if let Some(target) = ctx.store().get(&self.target) {
                let _objects = target.objects();
            }
        }
    }

    #[test]
    fn test_cross_group_access_is_reported() -> Result<()> {
        let target = key(100, 100);
        let mut world = World::new(
            config(true),
            Box::new(EmptyLoader),
            Box::new(Trespasser { target }),
        )?;
        world.load(target, false, false)?;
        world.load(key(10, 10), false, false)?;
        world.load(key(101, 100), false, false)?;
        world.tick()?;

        // (101, 100) shares the target's group, (10, 10) does not
        let violations = world.store().get(&target).unwrap().access_violations();
        assert_eq!(violations, 1);
        Ok(())
    }

    /// Requests its own unload from the sequential phase
    struct SelfDestruct;

    impl TickHooks for SelfDestruct {
        fn sequential(&self, ctx: &TickContext<'_>, cell: &Cell) {
            if cell.key().coord.y == 0 {
                ctx.request_unload(cell.key());
            }
        }
    }

    #[test]
    fn test_unload_requested_from_callback() -> Result<()> {
        let mut world = World::new(config(false), Box::new(EmptyLoader), Box::new(SelfDestruct))?;
        world.load(key(5, 0), false, false)?;
        world.load(key(5, 1), false, false)?;
        world.load(key(5, 2), false, false)?;

        let profile = world.tick()?;
        assert_eq!(profile.cells_unloaded, 1);
        assert!(!world.store().is_loaded(&key(5, 0)));
        assert_eq!(world.store().get(&key(5, 1)).unwrap().neighbors().as_slice(), &[key(5, 2)]);
        world.check_invariants()?;
        Ok(())
    }

    #[test]
    fn test_sequential_and_parallel_agree_on_partition() -> Result<()> {
        let keys: Vec<CellKey> = (0..40).map(|i| key((i * 7) % 60, (i * 13) % 60)).collect();
        let mut summaries = Vec::new();
        for parallel in [false, true] {
            let mut world = World::with_config(config(parallel))?;
            for k in &keys {
                world.load(*k, false, false)?;
            }
            world.tick()?;
            world.check_invariants()?;
            let mut sizes: Vec<usize> = world.summaries().iter().map(|s| s.len).collect();
            sizes.sort_unstable();
            summaries.push(sizes);
        }
        assert_eq!(summaries[0], summaries[1]);
        Ok(())
    }

    #[test]
    fn test_profiler_collects_every_phase() -> Result<()> {
        let mut world = World::with_config(config(false))?;
        world.load(key(3, 3), false, false)?;
        for _ in 0..3 {
            world.tick()?;
        }
        for phase in TickPhase::ALL {
            let stats = world.profiler().stats(phase).unwrap();
            assert_eq!(stats.call_count, 3, "{phase}");
        }
        assert_eq!(world.diagnostics().sample_count(), 3);
        Ok(())
    }
}
