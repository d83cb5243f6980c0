use criterion::{criterion_group, criterion_main, Criterion};
use landblock_scheduler::{Cell, CellKey, EmptyLoader, SchedulerConfig, TickContext, TickHooks, World};
use std::hint::black_box;

/// Fixed amount of busy work per cell
struct BusyHooks;

impl TickHooks for BusyHooks {
    fn parallel(&self, _ctx: &TickContext<'_>, cell: &Cell) {
        let mut acc = u64::from(cell.coord().x);
        for i in 0..20_000u64 {
            acc = acc.wrapping_mul(6364136223846793005).wrapping_add(i);
        }
        black_box(acc);
    }
}

fn world(parallel: bool) -> World {
    let config = SchedulerConfig {
        min_spacing: 3,
        parallel,
        ..SchedulerConfig::default()
    };
    let mut world = World::new(config, Box::new(EmptyLoader), Box::new(BusyHooks)).unwrap();
    // 64 well separated 3x3 blocks
    for cx in (0..240).step_by(30) {
        for cy in (0..240).step_by(30) {
            world
                .load(CellKey::at(cx + 1, cy + 1).unwrap(), true, false)
                .unwrap();
        }
    }
    world.tick().unwrap();
    world
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");

    let mut sequential = world(false);
    group.bench_function("sequential", |b| {
        b.iter(|| {
            sequential.tick().unwrap();
        })
    });

    let mut parallel = world(true);
    group.bench_function("parallel", |b| {
        b.iter(|| {
            parallel.tick().unwrap();
        })
    });

    group.finish();
}

criterion_group!(benches, bench_tick);
criterion_main!(benches);
