#![allow(dead_code, unused_imports)]

use landblock_scheduler::{Cell, CellKey, RelocationBuffer, SchedulerConfig, TickContext, TickHooks, World};
use std::{fs::File, time::Instant};

#[cfg(feature = "profiling")]
use tracing_subscriber::{self, prelude::*};

/// Walks every object one cell east each tick
struct Wander;

impl TickHooks for Wander {
    fn physics(&self, _ctx: &TickContext<'_>, cell: &Cell, relocations: &mut RelocationBuffer) {
        if let Some(east) = cell.coord().offset(1, 0) {
            for object in cell.objects().iter() {
                relocations.push(*object, cell.key(), CellKey::overworld(east));
            }
        }
    }
}

#[cfg(feature = "profiling")]
#[tracing::instrument(skip(world))]
fn profile_ticks(world: &mut World, count: usize) {
    let _span = tracing::info_span!("tick_loop", count = count).entered();
    for i in 0..count {
        let profile = world.tick().unwrap();
        if i % 100 == 0 {
            tracing::info!(
                "Tick {}/{}: {} groups, {} cells, {:?}",
                i,
                count,
                profile.groups,
                profile.cells,
                profile.total
            );
        }
    }
}

#[cfg(feature = "profiling")]
fn main() {
    // Set up tracing subscriber to write to a file
    let file = File::create("trace.json").unwrap();
    let (non_blocking, _guard) = tracing_appender::non_blocking(file);
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("trace")),
        )
        .init();

    let config = SchedulerConfig {
        idle_unload_ticks: Some(50),
        ..SchedulerConfig::default()
    };
    let loader = |key: CellKey| -> landblock_scheduler::Result<landblock_scheduler::CellContent> {
        let objects = if key.coord.x == 0 {
            vec![landblock_scheduler::ObjectId(u64::from(key.coord.y))]
        } else {
            Vec::new()
        };
        Ok(landblock_scheduler::CellContent { objects })
    };
    let mut world = World::new(config, Box::new(loader), Box::new(Wander)).unwrap();

    println!("Warming up...");
    {
        let _span = tracing::info_span!("warmup").entered();
        for y in (0..250).step_by(25) {
            world.load(CellKey::at(0, y).unwrap(), true, false).unwrap();
        }
        world.tick().unwrap();
    }

    println!("Profiling 1000 ticks of wandering objects...");
    let start = Instant::now();
    profile_ticks(&mut world, 1_000);
    println!("1000 ticks complete in: {:?}", start.elapsed());
    world.diagnostics().log();
}

#[cfg(not(feature = "profiling"))]
fn main() {
    println!("profile_tick binary requires --features profiling");
}
