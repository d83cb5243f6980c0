//! Example: load a few landblocks, tick them, and watch the groups change
//!
//! Run with `cargo run --example basic_world`

use landblock_scheduler::prelude::*;

/// Counts objects seen in the parallel phase
struct Census;

impl TickHooks for Census {
    fn parallel(&self, ctx: &TickContext<'_>, cell: &Cell) {
        let objects = cell.objects().len();
        if objects > 0 && ctx.tick % 10 == 0 {
            println!("  tick {}: {} holds {} objects", ctx.tick, cell.key(), objects);
        }
    }
}

fn main() -> Result<()> {
    let config = SchedulerConfig::from_json_str(
        r#"{
            "min_spacing": 3,
            "preload": [ { "landblock": 2130771967, "include_adjacents": true, "permaload": true } ]
        }"#,
    )?;

    let loader = |key: CellKey| -> Result<CellContent> {
        Ok(CellContent {
            objects: vec![ObjectId(u64::from(key.coord.landblock_id()))],
        })
    };
    let mut world = World::new(config, Box::new(loader), Box::new(Census))?;
    println!("Preloaded {} cells in {} groups", world.store().len(), world.group_count());

    // Two distant towns and an instanced dungeon
    world.load(CellKey::at(10, 10)?, true, false)?;
    world.load(CellKey::at(200, 40)?, true, false)?;
    world.load(CellKey::instanced(CellCoord::new(10, 10)?, 1), false, false)?;

    for _ in 0..20 {
        let profile = world.tick()?;
        if profile.tick % 10 == 0 {
            println!(
                "Tick {}: {} groups, {} cells, {:?}",
                profile.tick, profile.groups, profile.cells, profile.total
            );
        }
    }

    for summary in world.summaries() {
        println!(
            "Group {:?}: {} cells, isolated: {}",
            summary.id, summary.len, summary.isolated
        );
    }

    world.begin_shutdown();
    world.tick()?;
    println!("Drained: {}", world.is_drained());
    Ok(())
}
