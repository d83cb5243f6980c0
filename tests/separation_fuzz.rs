use landblock_scheduler::{CellKey, SchedulerConfig, World};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::time::Duration;

fn random_key(rng: &mut ChaCha8Rng, extent: i32) -> CellKey {
    let x = rng.gen_range(0..extent);
    let y = rng.gen_range(0..extent);
    if rng.gen_bool(0.05) {
        let coord = CellKey::at(x, y).unwrap().coord;
        CellKey::instanced(coord, rng.gen_range(1..4))
    } else {
        CellKey::at(x, y).unwrap()
    }
}

/// Random loads and unloads; every tick must leave a valid partition
fn fuzz(seed: u64, min_spacing: u32, parallel: bool, split_budget: Duration) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let config = SchedulerConfig {
        min_spacing,
        parallel,
        worker_threads: Some(2),
        ..SchedulerConfig::default()
    };
    let mut world = World::with_config(config).unwrap();
    world.set_split_budget(split_budget);

    for round in 0..60 {
        for _ in 0..rng.gen_range(0..12) {
            let key = random_key(&mut rng, 48);
            let adjacents = rng.gen_bool(0.2);
            world.load(key, adjacents, false).unwrap();
        }

        let loaded = world.store().keys();
        if !loaded.is_empty() {
            for _ in 0..rng.gen_range(0..8) {
                let key = loaded[rng.gen_range(0..loaded.len())];
                world.request_unload(key);
            }
        }

        world.tick().unwrap();
        if let Err(err) = world.check_invariants() {
            panic!("seed {seed} round {round}: {err}");
        }
        assert_eq!(
            world.partitioner().grouped_cell_count(),
            world.store().len(),
            "seed {seed} round {round}: every live cell is grouped after a tick"
        );
    }
}

#[test]
fn test_fuzz_parallel_spacing_2() {
    for seed in 0..4 {
        fuzz(seed, 2, true, Duration::from_millis(50));
    }
}

#[test]
fn test_fuzz_parallel_spacing_5() {
    for seed in 10..14 {
        fuzz(seed, 5, true, Duration::from_millis(50));
    }
}

#[test]
fn test_fuzz_sequential() {
    for seed in 20..23 {
        fuzz(seed, 3, false, Duration::from_millis(50));
    }
}

#[test]
fn test_fuzz_zero_split_budget_keeps_separation() {
    for seed in 30..33 {
        fuzz(seed, 3, true, Duration::ZERO);
    }
}
