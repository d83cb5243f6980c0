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

//! Tick executor and phase profiling
//!
//! Runs the per-cell callbacks of one phase over a frozen list of groups.
//! In parallel mode each group is one rayon task and the cells of a group run
//! in order on that task; joining the parallel iterator is the phase barrier.

use std::fmt;
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::destruction::DestructionQueue;
use crate::diagnostics::GroupScope;
use crate::error::Result;
use crate::partition::GroupBatch;
use crate::relocation::RelocationBuffer;
use crate::simulation::{TickContext, TickHooks};
use crate::store::CellStore;

#[cfg(feature = "parallel")]
use crate::error::SchedulerError;
#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Stage of a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TickPhase {
    /// Pending additions folded into the partition
    Partition,
    Physics,
    Parallel,
    Sequential,
    Unload,
}

impl TickPhase {
    pub const ALL: [TickPhase; 5] = [
        TickPhase::Partition,
        TickPhase::Physics,
        TickPhase::Parallel,
        TickPhase::Sequential,
        TickPhase::Unload,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TickPhase::Partition => "partition",
            TickPhase::Physics => "physics",
            TickPhase::Parallel => "parallel",
            TickPhase::Sequential => "sequential",
            TickPhase::Unload => "unload",
        }
    }
}

impl fmt::Display for TickPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Phase timing statistics
#[derive(Debug, Clone, Serialize)]
pub struct PhaseStats {
    pub min: Duration,
    pub max: Duration,
    pub avg: Duration,
    pub call_count: u64,
}

/// Collects per-phase timings across ticks
#[derive(Debug, Default)]
pub struct PhaseProfiler {
    timings: FxHashMap<TickPhase, Vec<Duration>>,
    call_counts: FxHashMap<TickPhase, u64>,
    max_samples: usize,
}

impl PhaseProfiler {
    pub fn new() -> Self {
        Self::with_window(600)
    }

    /// Keep at most `max_samples` timings per phase
    pub fn with_window(max_samples: usize) -> Self {
        Self {
            timings: FxHashMap::default(),
            call_counts: FxHashMap::default(),
            max_samples: max_samples.max(1),
        }
    }

    pub fn record(&mut self, phase: TickPhase, duration: Duration) {
        let samples = self.timings.entry(phase).or_default();
        if samples.len() == self.max_samples {
            samples.remove(0);
        }
        samples.push(duration);
        *self.call_counts.entry(phase).or_insert(0) += 1;
    }

    pub fn stats(&self, phase: TickPhase) -> Option<PhaseStats> {
        let timings = self.timings.get(&phase)?;
        if timings.is_empty() {
            return None;
        }

        let min = timings.iter().min().copied().unwrap_or(Duration::ZERO);
        let max = timings.iter().max().copied().unwrap_or(Duration::ZERO);
        let avg = timings.iter().sum::<Duration>() / timings.len() as u32;

        Some(PhaseStats {
            min,
            max,
            avg,
            call_count: self.call_counts.get(&phase).copied().unwrap_or(0),
        })
    }

    pub fn clear(&mut self) {
        self.timings.clear();
        self.call_counts.clear();
    }
}

/// Duration of one phase within one tick
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PhaseTiming {
    pub phase: TickPhase,
    pub duration: Duration,
}

/// What happened during one tick
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickProfile {
    pub tick: u64,
    pub phases: Vec<PhaseTiming>,
    pub groups: usize,
    pub cells: usize,
    pub cells_added: usize,
    pub groups_merged: usize,
    pub relocations: usize,
    pub cells_unloaded: usize,
    pub groups_split: usize,
    pub total: Duration,
}

impl TickProfile {
    pub fn phase(&self, phase: TickPhase) -> Option<Duration> {
        self.phases
            .iter()
            .find(|t| t.phase == phase)
            .map(|t| t.duration)
    }
}

/// Borrowed state a phase needs
#[derive(Clone, Copy)]
pub struct PhaseInput<'a> {
    pub tick: u64,
    pub batches: &'a [GroupBatch],
    pub hooks: &'a dyn TickHooks,
    pub store: &'a CellStore,
    pub destruction: &'a DestructionQueue,
}

/// Runs the physics, parallel and sequential phases over a group list
pub struct TickExecutor {
    #[cfg(feature = "parallel")]
    pool: Option<rayon::ThreadPool>,
    parallel_physics: bool,
}

impl TickExecutor {
    /// Build the executor. With `parallel`, a bounded worker pool of
    /// `worker_threads` (rayon's default when None) is created.
    pub fn new(parallel: bool, parallel_physics: bool, worker_threads: Option<usize>) -> Result<Self> {
        #[cfg(feature = "parallel")]
        {
            let pool = if parallel {
                let mut builder = rayon::ThreadPoolBuilder::new()
                    .thread_name(|i| format!("landblock-worker-{i}"));
                if let Some(threads) = worker_threads {
                    builder = builder.num_threads(threads);
                }
                Some(
                    builder
                        .build()
                        .map_err(|e| SchedulerError::ThreadPool(e.to_string()))?,
                )
            } else {
                None
            };
            Ok(Self {
                pool,
                parallel_physics,
            })
        }

        #[cfg(not(feature = "parallel"))]
        {
            if parallel {
                tracing::warn!(
                    ?worker_threads,
                    "parallel ticking requested but the `parallel` feature is disabled; running sequentially"
                );
            }
            Ok(Self { parallel_physics })
        }
    }

    /// True when groups tick concurrently
    pub fn is_parallel(&self) -> bool {
        #[cfg(feature = "parallel")]
        {
            self.pool.is_some()
        }
        #[cfg(not(feature = "parallel"))]
        {
            false
        }
    }

    pub fn is_parallel_physics(&self) -> bool {
        self.is_parallel() && self.parallel_physics
    }

    /// Number of worker threads, 1 when sequential
    pub fn worker_count(&self) -> usize {
        #[cfg(feature = "parallel")]
        if let Some(pool) = &self.pool {
            return pool.current_num_threads();
        }
        1
    }

    /// Run physics for every group. Relocations from all groups are merged
    /// in group order and returned unapplied.
    pub fn run_physics(&self, input: PhaseInput<'_>) -> RelocationBuffer {
        let physics_group = |batch: &GroupBatch| -> RelocationBuffer {
            let _scope = GroupScope::enter(batch.id);
            let ctx = TickContext::new(input.tick, TickPhase::Physics, input.store, input.destruction);
            let mut relocations = RelocationBuffer::new();
            for cell in &batch.cells {
                input.hooks.physics(&ctx, cell, &mut relocations);
            }
            relocations
        };

        #[cfg(feature = "parallel")]
        if let Some(pool) = self.pool.as_ref().filter(|_| self.parallel_physics) {
            return pool.install(|| {
                input
                    .batches
                    .par_iter()
                    .map(physics_group)
                    .reduce(RelocationBuffer::new, |mut acc, mut next| {
                        acc.append(&mut next);
                        acc
                    })
            });
        }

        let mut relocations = RelocationBuffer::new();
        for batch in input.batches {
            relocations.append(&mut physics_group(batch));
        }
        relocations
    }

    /// Run the parallel gameplay phase, one task per group
    pub fn run_parallel(&self, input: PhaseInput<'_>) {
        let gameplay_group = |batch: &GroupBatch| {
            let _scope = GroupScope::enter(batch.id);
            let ctx = TickContext::new(input.tick, TickPhase::Parallel, input.store, input.destruction);
            for cell in &batch.cells {
                input.hooks.parallel(&ctx, cell);
            }
        };

        #[cfg(feature = "parallel")]
        if let Some(pool) = &self.pool {
            pool.install(|| input.batches.par_iter().for_each(gameplay_group));
            return;
        }

        input.batches.iter().for_each(gameplay_group);
    }

    /// Run the sequential phase on the calling thread, one group at a time
    pub fn run_sequential(&self, input: PhaseInput<'_>) {
        let ctx = TickContext::new(input.tick, TickPhase::Sequential, input.store, input.destruction);
        for batch in input.batches {
            let _scope = GroupScope::enter(batch.id);
            for cell in &batch.cells {
                input.hooks.sequential(&ctx, cell);
            }
        }
    }
}
