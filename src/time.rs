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

//! Fixed-rate tick pacing.
//!
//! ```
//! use landblock_scheduler::time::TickPacer;
//! use std::time::Duration;
//!
//! let mut pacer = TickPacer::new(20); // 20 Hz
//! assert_eq!(pacer.advance(Duration::from_millis(120)), 2);
//! assert_eq!(pacer.until_next_step(), Duration::from_millis(30));
//! ```

use std::time::Duration;

/// Default cap on ticks run back to back to catch up
const DEFAULT_MAX_CATCH_UP: usize = 5;

/// Fixed timestep accumulator for the tick loop
#[derive(Clone, Debug)]
pub struct TickPacer {
    /// Fixed timestep duration
    timestep: Duration,
    /// Real time not yet consumed by a tick
    accumulator: Duration,
    max_catch_up: usize,
    /// Ticks skipped because the loop fell too far behind
    dropped: u64,
}

impl TickPacer {
    /// Pacer for `hz` ticks per second
    pub fn new(hz: u32) -> Self {
        Self::from_duration(Duration::from_secs(1) / hz.max(1))
    }

    pub fn from_duration(timestep: Duration) -> Self {
        Self {
            timestep: timestep.max(Duration::from_nanos(1)),
            accumulator: Duration::ZERO,
            max_catch_up: DEFAULT_MAX_CATCH_UP,
            dropped: 0,
        }
    }

    /// Limit how many ticks one `advance` may ask for
    pub fn with_max_catch_up(mut self, max: usize) -> Self {
        self.max_catch_up = max.max(1);
        self
    }

    /// Add elapsed real time and return how many ticks are due.
    ///
    /// A backlog past the catch-up limit is dropped rather than replayed.
    pub fn advance(&mut self, elapsed: Duration) -> usize {
        self.accumulator += elapsed;

        let mut steps = 0;
        while self.accumulator >= self.timestep {
            self.accumulator -= self.timestep;
            steps += 1;
        }

        if steps > self.max_catch_up {
            let skipped = steps - self.max_catch_up;
            self.dropped += skipped as u64;
            tracing::warn!(
                skipped,
                timestep = ?self.timestep,
                "tick loop fell behind; dropping backlog"
            );
            steps = self.max_catch_up;
        }
        steps
    }

    /// Time to sleep before the next tick is due
    pub fn until_next_step(&self) -> Duration {
        self.timestep.saturating_sub(self.accumulator)
    }

    pub fn timestep(&self) -> Duration {
        self.timestep
    }

    /// Unconsumed time as a fraction of the timestep (0.0 to 1.0)
    pub fn overstep_fraction(&self) -> f32 {
        self.accumulator.as_secs_f32() / self.timestep.as_secs_f32()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for TickPacer {
    fn default() -> Self {
        Self::new(20)
    }
}
