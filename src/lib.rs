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

//! Landblock Scheduler - partitioned parallel ticking for world servers
//!
//! Keeps loaded landblocks in groups that are at least `min_spacing` apart,
//! so each group can tick on its own worker without locking, and drives the
//! physics / parallel / sequential / unload tick phases over those groups.

pub mod adjacency;
pub mod cell;
pub mod config;
pub mod coord;
pub mod destruction;
pub mod diagnostics;
pub mod error;
pub mod executor;
pub mod group;
pub mod ids;
pub mod partition;
pub mod prelude;
pub mod relocation;
pub mod simulation;
pub mod store;
pub mod time;
pub mod world;

#[cfg(test)]
mod tests;

pub use cell::*;
pub use config::*;
pub use coord::*;
pub use destruction::*;
pub use diagnostics::{GroupScope, TickDiagnostics};
pub use error::*;
pub use executor::*;
pub use group::*;
pub use ids::*;
pub use partition::*;
pub use relocation::*;
pub use simulation::*;
pub use store::*;
pub use time::*;
pub use world::*;
