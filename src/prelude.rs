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

//! Convenient re-exports of commonly used types.
//!
//! The prelude can be imported with:
//! ```
//! use landblock_scheduler::prelude::*;
//! ```

pub use crate::cell::Cell;
pub use crate::config::{PreloadEntry, SchedulerConfig};
pub use crate::coord::{CellCoord, CellKey};
pub use crate::error::{Result, SchedulerError};
pub use crate::ids::{GroupId, ObjectId};
pub use crate::relocation::RelocationBuffer;
pub use crate::simulation::{CellContent, CellLoader, TickContext, TickHooks};
pub use crate::world::{World, WorldHandle};
