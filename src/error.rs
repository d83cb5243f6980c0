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

//! Error types

use std::fmt;

use crate::coord::CellKey;

/// Scheduler error type
#[derive(Debug, Clone)]
pub enum SchedulerError {
    /// Grid coordinate outside the landblock grid
    CoordOutOfRange { x: i32, y: i32 },

    /// Cell is not in the active map
    CellNotLoaded(CellKey),

    /// World content source failed to produce a cell
    ContentLoad { key: CellKey, reason: String },

    /// Configuration value rejected by validation
    InvalidConfig(String),

    /// Configuration could not be parsed
    ConfigParse(String),

    /// Worker pool could not be built
    ThreadPool(String),

    /// Partition invariant broken (conservation or separation)
    InvariantViolation(InvariantViolation),

    /// IO error (config files, etc.)
    IoError(String),
}

/// Detailed partition invariant failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Sum of group sizes differs from the number of grouped cells
    Conservation { grouped: usize, active: usize },
    /// Two distinct groups hold cells closer than the minimum spacing
    Separation {
        a: CellKey,
        b: CellKey,
        distance: u32,
        min_spacing: u32,
    },
    /// A cell is listed in a group but its group back-reference disagrees
    Membership { key: CellKey },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvariantViolation::Conservation { grouped, active } => {
                write!(f, "conservation: {grouped} grouped cells but {active} active")
            }
            InvariantViolation::Separation {
                a,
                b,
                distance,
                min_spacing,
            } => write!(
                f,
                "separation: {a} and {b} are {distance} apart in different groups (min spacing {min_spacing})"
            ),
            InvariantViolation::Membership { key } => {
                write!(f, "membership: {key} disagrees with its group index")
            }
        }
    }
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::CoordOutOfRange { x, y } => {
                write!(f, "Coordinate ({x}, {y}) is outside the landblock grid")
            }
            SchedulerError::CellNotLoaded(key) => write!(f, "Cell not loaded: {key}"),
            SchedulerError::ContentLoad { key, reason } => {
                write!(f, "Failed to load content for {key}: {reason}")
            }
            SchedulerError::InvalidConfig(msg) => write!(f, "Invalid config: {msg}"),
            SchedulerError::ConfigParse(msg) => write!(f, "Config parse error: {msg}"),
            SchedulerError::ThreadPool(msg) => write!(f, "Worker pool error: {msg}"),
            SchedulerError::InvariantViolation(v) => write!(f, "Partition invariant violated: {v}"),
            SchedulerError::IoError(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<std::io::Error> for SchedulerError {
    fn from(err: std::io::Error) -> Self {
        SchedulerError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::ConfigParse(err.to_string())
    }
}

impl From<InvariantViolation> for SchedulerError {
    fn from(err: InvariantViolation) -> Self {
        SchedulerError::InvariantViolation(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, SchedulerError>;
