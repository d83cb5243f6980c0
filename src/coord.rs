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

//! Grid coordinates and cell keys.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// Number of landblocks along each side of the grid. Valid coordinates are `0..GRID_SIZE`.
pub const GRID_SIZE: u8 = 255;

/// Landblock position on the world grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellCoord {
    pub x: u8,
    pub y: u8,
}

impl CellCoord {
    /// Checked constructor; rejects anything outside the grid.
    pub fn new(x: i32, y: i32) -> Result<Self> {
        if Self::in_grid(x, y) {
            Ok(Self {
                x: x as u8,
                y: y as u8,
            })
        } else {
            Err(SchedulerError::CoordOutOfRange { x, y })
        }
    }

    /// Returns true if `(x, y)` lies on the grid
    pub fn in_grid(x: i32, y: i32) -> bool {
        (0..GRID_SIZE as i32).contains(&x) && (0..GRID_SIZE as i32).contains(&y)
    }

    /// Packed landblock id, `0xXXYYFFFF`.
    pub fn landblock_id(self) -> u32 {
        (u32::from(self.x) << 24) | (u32::from(self.y) << 16) | 0xFFFF
    }

    /// Decode a landblock id. The low 16 bits (cell within the landblock) are ignored.
    pub fn from_landblock_id(id: u32) -> Result<Self> {
        Self::new((id >> 24) as i32, ((id >> 16) & 0xFF) as i32)
    }

    /// Chebyshev distance in grid cells.
    pub fn distance(self, other: CellCoord) -> u32 {
        let dx = (i32::from(self.x) - i32::from(other.x)).unsigned_abs();
        let dy = (i32::from(self.y) - i32::from(other.y)).unsigned_abs();
        dx.max(dy)
    }

    /// Offset by `(dx, dy)`, or None when the result leaves the grid
    pub fn offset(self, dx: i32, dy: i32) -> Option<CellCoord> {
        CellCoord::new(i32::from(self.x) + dx, i32::from(self.y) + dy).ok()
    }
}

impl fmt::Display for CellCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}{:02X}", self.x, self.y)
    }
}

/// Identifies one live cell: a coordinate plus an optional instance variant.
///
/// `variant == None` is the shared overworld. Any variant makes the cell an
/// isolated instance that is never adjacent to anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey {
    pub coord: CellCoord,
    pub variant: Option<u32>,
}

impl CellKey {
    /// Overworld key for `coord`
    pub const fn overworld(coord: CellCoord) -> Self {
        Self {
            coord,
            variant: None,
        }
    }

    /// Instanced key for `coord`
    pub const fn instanced(coord: CellCoord, variant: u32) -> Self {
        Self {
            coord,
            variant: Some(variant),
        }
    }

    /// Convenience constructor from raw grid coordinates
    pub fn at(x: i32, y: i32) -> Result<Self> {
        Ok(Self::overworld(CellCoord::new(x, y)?))
    }

    pub fn is_instanced(&self) -> bool {
        self.variant.is_some()
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant {
            Some(v) => write!(f, "{}:{v}", self.coord),
            None => write!(f, "{}", self.coord),
        }
    }
}
