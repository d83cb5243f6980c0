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

//! Scheduler configuration
//!
//! Loaded from JSON; every field is optional and falls back to its default.
//!
//! ```json
//! {
//!   "min_spacing": 5,
//!   "parallel": true,
//!   "worker_threads": 8,
//!   "split_budget_us": 5000,
//!   "tick_rate_hz": 20,
//!   "idle_unload_ticks": 600,
//!   "preload": [
//!     { "landblock": 3707895807, "include_adjacents": true, "permaload": true }
//!   ]
//! }
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coord::{CellCoord, CellKey};
use crate::error::{Result, SchedulerError};

/// A landblock loaded when the world starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreloadEntry {
    /// Packed landblock id (`0xXXYY____`)
    pub landblock: u32,
    #[serde(default)]
    pub variant: Option<u32>,
    #[serde(default)]
    pub include_adjacents: bool,
    #[serde(default)]
    pub permaload: bool,
}

impl PreloadEntry {
    pub fn new(key: CellKey) -> Self {
        Self {
            landblock: key.coord.landblock_id(),
            variant: key.variant,
            include_adjacents: false,
            permaload: false,
        }
    }

    pub fn with_adjacents(mut self) -> Self {
        self.include_adjacents = true;
        self
    }

    pub fn permanent(mut self) -> Self {
        self.permaload = true;
        self
    }

    pub fn key(&self) -> Result<CellKey> {
        let coord = CellCoord::from_landblock_id(self.landblock)?;
        Ok(CellKey {
            coord,
            variant: self.variant,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Cells closer than this (Chebyshev) always share a group
    pub min_spacing: u32,
    /// Tick groups concurrently
    pub parallel: bool,
    /// Also run physics concurrently (requires `parallel`)
    pub parallel_physics: bool,
    /// Worker pool size; rayon's default when unset
    pub worker_threads: Option<usize>,
    /// Time allowed for one split search, in microseconds
    pub split_budget_us: u64,
    pub tick_rate_hz: u32,
    /// Unload empty, non-permanent cells after this many idle ticks
    pub idle_unload_ticks: Option<u64>,
    pub preload: Vec<PreloadEntry>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_spacing: 5,
            parallel: true,
            parallel_physics: false,
            worker_threads: None,
            split_budget_us: 5000,
            tick_rate_hz: 20,
            idle_unload_ticks: None,
            preload: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    /// Parse and validate a JSON config
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SchedulerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject values the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.min_spacing == 0 {
            return Err(SchedulerError::InvalidConfig(
                "min_spacing must be at least 1".into(),
            ));
        }
        if self.tick_rate_hz == 0 {
            return Err(SchedulerError::InvalidConfig(
                "tick_rate_hz must be at least 1".into(),
            ));
        }
        if self.worker_threads == Some(0) {
            return Err(SchedulerError::InvalidConfig(
                "worker_threads must be at least 1 when set".into(),
            ));
        }
        if self.parallel_physics && !self.parallel {
            return Err(SchedulerError::InvalidConfig(
                "parallel_physics requires parallel".into(),
            ));
        }
        if self.idle_unload_ticks == Some(0) {
            return Err(SchedulerError::InvalidConfig(
                "idle_unload_ticks must be at least 1 when set".into(),
            ));
        }
        for entry in &self.preload {
            entry.key().map_err(|e| {
                SchedulerError::InvalidConfig(format!(
                    "preload landblock {:#010x}: {e}",
                    entry.landblock
                ))
            })?;
        }
        Ok(())
    }

    pub fn split_budget(&self) -> Duration {
        Duration::from_micros(self.split_budget_us)
    }

    /// Wall-clock time one tick is allowed to take
    pub fn tick_budget(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate_hz.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_gives_defaults() {
        let config = SchedulerConfig::from_json_str("{}").unwrap();
        assert_eq!(config, SchedulerConfig::default());
        assert_eq!(config.tick_budget(), Duration::from_millis(50));
        assert_eq!(config.split_budget(), Duration::from_millis(5));
    }

    #[test]
    fn test_parse_preload() {
        let json = r#"{
            "min_spacing": 3,
            "parallel": false,
            "preload": [
                { "landblock": 3707895807, "include_adjacents": true, "permaload": true },
                { "landblock": 16973823, "variant": 7 }
            ]
        }"#;
        let config = SchedulerConfig::from_json_str(json).unwrap();
        assert_eq!(config.min_spacing, 3);
        assert!(!config.parallel);
        assert_eq!(config.preload.len(), 2);

        let first = config.preload[0].key().unwrap();
        assert_eq!((first.coord.x, first.coord.y), (0xDD, 0x01));
        assert!(config.preload[0].permaload);

        let second = config.preload[1].key().unwrap();
        assert_eq!((second.coord.x, second.coord.y), (0x01, 0x02));
        assert_eq!(second.variant, Some(7));
        assert!(!config.preload[1].include_adjacents);
    }

    #[test]
    fn test_validation_errors() {
        for json in [
            r#"{ "min_spacing": 0 }"#,
            r#"{ "tick_rate_hz": 0 }"#,
            r#"{ "worker_threads": 0 }"#,
            r#"{ "parallel": false, "parallel_physics": true }"#,
            r#"{ "idle_unload_ticks": 0 }"#,
            r#"{ "preload": [ { "landblock": 4294967295 } ] }"#,
        ] {
            let err = SchedulerConfig::from_json_str(json).unwrap_err();
            assert!(matches!(err, SchedulerError::InvalidConfig(_)), "{json}: {err}");
        }
    }

    #[test]
    fn test_parse_error() {
        let err = SchedulerConfig::from_json_str("{ min_spacing: }").unwrap_err();
        assert!(matches!(err, SchedulerError::ConfigParse(_)));
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = SchedulerConfig::default();
        config.preload.push(
            PreloadEntry::new(CellKey::at(10, 20).unwrap())
                .with_adjacents()
                .permanent(),
        );
        let json = config.to_json().unwrap();
        assert_eq!(SchedulerConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_file_missing_is_io_error() {
        let err = SchedulerConfig::from_json_file("/nonexistent/landblocks.json").unwrap_err();
        assert!(matches!(err, SchedulerError::IoError(_)));
    }
}
