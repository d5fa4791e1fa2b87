//! Run configuration.
//!
//! Every field has a default, so a config file only needs the fields it
//! changes. Binaries load one with [`MapConfig::from_file`] and then let
//! command-line flags override individual fields.

use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ChipmapError, Result};
use crate::generator::DEFAULT_YEARS;
use crate::grid::GridSpec;
use crate::pipeline::PipelineOptions;
use crate::retry::RetryPolicy;

pub const DEFAULT_HOST: &str = "http://lcmap-test.cr.usgs.gov/changes/results";
pub const DEFAULT_ALGORITHM: &str = "lcmap-pyccd:1.1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub first_year: i32,
    pub last_year: i32,
    /// Worker threads; the dispatcher and collector come on top.
    pub workers: usize,
    pub queue_capacity: usize,
    pub grid: GridSpec,
    /// Attempts per remote fetch or grid write, including the first.
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    pub host: String,
    pub algorithm: String,
}

impl Default for MapConfig {
    fn default() -> Self {
        let pipeline = PipelineOptions::default();
        let retry = RetryPolicy::default();
        Self {
            first_year: *DEFAULT_YEARS.start(),
            last_year: *DEFAULT_YEARS.end(),
            workers: pipeline.workers,
            queue_capacity: pipeline.queue_capacity,
            grid: GridSpec::default(),
            retry_attempts: retry.attempts,
            retry_backoff_ms: retry.backoff.as_millis() as u64,
            host: DEFAULT_HOST.to_string(),
            algorithm: DEFAULT_ALGORITHM.to_string(),
        }
    }
}

impl MapConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.first_year > self.last_year {
            return Err(ChipmapError::config(format!(
                "first_year {} is after last_year {}",
                self.first_year, self.last_year
            )));
        }
        if self.workers == 0 {
            return Err(ChipmapError::config("workers must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(ChipmapError::config("queue_capacity must be at least 1"));
        }
        self.grid.validate()
    }

    pub fn years(&self) -> RangeInclusive<i32> {
        self.first_year..=self.last_year
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, Duration::from_millis(self.retry_backoff_ms))
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions { workers: self.workers, queue_capacity: self.queue_capacity }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_the_standard_run() {
        let c = MapConfig::default();
        assert_eq!(c.years(), 1984..=2015);
        assert!(c.workers >= 1);
        assert_eq!(c.grid.tile_pixels, 5000);
        c.validate().unwrap();
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        fs::write(&path, r#"{"first_year": 2000, "last_year": 2002, "grid": {"chip_pixels": 50}}"#).unwrap();

        let c = MapConfig::from_file(&path).unwrap();
        assert_eq!(c.years(), 2000..=2002);
        assert_eq!(c.grid.chip_pixels, 50);
        assert_eq!(c.grid.tile_pixels, 5000);
        assert_eq!(c.algorithm, DEFAULT_ALGORITHM);
    }

    #[test]
    fn inverted_years_are_rejected() {
        let c = MapConfig { first_year: 2010, last_year: 2000, ..MapConfig::default() };
        assert!(c.validate().is_err());
    }
}
