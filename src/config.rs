//! Scheduler configuration.
//!
//! Limits default to values every supported controller accepts. A JSON file
//! can override them along with the period table, the channel tables and the
//! reassignment policy.

use crate::channels::KnownBandsCatalog;
use crate::periods::{BucketPeriodTable, PeriodTableError};
use crate::schedule::{HW_MAX_AP_PER_SCAN, HW_MAX_BATCH, HW_MAX_BUCKETS, HW_MAX_CHANNELS};
use crate::scheduler::ReassignPolicy;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_MAX_BUCKETS: usize = 8;
pub const DEFAULT_MAX_CHANNELS: usize = 64; // total across all buckets
pub const DEFAULT_MAX_BATCH: u32 = 10; // scans cached before a report
pub const DEFAULT_MAX_AP_PER_SCAN: u32 = 32;
/// Base period reported while no bucket is scheduled.
pub const DEFAULT_IDLE_PERIOD_MS: u32 = 40_000;

const_assert!(DEFAULT_MAX_BUCKETS <= HW_MAX_BUCKETS);
const_assert!(DEFAULT_MAX_CHANNELS <= HW_MAX_CHANNELS);
const_assert!(DEFAULT_MAX_BATCH <= HW_MAX_BATCH);
const_assert!(DEFAULT_MAX_AP_PER_SCAN <= HW_MAX_AP_PER_SCAN);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{name} = {value} is outside {min}..={max}")]
    InvalidLimit {
        name: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
    #[error("invalid period table: {0}")]
    PeriodTable(#[from] PeriodTableError),
    #[error("invalid channel catalog: {0}")]
    InvalidCatalog(alloc::string::String),
}

/// Hard ceilings the scheduler must respect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerLimits {
    pub max_buckets: usize,
    /// Total frequencies across all buckets.
    pub max_channels: usize,
    /// Result cache depth used when no request asks for less.
    pub max_batch: u32,
    pub max_ap_per_scan: u32,
    pub idle_period_ms: u32,
}

impl Default for SchedulerLimits {
    fn default() -> Self {
        Self {
            max_buckets: DEFAULT_MAX_BUCKETS,
            max_channels: DEFAULT_MAX_CHANNELS,
            max_batch: DEFAULT_MAX_BATCH,
            max_ap_per_scan: DEFAULT_MAX_AP_PER_SCAN,
            idle_period_ms: DEFAULT_IDLE_PERIOD_MS,
        }
    }
}

impl SchedulerLimits {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_limit("max_buckets", self.max_buckets as u64, HW_MAX_BUCKETS as u64)?;
        check_limit("max_channels", self.max_channels as u64, HW_MAX_CHANNELS as u64)?;
        check_limit("max_batch", u64::from(self.max_batch), u64::from(HW_MAX_BATCH))?;
        check_limit("max_ap_per_scan", u64::from(self.max_ap_per_scan), u64::from(HW_MAX_AP_PER_SCAN))?;
        check_limit("idle_period_ms", u64::from(self.idle_period_ms), u64::from(u32::MAX))?;
        Ok(())
    }

    /// Same limits forced into `1..=hardware cap`.
    pub fn clamped(self) -> Self {
        Self {
            max_buckets: self.max_buckets.clamp(1, HW_MAX_BUCKETS),
            max_channels: self.max_channels.clamp(1, HW_MAX_CHANNELS),
            max_batch: self.max_batch.clamp(1, HW_MAX_BATCH),
            max_ap_per_scan: self.max_ap_per_scan.clamp(1, HW_MAX_AP_PER_SCAN),
            idle_period_ms: self.idle_period_ms.max(1),
        }
    }
}

/// Every limit is a count or a period, so zero is never meaningful.
fn check_limit(name: &'static str, value: u64, max: u64) -> Result<(), ConfigError> {
    if value == 0 || value > max {
        return Err(ConfigError::InvalidLimit { name, value, min: 1, max });
    }
    Ok(())
}

/// Per-sub-band frequency tables, in MHz.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub band_24_ghz: alloc::vec::Vec<u32>,
    #[serde(default)]
    pub band_5_ghz: alloc::vec::Vec<u32>,
    #[serde(default)]
    pub band_5_ghz_dfs: alloc::vec::Vec<u32>,
}

impl CatalogConfig {
    pub fn build(&self) -> Result<KnownBandsCatalog, ConfigError> {
        let tables = [&self.band_24_ghz, &self.band_5_ghz, &self.band_5_ghz_dfs];
        // A single empty sub-band is fine, an empty radio is not
        if tables.iter().all(|t| t.is_empty()) {
            return Err(ConfigError::InvalidCatalog("all band tables are empty".into()));
        }

        let mut seen = alloc::collections::BTreeSet::new();
        for freq in tables.iter().flat_map(|t| t.iter()) {
            if *freq == 0 {
                return Err(ConfigError::InvalidCatalog("frequency 0 is not a channel".into()));
            }
            if !seen.insert(*freq) {
                return Err(ConfigError::InvalidCatalog(alloc::format!(
                    "frequency {} listed more than once",
                    freq
                )));
            }
        }
        // The whole catalog must fit one hardware channel list
        if seen.len() > HW_MAX_CHANNELS {
            return Err(ConfigError::InvalidCatalog(alloc::format!(
                "{} channels exceed the hardware list of {}",
                seen.len(),
                HW_MAX_CHANNELS
            )));
        }

        Ok(KnownBandsCatalog::from_tables(
            &self.band_24_ghz,
            &self.band_5_ghz,
            &self.band_5_ghz_dfs,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub limits: SchedulerLimits,
    pub reassign_policy: ReassignPolicy,
    /// Replaces the predefined period table when set.
    pub period_table_ms: Option<alloc::vec::Vec<u32>>,
    /// Replaces the built-in channel tables when set.
    pub catalog: Option<CatalogConfig>,
}

impl SchedulerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SchedulerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limits.validate()?;
        self.period_table()?;
        self.channel_catalog()?;
        Ok(())
    }

    pub fn period_table(&self) -> Result<BucketPeriodTable, ConfigError> {
        match &self.period_table_ms {
            Some(entries) => Ok(BucketPeriodTable::from_entries(entries)?),
            None => Ok(BucketPeriodTable::new()),
        }
    }

    pub fn channel_catalog(&self) -> Result<KnownBandsCatalog, ConfigError> {
        match &self.catalog {
            Some(catalog) => catalog.build(),
            None => Ok(KnownBandsCatalog::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.limits.max_buckets, DEFAULT_MAX_BUCKETS);
        assert_eq!(config.reassign_policy, ReassignPolicy::LogScale);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SchedulerConfig::from_json_str(r#"{"limits":{"max_buckets":4}}"#).unwrap();
        assert_eq!(config.limits.max_buckets, 4);
        assert_eq!(config.limits.max_channels, DEFAULT_MAX_CHANNELS);
        assert_eq!(config.limits.idle_period_ms, DEFAULT_IDLE_PERIOD_MS);
    }

    #[test]
    fn test_limit_out_of_range_rejected() {
        let err = SchedulerConfig::from_json_str(r#"{"limits":{"max_buckets":0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLimit { name: "max_buckets", .. }));

        let err = SchedulerConfig::from_json_str(r#"{"limits":{"max_channels":1000}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLimit { name: "max_channels", .. }));
    }

    #[test]
    fn test_bad_period_table_rejected() {
        let err = SchedulerConfig::from_json_str(r#"{"period_table_ms":[10000,25000]}"#).unwrap_err();
        assert!(matches!(err, ConfigError::PeriodTable(_)));
    }

    #[test]
    fn test_catalog_duplicate_rejected() {
        let json = r#"{"catalog":{"band_24_ghz":[2412,2437],"band_5_ghz":[2412]}}"#;
        let err = SchedulerConfig::from_json_str(json).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCatalog(_)));
    }

    #[test]
    fn test_clamped_limits() {
        let limits = SchedulerLimits {
            max_buckets: 0,
            max_channels: 10_000,
            ..SchedulerLimits::default()
        }
        .clamped();
        assert_eq!(limits.max_buckets, 1);
        assert_eq!(limits.max_channels, HW_MAX_CHANNELS);
    }

    #[test]
    fn test_missing_file() {
        let err = SchedulerConfig::from_file("/nonexistent/scanbus.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
