//! Legal hardware polling periods.

use heapless::Vec;
use thiserror::Error;

/// Bumped whenever [`PREDEFINED_BUCKET_PERIODS_MS`] changes.
pub const PERIOD_TABLE_VERSION: u32 = 1;

pub const MAX_PERIOD_TABLE_ENTRIES: usize = 16;

/// 10 s doubling up to 10240 s.
pub const PREDEFINED_BUCKET_PERIODS_MS: [u32; 11] = [
    10_000, 20_000, 40_000, 80_000, 160_000, 320_000, 640_000, 1_280_000, 2_560_000, 5_120_000,
    10_240_000,
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeriodTableError {
    #[error("period table is empty")]
    Empty,
    #[error("period table has {len} entries, at most {max} supported")]
    TooManyEntries { len: usize, max: usize },
    #[error("period table entry {index} is zero")]
    ZeroPeriod { index: usize },
    #[error("period table entry {index} ({period_ms}ms) is not a larger multiple of {previous_ms}ms")]
    NotGeometric { index: usize, period_ms: u32, previous_ms: u32 },
}

/// Ascending periods where each entry is a multiple of the one before, so
/// every entry is a multiple of the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketPeriodTable {
    entries: Vec<u32, MAX_PERIOD_TABLE_ENTRIES>,
}

impl BucketPeriodTable {
    pub fn new() -> Self {
        let mut entries: Vec<u32, MAX_PERIOD_TABLE_ENTRIES> = Vec::new();
        for period in PREDEFINED_BUCKET_PERIODS_MS {
            let _ = entries.push(period);
        }
        Self { entries }
    }

    pub fn from_entries(periods: &[u32]) -> Result<Self, PeriodTableError> {
        if periods.is_empty() {
            return Err(PeriodTableError::Empty);
        }
        if periods.len() > MAX_PERIOD_TABLE_ENTRIES {
            return Err(PeriodTableError::TooManyEntries {
                len: periods.len(),
                max: MAX_PERIOD_TABLE_ENTRIES,
            });
        }

        let mut entries: Vec<u32, MAX_PERIOD_TABLE_ENTRIES> = Vec::new();
        for (index, &period_ms) in periods.iter().enumerate() {
            if period_ms == 0 {
                return Err(PeriodTableError::ZeroPeriod { index });
            }
            if let Some(&previous_ms) = entries.last() {
                if period_ms <= previous_ms || period_ms % previous_ms != 0 {
                    return Err(PeriodTableError::NotGeometric { index, period_ms, previous_ms });
                }
            }
            let _ = entries.push(period_ms);
        }

        Ok(Self { entries })
    }

    /// Entry closest to `period_ms`; ties go to the smaller entry.
    pub fn nearest(&self, period_ms: u32) -> u32 {
        let mut best = self.entries[0];
        for &entry in self.entries.iter().skip(1) {
            if entry.abs_diff(period_ms) < best.abs_diff(period_ms) {
                best = entry;
            }
        }
        best
    }

    pub fn min_period(&self) -> u32 {
        self.entries[0]
    }

    pub fn max_period(&self) -> u32 {
        self.entries[self.entries.len() - 1]
    }

    pub fn contains(&self, period_ms: u32) -> bool {
        self.entries.contains(&period_ms)
    }

    pub fn entries(&self) -> &[u32] {
        &self.entries
    }
}

impl Default for BucketPeriodTable {
    fn default() -> Self {
        Self::new()
    }
}
