use crate::channels::{ChannelCatalog, ScanScope};
use core::fmt;
use core::ops::{BitOr, BitOrAssign};
use serde::{Deserialize, Serialize};

/// When and how a client wants scan results delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportEvents(pub u8);

impl ReportEvents {
    /// Report once the result buffer is full (no flags set).
    pub const BUFFER_FULL: ReportEvents = ReportEvents(0);
    pub const EACH_SCAN: ReportEvents = ReportEvents(1);
    pub const FULL_RESULTS: ReportEvents = ReportEvents(2);
    pub const NO_BATCH: ReportEvents = ReportEvents(4);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: ReportEvents) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ReportEvents {
    type Output = ReportEvents;

    fn bitor(self, rhs: ReportEvents) -> ReportEvents {
        ReportEvents(self.0 | rhs.0)
    }
}

impl BitOrAssign for ReportEvents {
    fn bitor_assign(&mut self, rhs: ReportEvents) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for ReportEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "buffer-full");
        }
        let names = [
            (ReportEvents::EACH_SCAN, "each-scan"),
            (ReportEvents::FULL_RESULTS, "full-results"),
            (ReportEvents::NO_BATCH, "no-batch"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// One client's periodic background scan request.
///
/// Zero in `max_scans_to_cache` / `num_bssids_per_scan` means "use the
/// scheduler default". Zero `max_period_ms` disables backoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub scope: ScanScope,
    pub period_ms: u32,
    #[serde(default)]
    pub max_period_ms: u32,
    #[serde(default)]
    pub step_count: u32,
    #[serde(default)]
    pub max_scans_to_cache: u32,
    #[serde(default)]
    pub num_bssids_per_scan: u32,
    #[serde(default)]
    pub report_events: ReportEvents,
}

impl ScanRequest {
    pub fn new(scope: ScanScope, period_ms: u32) -> Self {
        Self {
            scope,
            period_ms,
            max_period_ms: 0,
            step_count: 0,
            max_scans_to_cache: 0,
            num_bssids_per_scan: 0,
            // same mask a JSON request gets when it omits the field
            report_events: ReportEvents::default(),
        }
    }

    pub fn with_backoff(mut self, max_period_ms: u32, step_count: u32) -> Self {
        self.max_period_ms = max_period_ms;
        self.step_count = step_count;
        self
    }

    pub fn with_max_scans_to_cache(mut self, max_scans_to_cache: u32) -> Self {
        self.max_scans_to_cache = max_scans_to_cache;
        self
    }

    pub fn with_num_bssids_per_scan(mut self, num_bssids_per_scan: u32) -> Self {
        self.num_bssids_per_scan = num_bssids_per_scan;
        self
    }

    pub fn with_report_events(mut self, report_events: ReportEvents) -> Self {
        self.report_events = report_events;
        self
    }

    /// Backoff requests keep their exact period and never share a pooled bucket.
    pub fn is_exponential(&self) -> bool {
        self.max_period_ms != 0 && self.max_period_ms != self.period_ms
    }

    /// A request the scheduler can act on: positive period and a scope that
    /// expands to at least one frequency.
    pub fn is_schedulable(&self, catalog: &dyn ChannelCatalog) -> bool {
        self.period_ms > 0 && !catalog.expand(&self.scope).is_empty()
    }
}
