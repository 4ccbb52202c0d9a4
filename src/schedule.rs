use crate::channels::{ChannelCatalog, ScanScope};
use crate::request::ReportEvents;
use alloc::collections::BTreeSet;
use heapless::Vec;
use serde::{Deserialize, Serialize};

/// Most buckets the radio controller can run at once.
pub const HW_MAX_BUCKETS: usize = 16;
/// Longest total channel list the radio controller accepts.
pub const HW_MAX_CHANNELS: usize = 128;
/// Deepest scan result cache the controller can hold.
pub const HW_MAX_BATCH: u32 = 64;
/// Most access points reported per scan.
pub const HW_MAX_AP_PER_SCAN: u32 = 256;

pub type BucketList = Vec<Bucket, HW_MAX_BUCKETS>;

/// One polling slot of the hardware schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub period_ms: u32,
    pub scope: ScanScope,
    pub report_events: ReportEvents,
    /// Non-zero only for exponential backoff buckets.
    pub max_period_ms: u32,
    pub step_count: u32,
}

impl Bucket {
    pub fn is_exponential(&self) -> bool {
        self.max_period_ms != 0 && self.max_period_ms != self.period_ms
    }

    pub fn channel_count(&self, catalog: &dyn ChannelCatalog) -> usize {
        catalog.expand(&self.scope).len()
    }
}

/// The single hardware-executable schedule computed from all live requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub base_period_ms: u32,
    pub buckets: BucketList,
    pub max_ap_per_scan: u32,
    pub report_threshold_num_scans: u32,
}

impl Schedule {
    /// Schedule with no buckets, ticking at the idle period.
    pub fn empty(idle_period_ms: u32, max_ap_per_scan: u32, report_threshold_num_scans: u32) -> Self {
        Self {
            base_period_ms: idle_period_ms,
            buckets: Vec::new(),
            max_ap_per_scan,
            report_threshold_num_scans,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Sum of each bucket's expanded channel count.
    pub fn total_channels(&self, catalog: &dyn ChannelCatalog) -> usize {
        self.buckets.iter().map(|b| b.channel_count(catalog)).sum()
    }

    /// Every frequency scanned by at least one bucket.
    pub fn covered_frequencies(&self, catalog: &dyn ChannelCatalog) -> BTreeSet<u32> {
        self.buckets
            .iter()
            .flat_map(|b| catalog.expand(&b.scope))
            .collect()
    }

    /// True when some bucket scans `freq` at least every `period_ms`.
    pub fn covers_at(&self, catalog: &dyn ChannelCatalog, freq: u32, period_ms: u32) -> bool {
        self.buckets
            .iter()
            .any(|b| b.period_ms <= period_ms && catalog.expand(&b.scope).contains(&freq))
    }

    /// Every bucket period divides evenly by the base period.
    pub fn periods_aligned(&self) -> bool {
        self.base_period_ms > 0
            && self.buckets.iter().all(|b| b.period_ms % self.base_period_ms == 0)
    }

    /// Compares what the hardware would actually do: the same settings per
    /// bucket, channels compared as sets regardless of band or list form.
    pub fn is_equivalent(&self, other: &Schedule, catalog: &dyn ChannelCatalog) -> bool {
        if self.base_period_ms != other.base_period_ms
            || self.max_ap_per_scan != other.max_ap_per_scan
            || self.report_threshold_num_scans != other.report_threshold_num_scans
            || self.buckets.len() != other.buckets.len()
        {
            return false;
        }

        self.buckets.iter().zip(other.buckets.iter()).all(|(a, b)| {
            a.period_ms == b.period_ms
                && a.report_events == b.report_events
                && a.max_period_ms == b.max_period_ms
                && a.step_count == b.step_count
                && bucket_frequencies(a, catalog) == bucket_frequencies(b, catalog)
        })
    }
}

fn bucket_frequencies(bucket: &Bucket, catalog: &dyn ChannelCatalog) -> BTreeSet<u32> {
    catalog.expand(&bucket.scope).into_iter().collect()
}
