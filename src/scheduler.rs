//! Multi-client background scan scheduler.
//!
//! Every call to [`ScanScheduler::update_schedule`] rebuilds the hardware
//! schedule from scratch out of the live request set:
//!
//! 1. backoff requests get a bucket of their own at their exact period;
//! 2. everything else is snapped onto the period table and pooled with
//!    requests of the same period and compatible scope;
//! 3. buckets beyond the bucket limit are eliminated, least harmful first,
//!    and their members folded into the closest surviving bucket;
//! 4. channels are trimmed from the loosest buckets until the channel list
//!    fits;
//! 5. a base period is chosen that every bucket period is a multiple of.
//!
//! Nothing but the limits survives between calls, apart from the last result
//! kept for the getters.

use crate::channels::{Band, ChannelCatalog, ChannelCollection, KnownBandsCatalog, ScanScope};
use crate::config::{ConfigError, SchedulerConfig, SchedulerLimits};
use crate::periods::BucketPeriodTable;
use crate::request::{ReportEvents, ScanRequest};
use crate::schedule::{Bucket, BucketList, Schedule, HW_MAX_BUCKETS};
use core::cmp::Ordering;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// How "close" two bucket periods are when a bucket has to be folded into a
/// surviving one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReassignPolicy {
    /// `|log2(a / b)|`: 10 s vs 20 s is as far apart as 80 s vs 160 s.
    #[default]
    LogScale,
    /// `|a - b|` in milliseconds.
    Absolute,
}

impl ReassignPolicy {
    pub fn distance(self, from_ms: u32, to_ms: u32) -> f64 {
        match self {
            ReassignPolicy::LogScale => {
                if from_ms == 0 || to_ms == 0 {
                    return f64::INFINITY;
                }
                (f64::from(to_ms) / f64::from(from_ms)).log2().abs()
            }
            ReassignPolicy::Absolute => f64::from(from_ms.abs_diff(to_ms)),
        }
    }

    /// Index of the candidate period closest to `from_ms`. Ties go to the
    /// shorter period, then to the earlier candidate.
    pub fn closest<I>(self, from_ms: u32, candidates: I) -> Option<usize>
    where
        I: IntoIterator<Item = (usize, u32)>,
    {
        let mut best: Option<(usize, u32, f64)> = None;
        for (index, period_ms) in candidates {
            let distance = self.distance(from_ms, period_ms);
            let better = match best {
                None => true,
                Some((_, best_period, best_distance)) => match distance.total_cmp(&best_distance) {
                    Ordering::Less => true,
                    Ordering::Equal => period_ms < best_period,
                    Ordering::Greater => false,
                },
            };
            if better {
                best = Some((index, period_ms, distance));
            }
        }
        best.map(|(index, _, _)| index)
    }
}

/// A bucket under construction.
#[derive(Debug)]
struct Candidate<'c> {
    /// Creation order; the stable tie-breaker everywhere.
    order: usize,
    period_ms: u32,
    /// Off-table period, pulled onto a multiple of the base at the end.
    exact: bool,
    /// Band a pooled band group was opened for; `None` for channel groups.
    band: Option<Band>,
    /// Zero once the bucket serves fixed-period members.
    max_period_ms: u32,
    step_count: u32,
    channels: ChannelCollection<'c>,
    report_events: ReportEvents,
    members: alloc::vec::Vec<usize>,
}

impl<'c> Candidate<'c> {
    fn pooled(order: usize, period_ms: u32, band: Option<Band>, channels: ChannelCollection<'c>) -> Self {
        Self {
            order,
            period_ms,
            exact: false,
            band,
            max_period_ms: 0,
            step_count: 0,
            channels,
            report_events: ReportEvents::BUFFER_FULL,
            members: alloc::vec::Vec::new(),
        }
    }

    fn exact(order: usize, request: &ScanRequest, channels: ChannelCollection<'c>) -> Self {
        Self {
            order,
            period_ms: request.period_ms,
            exact: true,
            band: None,
            max_period_ms: request.max_period_ms,
            step_count: request.step_count,
            channels,
            report_events: ReportEvents::BUFFER_FULL,
            members: alloc::vec::Vec::new(),
        }
    }

    fn add_member(&mut self, index: usize, events: ReportEvents, channels: &ChannelCollection<'_>) {
        self.members.push(index);
        self.report_events |= events;
        self.channels.merge(channels);
    }

    fn absorb(&mut self, other: Candidate<'_>) {
        // Fixed-period members must not ride a backoff curve.
        if !other.is_backoff() && self.is_backoff() {
            self.max_period_ms = 0;
            self.step_count = 0;
        }
        self.members.extend(other.members);
        self.report_events |= other.report_events;
        self.channels.merge(&other.channels);
    }

    fn is_backoff(&self) -> bool {
        self.exact && self.max_period_ms != 0
    }

    fn looseness(&self) -> (u32, usize) {
        (self.period_ms, self.order)
    }
}

#[derive(Debug)]
pub struct ScanScheduler<C: ChannelCatalog = KnownBandsCatalog> {
    catalog: C,
    periods: BucketPeriodTable,
    limits: SchedulerLimits,
    policy: ReassignPolicy,
    schedule: Schedule,
    // request index of the last update -> bucket index
    assignments: alloc::vec::Vec<Option<usize>>,
}

impl ScanScheduler<KnownBandsCatalog> {
    pub fn new() -> Self {
        Self::with_catalog(KnownBandsCatalog::new())
    }

    pub fn with_config(config: &SchedulerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut scheduler = Self::with_catalog(config.channel_catalog()?)
            .with_period_table(config.period_table()?)
            .with_policy(config.reassign_policy);
        scheduler.set_limits(config.limits);
        Ok(scheduler)
    }
}

impl Default for ScanScheduler<KnownBandsCatalog> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ChannelCatalog> ScanScheduler<C> {
    pub fn with_catalog(catalog: C) -> Self {
        let limits = SchedulerLimits::default();
        Self {
            catalog,
            periods: BucketPeriodTable::new(),
            limits,
            policy: ReassignPolicy::default(),
            schedule: Schedule::empty(limits.idle_period_ms, limits.max_ap_per_scan, limits.max_batch),
            assignments: alloc::vec::Vec::new(),
        }
    }

    pub fn with_period_table(mut self, periods: BucketPeriodTable) -> Self {
        self.periods = periods;
        self
    }

    pub fn with_policy(mut self, policy: ReassignPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn set_max_buckets(&mut self, max_buckets: usize) {
        self.set_limits(SchedulerLimits { max_buckets, ..self.limits });
    }

    pub fn set_max_channels(&mut self, max_channels: usize) {
        self.set_limits(SchedulerLimits { max_channels, ..self.limits });
    }

    pub fn set_max_batch(&mut self, max_batch: u32) {
        self.set_limits(SchedulerLimits { max_batch, ..self.limits });
    }

    pub fn set_max_ap_per_scan(&mut self, max_ap_per_scan: u32) {
        self.set_limits(SchedulerLimits { max_ap_per_scan, ..self.limits });
    }

    pub fn set_idle_period_ms(&mut self, idle_period_ms: u32) {
        self.set_limits(SchedulerLimits { idle_period_ms, ..self.limits });
    }

    /// Applies new limits, clamped into the hardware range. Takes effect on
    /// the next [`update_schedule`](Self::update_schedule), except that an
    /// idle schedule is refreshed right away.
    pub fn set_limits(&mut self, limits: SchedulerLimits) {
        let clamped = limits.clamped();
        if clamped != limits {
            warn!(?limits, ?clamped, "scheduler limits clamped to hardware range");
        }
        self.limits = clamped;
        if self.schedule.is_empty() {
            self.schedule = self.idle_schedule();
        }
    }

    pub fn set_reassign_policy(&mut self, policy: ReassignPolicy) {
        self.policy = policy;
    }

    pub fn max_buckets(&self) -> usize {
        self.limits.max_buckets
    }

    pub fn max_channels(&self) -> usize {
        self.limits.max_channels
    }

    pub fn max_batch(&self) -> u32 {
        self.limits.max_batch
    }

    pub fn max_ap_per_scan(&self) -> u32 {
        self.limits.max_ap_per_scan
    }

    pub fn limits(&self) -> SchedulerLimits {
        self.limits
    }

    pub fn reassign_policy(&self) -> ReassignPolicy {
        self.policy
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn period_table(&self) -> &BucketPeriodTable {
        &self.periods
    }

    /// Last computed schedule; idle until the first update.
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Bucket the `request_index`-th request of the last update landed in.
    pub fn bucket_index_for_request(&self, request_index: usize) -> Option<usize> {
        self.assignments.get(request_index).copied().flatten()
    }

    pub fn bucket_for_request(&self, request_index: usize) -> Option<&Bucket> {
        self.bucket_index_for_request(request_index)
            .and_then(|index| self.schedule.buckets.get(index))
    }

    /// Whether results for this request are delivered per scan result.
    pub fn should_report_full_results(&self, request_index: usize) -> bool {
        self.bucket_for_request(request_index)
            .is_some_and(|bucket| bucket.report_events.contains(ReportEvents::FULL_RESULTS))
    }

    /// Recomputes the schedule for `requests`. Returns whether it changed.
    pub fn update_schedule(&mut self, requests: &[ScanRequest]) -> bool {
        let (schedule, assignments) = self.compute(requests);
        let changed = schedule != self.schedule;

        if changed {
            info!(
                requests = requests.len(),
                buckets = schedule.bucket_count(),
                base_period_ms = schedule.base_period_ms,
                "scan schedule updated"
            );
        } else {
            debug!(requests = requests.len(), "scan schedule unchanged");
        }

        self.schedule = schedule;
        self.assignments = assignments;
        changed
    }

    fn idle_schedule(&self) -> Schedule {
        Schedule::empty(self.limits.idle_period_ms, self.limits.max_ap_per_scan, self.limits.max_batch)
    }

    fn compute(&self, requests: &[ScanRequest]) -> (Schedule, alloc::vec::Vec<Option<usize>>) {
        let catalog: &dyn ChannelCatalog = &self.catalog;
        let mut assignments = alloc::vec![None; requests.len()];

        let mut candidates = self.collect_candidates(catalog, requests);
        self.enforce_bucket_limit(&mut candidates);
        self.enforce_channel_limit(&mut candidates);

        // Zero means "no preference" and never wins the minimum
        let max_ap_per_scan = min_nonzero(
            requests.iter().filter(|r| r.is_schedulable(catalog)).map(|r| r.num_bssids_per_scan),
            self.limits.max_ap_per_scan,
        );
        let report_threshold_num_scans = min_nonzero(
            requests.iter().filter(|r| r.is_schedulable(catalog)).map(|r| r.max_scans_to_cache),
            self.limits.max_batch,
        );

        // Nothing to scan: idle at the configured period
        if candidates.is_empty() {
            let mut schedule = self.idle_schedule();
            schedule.max_ap_per_scan = max_ap_per_scan;
            schedule.report_threshold_num_scans = report_threshold_num_scans;
            return (schedule, assignments);
        }

        let base_period_ms = self.align_periods(&mut candidates);
        candidates.sort_by_key(Candidate::looseness);

        debug_assert!(
            candidates.len() <= HW_MAX_BUCKETS,
            "bucket count {} above hardware cap {}",
            candidates.len(),
            HW_MAX_BUCKETS
        );

        let mut buckets = BucketList::new();
        for (bucket_index, candidate) in candidates.iter().enumerate() {
            for &member in &candidate.members {
                assignments[member] = Some(bucket_index);
            }
            let backoff = candidate.is_backoff();
            let bucket = Bucket {
                period_ms: candidate.period_ms,
                scope: candidate.channels.to_scope(),
                report_events: candidate.report_events,
                // alignment may have moved the period past the ceiling
                max_period_ms: if backoff {
                    candidate.max_period_ms.max(candidate.period_ms)
                } else {
                    0
                },
                step_count: if backoff { candidate.step_count } else { 0 },
            };
            debug!(
                bucket = bucket_index,
                period_ms = bucket.period_ms,
                scope = %bucket.scope,
                events = %bucket.report_events,
                members = candidate.members.len(),
                "bucket scheduled"
            );
            let _ = buckets.push(bucket);
        }

        let schedule = Schedule {
            base_period_ms,
            buckets,
            max_ap_per_scan,
            report_threshold_num_scans,
        };
        (schedule, assignments)
    }

    fn collect_candidates<'c>(
        &self,
        catalog: &'c dyn ChannelCatalog,
        requests: &[ScanRequest],
    ) -> alloc::vec::Vec<Candidate<'c>> {
        let mut candidates: alloc::vec::Vec<Candidate<'c>> = alloc::vec::Vec::new();

        for (index, request) in requests.iter().enumerate() {
            if !request.is_schedulable(catalog) {
                warn!(
                    request = index,
                    period_ms = request.period_ms,
                    scope = %request.scope,
                    "ignoring unschedulable scan request"
                );
                continue;
            }

            let mut channels = ChannelCollection::new(catalog);
            channels.add_scope(&request.scope);

            if request.is_exponential() {
                let mut candidate = Candidate::exact(candidates.len(), request, ChannelCollection::new(catalog));
                candidate.add_member(index, request.report_events, &channels);
                candidates.push(candidate);
                continue;
            }

            let period_ms = self.periods.nearest(request.period_ms);
            let band = match request.scope {
                ScanScope::Band(band) => Some(band),
                ScanScope::Channels(_) => None,
            };
            let slot = candidates.iter().position(|c| {
                !c.exact
                    && c.period_ms == period_ms
                    && match (c.band, band) {
                        (Some(existing), Some(wanted)) => existing == wanted,
                        (None, None) => c.channels.union_count(&channels) <= self.limits.max_channels,
                        _ => false,
                    }
            });

            match slot {
                Some(slot) => candidates[slot].add_member(index, request.report_events, &channels),
                None => {
                    let mut candidate =
                        Candidate::pooled(candidates.len(), period_ms, band, ChannelCollection::new(catalog));
                    candidate.add_member(index, request.report_events, &channels);
                    candidates.push(candidate);
                }
            }
        }

        candidates
    }

    /// Folds buckets into their nearest neighbour until the bucket limit holds.
    fn enforce_bucket_limit(&self, candidates: &mut alloc::vec::Vec<Candidate<'_>>) {
        while candidates.len() > self.limits.max_buckets {
            let Some((victim, target)) = self.pick_elimination(candidates) else {
                break;
            };
            let removed = candidates.remove(victim);
            let target = if target > victim { target - 1 } else { target };
            debug!(
                period_ms = removed.period_ms,
                into_period_ms = candidates[target].period_ms,
                members = removed.members.len(),
                "bucket eliminated"
            );
            candidates[target].absorb(removed);
        }
    }

    /// The bucket whose loss hurts least, and where its members go.
    fn pick_elimination(&self, candidates: &[Candidate<'_>]) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize, f64)> = None;

        for (index, candidate) in candidates.iter().enumerate() {
            // Fixed-period members fall back to a fixed-period bucket whenever one survives.
            let fixed_only = !candidate.is_backoff()
                && candidates
                    .iter()
                    .enumerate()
                    .any(|(other, c)| other != index && !c.is_backoff());
            let survivors = candidates
                .iter()
                .enumerate()
                .filter(|(other, c)| *other != index && !(fixed_only && c.is_backoff()))
                .map(|(other, c)| (other, c.period_ms));
            let Some(target) = self.policy.closest(candidate.period_ms, survivors) else {
                continue;
            };

            let harm = self.elimination_harm(candidate, &candidates[target]);
            let better = match best {
                None => true,
                Some((current, _, best_harm)) => match harm.total_cmp(&best_harm) {
                    Ordering::Less => true,
                    Ordering::Equal => candidate.looseness() > candidates[current].looseness(),
                    Ordering::Greater => false,
                },
            };
            if better {
                best = Some((index, target, harm));
            }
        }

        best.map(|(victim, target, _)| (victim, target))
    }

    /// Members pushed to a slower bucket count double.
    fn elimination_harm(&self, victim: &Candidate<'_>, target: &Candidate<'_>) -> f64 {
        let distance = self.policy.distance(victim.period_ms, target.period_ms);
        let slowdown = if target.period_ms > victim.period_ms { 2.0 } else { 1.0 };
        distance * slowdown * victim.members.len() as f64
    }

    /// Trims channels, loosest bucket first, until the channel list fits.
    fn enforce_channel_limit(&self, candidates: &mut alloc::vec::Vec<Candidate<'_>>) {
        let mut total: usize = candidates.iter().map(|c| c.channels.channel_count()).sum();

        while total > self.limits.max_channels {
            let loosest = candidates
                .iter()
                .enumerate()
                .filter(|(_, c)| c.channels.channel_count() > 1)
                .max_by_key(|(_, c)| c.looseness())
                .map(|(index, _)| index);

            if let Some(index) = loosest {
                if let Some(freq) = candidates[index].channels.drop_oldest() {
                    warn!(
                        freq,
                        period_ms = candidates[index].period_ms,
                        "channel dropped to fit channel limit"
                    );
                    total -= 1;
                }
                continue;
            }

            // Every bucket is down to a single channel: drop whole buckets.
            let Some(index) = candidates
                .iter()
                .enumerate()
                .max_by_key(|(_, c)| c.looseness())
                .map(|(index, _)| index)
            else {
                break;
            };
            let removed = candidates.remove(index);
            warn!(
                period_ms = removed.period_ms,
                members = removed.members.len(),
                "bucket dropped to fit channel limit"
            );
            total -= removed.channels.channel_count();
        }
    }

    /// Picks the base period and pulls exact-period buckets onto multiples of it.
    fn align_periods(&self, candidates: &mut [Candidate<'_>]) -> u32 {
        let pooled_min = candidates.iter().filter(|c| !c.exact).map(|c| c.period_ms).min();
        let exact_min = candidates.iter().filter(|c| c.exact).map(|c| c.period_ms).min();

        let base_period_ms = match (pooled_min, exact_min) {
            (Some(pooled), Some(exact)) => {
                let mut base = pooled;
                while base > exact && base % 2 == 0 {
                    base /= 2;
                }
                base
            }
            (Some(pooled), None) => pooled,
            (None, Some(exact)) => exact,
            (None, None) => self.limits.idle_period_ms,
        };

        for candidate in candidates.iter_mut().filter(|c| c.exact) {
            let aligned = nearest_multiple(candidate.period_ms, base_period_ms);
            if aligned != candidate.period_ms {
                debug!(
                    period_ms = candidate.period_ms,
                    aligned_ms = aligned,
                    base_period_ms,
                    "exact bucket aligned to base period"
                );
                candidate.period_ms = aligned;
            }
        }

        base_period_ms
    }
}

/// Nearest multiple of `base` (at least one); halfway rounds down.
fn nearest_multiple(period_ms: u32, base: u32) -> u32 {
    let quotient = period_ms / base;
    let remainder = period_ms % base;
    if quotient == 0 {
        return base;
    }
    if u64::from(remainder) * 2 > u64::from(base) {
        // the next multiple may not fit in u32
        (quotient + 1).checked_mul(base).unwrap_or(quotient * base)
    } else {
        quotient * base
    }
}

fn min_nonzero(values: impl Iterator<Item = u32>, limit: u32) -> u32 {
    values.filter(|&v| v > 0).min().map_or(limit, |v| v.min(limit))
}
