use scanbus::channels::CHANNELS_24_GHZ;
use scanbus::config::{DEFAULT_IDLE_PERIOD_MS, DEFAULT_MAX_BATCH};
use scanbus::*;

fn band_request(band: Band, period_ms: u32) -> ScanRequest {
    ScanRequest::new(ScanScope::Band(band), period_ms)
}

fn channel_request(channels: &[u32], period_ms: u32) -> ScanRequest {
    ScanRequest::new(ScanScope::Channels(channels.to_vec()), period_ms)
}

fn assert_covers_all(scheduler: &ScanScheduler, requests: &[ScanRequest]) {
    let covered = scheduler.schedule().covered_frequencies(scheduler.catalog());
    for (index, request) in requests.iter().enumerate() {
        for freq in scheduler.catalog().expand(&request.scope) {
            assert!(
                covered.contains(&freq),
                "request {} frequency {} missing from schedule",
                index,
                freq
            );
        }
    }
}

/// Deterministic request generator for invariant sweeps.
struct RequestGenerator {
    state: u64,
}

impl RequestGenerator {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.state >> 33
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }

    fn request(&mut self, catalog: &KnownBandsCatalog) -> ScanRequest {
        let bands = [
            Band::BAND_24_GHZ,
            Band::BAND_5_GHZ,
            Band::BAND_5_GHZ_DFS_ONLY,
            Band::BAND_BOTH,
            Band::BAND_BOTH_WITH_DFS,
        ];
        let scope = if self.below(2) == 0 {
            ScanScope::Band(bands[self.below(bands.len() as u64) as usize])
        } else {
            let all = catalog.all_frequencies();
            let count = 1 + self.below(6) as usize;
            let channels = (0..count)
                .map(|_| all[self.below(all.len() as u64) as usize])
                .collect();
            ScanScope::Channels(channels)
        };

        let period_ms = 1_000 + self.below(2_000_000) as u32;
        let mut request = ScanRequest::new(scope, period_ms)
            .with_max_scans_to_cache(self.below(12) as u32)
            .with_num_bssids_per_scan(self.below(40) as u32)
            .with_report_events(ReportEvents(self.below(8) as u8));
        if self.below(5) == 0 {
            request = request.with_backoff(period_ms * 4, 1 + self.below(5) as u32);
        }
        request
    }
}

#[test]
fn test_no_requests_yields_idle_schedule() {
    let mut scheduler = ScanScheduler::new();
    scheduler.update_schedule(&[]);

    let schedule = scheduler.schedule();
    assert_eq!(schedule.bucket_count(), 0);
    assert_eq!(schedule.base_period_ms, DEFAULT_IDLE_PERIOD_MS);
}

#[test]
fn test_schedule_before_first_update_is_idle() {
    let scheduler = ScanScheduler::new();
    assert!(scheduler.schedule().is_empty());
    assert_eq!(scheduler.schedule().base_period_ms, DEFAULT_IDLE_PERIOD_MS);
}

#[test]
fn test_single_dual_band_request() {
    let mut scheduler = ScanScheduler::new();
    let requests = [band_request(Band::BAND_BOTH, 20_000)];
    scheduler.update_schedule(&requests);

    let schedule = scheduler.schedule();
    assert_eq!(schedule.bucket_count(), 1);
    assert_eq!(schedule.base_period_ms, 20_000);
    assert_eq!(schedule.buckets[0].period_ms, 20_000);
    assert_eq!(schedule.buckets[0].scope, ScanScope::Band(Band::BAND_BOTH));

    let covered = schedule.covered_frequencies(scheduler.catalog());
    for freq in scheduler.catalog().expand_band(Band::BAND_24_GHZ) {
        assert!(covered.contains(&freq));
    }
    for freq in scheduler.catalog().expand_band(Band::BAND_5_GHZ) {
        assert!(covered.contains(&freq));
    }
}

#[test]
fn test_off_table_period_snaps_to_nearest_entry() {
    let mut scheduler = ScanScheduler::new();
    scheduler.update_schedule(&[band_request(Band::BAND_24_GHZ, 7_500)]);

    let schedule = scheduler.schedule();
    assert_eq!(schedule.base_period_ms, 10_000);
    assert_eq!(schedule.buckets[0].period_ms, 10_000);
}

#[test]
fn test_bucket_compression_preserves_coverage() {
    let mut scheduler = ScanScheduler::new();
    scheduler.set_max_buckets(2);

    let requests = [
        channel_request(&[2412, 2437], 10_000),
        channel_request(&[5180], 80_000),
        band_request(Band::BAND_5_GHZ_DFS_ONLY, 640_000),
    ];
    scheduler.update_schedule(&requests);

    let schedule = scheduler.schedule();
    assert_eq!(schedule.bucket_count(), 2);
    assert!(schedule.periods_aligned());
    assert_covers_all(&scheduler, &requests);
    // The loosest bucket is the cheapest to fold away.
    assert_eq!(scheduler.bucket_for_request(2).unwrap().period_ms, 80_000);
}

#[test]
fn test_results_cache_depth_takes_smallest_request() {
    let mut scheduler = ScanScheduler::new();
    scheduler.update_schedule(&[
        band_request(Band::BAND_24_GHZ, 20_000).with_max_scans_to_cache(5),
        band_request(Band::BAND_5_GHZ, 40_000).with_max_scans_to_cache(8),
        band_request(Band::BAND_5_GHZ, 80_000),
    ]);

    assert!(DEFAULT_MAX_BATCH > 5);
    assert_eq!(scheduler.schedule().report_threshold_num_scans, 5);
}

#[test]
fn test_results_cache_depth_default_and_ceiling() {
    let mut scheduler = ScanScheduler::new();
    scheduler.update_schedule(&[band_request(Band::BAND_24_GHZ, 20_000)]);
    assert_eq!(scheduler.schedule().report_threshold_num_scans, DEFAULT_MAX_BATCH);

    scheduler.update_schedule(&[band_request(Band::BAND_24_GHZ, 20_000).with_max_scans_to_cache(500)]);
    assert_eq!(scheduler.schedule().report_threshold_num_scans, DEFAULT_MAX_BATCH);
}

#[test]
fn test_max_results_per_scan() {
    let mut scheduler = ScanScheduler::new();
    scheduler.set_max_ap_per_scan(24);
    scheduler.update_schedule(&[
        band_request(Band::BAND_24_GHZ, 20_000).with_num_bssids_per_scan(16),
        band_request(Band::BAND_5_GHZ, 20_000).with_num_bssids_per_scan(0),
        band_request(Band::BAND_5_GHZ, 40_000).with_num_bssids_per_scan(20),
    ]);
    assert_eq!(scheduler.schedule().max_ap_per_scan, 16);

    scheduler.update_schedule(&[band_request(Band::BAND_24_GHZ, 20_000)]);
    assert_eq!(scheduler.schedule().max_ap_per_scan, 24);
}

#[test]
fn test_idempotent_update() {
    let requests = [
        band_request(Band::BAND_BOTH, 20_000).with_report_events(ReportEvents::FULL_RESULTS),
        channel_request(&[5500, 5520], 40_000),
        channel_request(&[2412], 15_000).with_backoff(120_000, 3),
    ];

    let mut scheduler = ScanScheduler::new();
    scheduler.update_schedule(&requests);
    let first = scheduler.schedule().clone();
    assert!(!scheduler.update_schedule(&requests));
    assert_eq!(&first, scheduler.schedule());

    let mut other = ScanScheduler::new();
    other.update_schedule(&requests);
    assert_eq!(&first, other.schedule());
}

#[test]
fn test_channel_limit_trims_loosest_bucket_oldest_first() {
    let mut scheduler = ScanScheduler::new();
    scheduler.set_max_channels(10);
    scheduler.update_schedule(&[
        band_request(Band::BAND_24_GHZ, 160_000),
        channel_request(&[5180, 5200], 10_000),
    ]);

    let schedule = scheduler.schedule();
    assert_eq!(schedule.total_channels(scheduler.catalog()), 10);
    assert_eq!(schedule.buckets[0].scope, ScanScope::Channels(vec![5180, 5200]));
    assert_eq!(schedule.buckets[1].scope, ScanScope::Channels(CHANNELS_24_GHZ[5..].to_vec()));
}

#[test]
fn test_channel_limit_below_bucket_count_drops_loosest_bucket() {
    let mut scheduler = ScanScheduler::new();
    scheduler.set_max_channels(1);
    scheduler.update_schedule(&[channel_request(&[2412], 10_000), channel_request(&[5180], 40_000)]);

    let schedule = scheduler.schedule();
    assert_eq!(schedule.bucket_count(), 1);
    assert_eq!(schedule.buckets[0].period_ms, 10_000);
    assert_eq!(scheduler.bucket_index_for_request(0), Some(0));
    assert_eq!(scheduler.bucket_index_for_request(1), None);
}

#[test]
fn test_reassign_policy_changes_fallback_bucket() {
    let requests = [
        channel_request(&[2412], 10_000),
        channel_request(&[2417], 10_000),
        channel_request(&[2422], 10_000),
        channel_request(&[5180], 40_000),
        channel_request(&[5745], 80_000),
        channel_request(&[5765], 80_000),
        channel_request(&[5785], 80_000),
    ];

    let mut log_scale = ScanScheduler::new().with_policy(ReassignPolicy::LogScale);
    log_scale.set_max_buckets(2);
    log_scale.update_schedule(&requests);
    assert_eq!(log_scale.schedule().bucket_count(), 2);
    assert_eq!(log_scale.bucket_for_request(3).unwrap().period_ms, 80_000);

    let mut absolute = ScanScheduler::new().with_policy(ReassignPolicy::Absolute);
    absolute.set_max_buckets(2);
    absolute.update_schedule(&requests);
    assert_eq!(absolute.schedule().bucket_count(), 2);
    assert_eq!(absolute.bucket_for_request(3).unwrap().period_ms, 10_000);

    assert_covers_all(&log_scale, &requests);
    assert_covers_all(&absolute, &requests);
}

#[test]
fn test_report_events_merged_on_elimination() {
    let mut scheduler = ScanScheduler::new();
    scheduler.set_max_buckets(1);
    scheduler.update_schedule(&[
        channel_request(&[2412], 10_000).with_report_events(ReportEvents::EACH_SCAN),
        channel_request(&[5180], 20_000).with_report_events(ReportEvents::NO_BATCH),
    ]);

    let schedule = scheduler.schedule();
    assert_eq!(schedule.bucket_count(), 1);
    assert_eq!(
        schedule.buckets[0].report_events,
        ReportEvents::EACH_SCAN | ReportEvents::NO_BATCH
    );
}

#[test]
fn test_fixed_period_request_never_inherits_backoff() {
    let mut scheduler = ScanScheduler::new();
    scheduler.set_max_buckets(1);
    scheduler.update_schedule(&[
        band_request(Band::BAND_24_GHZ, 20_000).with_backoff(160_000, 3),
        band_request(Band::BAND_5_GHZ, 20_000),
    ]);

    let schedule = scheduler.schedule();
    assert_eq!(schedule.bucket_count(), 1);
    let bucket = scheduler.bucket_for_request(1).unwrap();
    assert_eq!(bucket.period_ms, 20_000);
    assert!(!bucket.is_exponential());
    assert_eq!(bucket.max_period_ms, 0);
    assert_eq!(bucket.step_count, 0);
    assert_eq!(scheduler.bucket_index_for_request(0), Some(0));
    assert!(schedule.periods_aligned());
}

#[test]
fn test_pooled_bucket_folds_into_pooled_survivor() {
    let mut scheduler = ScanScheduler::new();
    scheduler.set_max_buckets(2);
    scheduler.update_schedule(&[
        band_request(Band::BAND_5_GHZ_DFS_ONLY, 20_000).with_backoff(160_000, 3),
        band_request(Band::BAND_24_GHZ, 20_000),
        band_request(Band::BAND_5_GHZ, 20_000),
    ]);

    assert_eq!(scheduler.schedule().bucket_count(), 2);
    let backoff = scheduler.bucket_for_request(0).unwrap();
    assert!(backoff.is_exponential());
    assert_eq!(backoff.max_period_ms, 160_000);

    let pooled = scheduler.bucket_for_request(2).unwrap();
    assert!(!pooled.is_exponential());
    assert_eq!(pooled.scope, ScanScope::Band(Band::BAND_BOTH));
    assert_eq!(
        scheduler.bucket_index_for_request(1),
        scheduler.bucket_index_for_request(2)
    );
}

#[test]
fn test_custom_period_table() {
    let table = BucketPeriodTable::from_entries(&[5_000, 15_000, 45_000]).unwrap();
    let mut scheduler = ScanScheduler::new().with_period_table(table);
    scheduler.update_schedule(&[band_request(Band::BAND_24_GHZ, 12_000), band_request(Band::BAND_5_GHZ, 50_000)]);

    let schedule = scheduler.schedule();
    assert_eq!(schedule.base_period_ms, 15_000);
    assert_eq!(schedule.buckets[1].period_ms, 45_000);
    assert!(schedule.periods_aligned());
}

#[test]
fn test_with_config() {
    let config = SchedulerConfig::from_json_str(
        r#"{"limits":{"max_buckets":3,"idle_period_ms":60000},"reassign_policy":"Absolute"}"#,
    )
    .unwrap();
    let scheduler = ScanScheduler::with_config(&config).unwrap();

    assert_eq!(scheduler.max_buckets(), 3);
    assert_eq!(scheduler.reassign_policy(), ReassignPolicy::Absolute);
    assert_eq!(scheduler.schedule().base_period_ms, 60_000);
}

#[test]
fn test_invariants_hold_for_generated_request_sets() {
    let catalog = KnownBandsCatalog::new();
    let mut generator = RequestGenerator::new(0x5CA7_B055_1234_ABCD);

    for round in 0..200 {
        let max_buckets = 1 + generator.below(8) as usize;
        let max_channels = 1 + generator.below(128) as usize;
        let count = generator.below(24) as usize;
        let requests: Vec<ScanRequest> = (0..count).map(|_| generator.request(&catalog)).collect();

        let mut scheduler = ScanScheduler::new();
        scheduler.set_max_buckets(max_buckets);
        scheduler.set_max_channels(max_channels);
        scheduler.update_schedule(&requests);
        let schedule = scheduler.schedule().clone();

        assert!(schedule.bucket_count() <= max_buckets, "round {}", round);
        assert!(
            schedule.total_channels(scheduler.catalog()) <= max_channels,
            "round {}",
            round
        );
        assert!(schedule.periods_aligned(), "round {}: {:?}", round, schedule);
        assert!(schedule.max_ap_per_scan <= scheduler.max_ap_per_scan());
        assert!(schedule.report_threshold_num_scans <= scheduler.max_batch());

        for (index, request) in requests.iter().enumerate() {
            if let Some(bucket) = scheduler.bucket_for_request(index) {
                if !request.is_exponential() {
                    assert!(!bucket.is_exponential(), "round {} request {}", round, index);
                }
            }
        }

        if schedule.total_channels(scheduler.catalog()) < max_channels {
            assert_covers_all(&scheduler, &requests);
        }

        assert!(!scheduler.update_schedule(&requests), "round {} not idempotent", round);
        assert_eq!(&schedule, scheduler.schedule());
    }
}
