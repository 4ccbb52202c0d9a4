//! # Multi-Client Background Scan Scheduler
//!
//! Compresses many independent periodic scan requests into the one bounded
//! schedule a resource-constrained radio controller can run.
//!
//! ## Features
//!
//! - **Deterministic scheduling**: the same requests and limits always yield
//!   the same schedule
//! - **Hardware ceilings**: bucket count, channel list length, result cache
//!   depth and results per scan are never exceeded
//! - **Period pooling**: requests snap onto a geometric period table and share
//!   buckets; backoff requests keep their exact period
//! - **Request registry**: admission checks and recompute-on-change
//! - **Control protocol**: JSON-lines messages for the scan service
//! - **Embedded-friendly**: fixed-capacity bucket and registry storage
//!
//! ## Quick Start
//!
//! ```rust
//! use scanbus::{Band, ScanRequest, ScanScheduler, ScanScope};
//!
//! let mut scheduler = ScanScheduler::new();
//! scheduler.set_max_buckets(4);
//!
//! let requests = [
//!     ScanRequest::new(ScanScope::Band(Band::BAND_BOTH), 20_000),
//!     ScanRequest::new(ScanScope::Channels(vec![2412, 2437]), 7_500),
//! ];
//! scheduler.update_schedule(&requests);
//!
//! let schedule = scheduler.schedule();
//! assert_eq!(schedule.base_period_ms, 10_000);
//! assert_eq!(schedule.bucket_count(), 2);
//! ```
//!
//! ## Architecture
//!
//! - [`channels`] - Band catalog and channel collections
//! - [`periods`] - Legal bucket period table
//! - [`request`] - Client scan requests
//! - [`schedule`] - Buckets and the computed schedule
//! - [`scheduler`] - The scheduling algorithm
//! - [`config`] - Limits and JSON configuration
//! - [`registry`] - Request admission and the live request set
//! - [`protocol`] - Control messages for the scan service

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::new_without_default)]

extern crate alloc;

pub mod channels;
pub mod config;
pub mod periods;
pub mod protocol;
pub mod registry;
pub mod request;
pub mod schedule;
pub mod scheduler;

// Re-export main public types for convenience
pub use channels::{Band, ChannelCatalog, ChannelCollection, KnownBandsCatalog, ScanScope};
pub use config::{ConfigError, SchedulerConfig, SchedulerLimits};
pub use periods::{BucketPeriodTable, PREDEFINED_BUCKET_PERIODS_MS};
pub use registry::{AdmissionError, RequestId, RequestRegistry};
pub use request::{ReportEvents, ScanRequest};
pub use schedule::{Bucket, Schedule};
pub use scheduler::{ReassignPolicy, ScanScheduler};
