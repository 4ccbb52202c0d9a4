//! Client request registry.
//!
//! Admits scan requests from clients, keeps the live set, and recomputes the
//! schedule whenever it changes. This is the single owner of the scheduler;
//! callers serialise access to it.

use crate::channels::{ChannelCatalog, KnownBandsCatalog, ScanScope};
use crate::config::{ConfigError, SchedulerConfig, SchedulerLimits};
use crate::request::ScanRequest;
use crate::schedule::{Bucket, Schedule, HW_MAX_CHANNELS};
use crate::scheduler::ScanScheduler;
use arrayvec::ArrayString;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const MAX_REGISTERED_REQUESTS: usize = 64; // live requests across all clients
pub const MAX_CLIENT_TAG_LEN: usize = 32; // bytes
/// Longest accepted period, as a multiple of the longest table period.
const MAX_PERIOD_TABLE_MULTIPLE: u32 = 4;

pub type ClientTag = ArrayString<MAX_CLIENT_TAG_LEN>;
pub type RequestId = u32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("period {period_ms}ms must be positive")]
    InvalidPeriod { period_ms: u32 },
    #[error("period {period_ms}ms exceeds the longest supported {max_ms}ms")]
    PeriodTooLong { period_ms: u32, max_ms: u32 },
    #[error("scan scope is empty")]
    EmptyScope,
    #[error("band 0x{bits:02x} has no known channels")]
    UnknownBand { bits: u8 },
    #[error("{count} channels requested, at most {max} allowed")]
    TooManyChannels { count: usize, max: usize },
    #[error("invalid backoff: period {period_ms}ms, max {max_period_ms}ms, {step_count} steps")]
    InvalidBackoff {
        period_ms: u32,
        max_period_ms: u32,
        step_count: u32,
    },
    #[error("client tag must be 1..={max} bytes")]
    InvalidClientTag { max: usize },
    #[error("registry full ({capacity} requests)")]
    RegistryFull { capacity: usize },
    #[error("unknown request id {id}")]
    UnknownRequest { id: RequestId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredRequest {
    pub id: RequestId,
    pub client: ClientTag,
    pub request: ScanRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistryStats {
    pub total_registered: u32,
    pub total_rejected: u32,
    pub total_unregistered: u32,
    pub recomputes: u32,
    pub schedule_changes: u32,
    pub currently_registered: u8,
}

#[derive(Debug)]
pub struct RequestRegistry<C: ChannelCatalog = KnownBandsCatalog> {
    scheduler: ScanScheduler<C>,
    entries: Vec<RegisteredRequest, MAX_REGISTERED_REQUESTS>,
    next_id: RequestId,
    stats: RegistryStats,
}

impl RequestRegistry<KnownBandsCatalog> {
    pub fn new() -> Self {
        Self::with_scheduler(ScanScheduler::new())
    }

    pub fn with_config(config: &SchedulerConfig) -> Result<Self, ConfigError> {
        Ok(Self::with_scheduler(ScanScheduler::with_config(config)?))
    }
}

impl Default for RequestRegistry<KnownBandsCatalog> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ChannelCatalog> RequestRegistry<C> {
    pub fn with_scheduler(scheduler: ScanScheduler<C>) -> Self {
        Self {
            scheduler,
            entries: Vec::new(),
            next_id: 1,
            stats: RegistryStats::default(),
        }
    }

    /// Admits a request and reschedules.
    pub fn register(&mut self, client: &str, request: ScanRequest) -> Result<RequestId, AdmissionError> {
        if let Err(e) = self.admit(client, &request) {
            self.stats.total_rejected += 1;
            warn!(client, error = %e, "scan request rejected");
            return Err(e);
        }

        if self.entries.is_full() {
            self.stats.total_rejected += 1;
            return Err(AdmissionError::RegistryFull {
                capacity: MAX_REGISTERED_REQUESTS,
            });
        }

        let client = ClientTag::from(client).map_err(|_| AdmissionError::InvalidClientTag {
            max: MAX_CLIENT_TAG_LEN,
        })?;
        let id = self.next_id;
        // 0 is never handed out
        self.next_id = self.next_id.wrapping_add(1).max(1);

        let _ = self.entries.push(RegisteredRequest { id, client, request });
        self.stats.total_registered += 1;
        info!(id, client = %client, "scan request registered");

        self.recompute();
        Ok(id)
    }

    pub fn unregister(&mut self, id: RequestId) -> Result<(), AdmissionError> {
        let position = self
            .entries
            .iter()
            .position(|entry| entry.id == id)
            .ok_or(AdmissionError::UnknownRequest { id })?;

        // remove() keeps registration order, which the schedule depends on
        let entry = self.entries.remove(position);
        self.stats.total_unregistered += 1;
        info!(id, client = %entry.client, "scan request unregistered");

        self.recompute();
        Ok(())
    }

    /// Drops every request of a client; returns how many were removed.
    pub fn unregister_client(&mut self, client: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.client.as_str() != client);
        let removed = before - self.entries.len();

        if removed > 0 {
            self.stats.total_unregistered += removed as u32;
            info!(client, removed, "client scan requests unregistered");
            self.recompute();
        }
        removed
    }

    pub fn set_limits(&mut self, limits: SchedulerLimits) -> Result<(), ConfigError> {
        limits.validate()?;
        self.scheduler.set_limits(limits);
        self.recompute();
        Ok(())
    }

    pub fn limits(&self) -> SchedulerLimits {
        self.scheduler.limits()
    }

    pub fn schedule(&self) -> &Schedule {
        self.scheduler.schedule()
    }

    pub fn scheduler(&self) -> &ScanScheduler<C> {
        &self.scheduler
    }

    pub fn requests(&self) -> &[RegisteredRequest] {
        &self.entries
    }

    pub fn bucket_for(&self, id: RequestId) -> Option<&Bucket> {
        let position = self.entries.iter().position(|entry| entry.id == id)?;
        self.scheduler.bucket_for_request(position)
    }

    pub fn stats(&self) -> &RegistryStats {
        &self.stats
    }

    fn admit(&self, client: &str, request: &ScanRequest) -> Result<(), AdmissionError> {
        // Client tag must fit the fixed-size tag buffer
        if client.is_empty() || client.len() > MAX_CLIENT_TAG_LEN {
            return Err(AdmissionError::InvalidClientTag {
                max: MAX_CLIENT_TAG_LEN,
            });
        }

        // Validate period against the period table
        if request.period_ms == 0 {
            return Err(AdmissionError::InvalidPeriod {
                period_ms: request.period_ms,
            });
        }
        let max_ms = self
            .scheduler
            .period_table()
            .max_period()
            .saturating_mul(MAX_PERIOD_TABLE_MULTIPLE);
        if request.period_ms > max_ms {
            return Err(AdmissionError::PeriodTooLong {
                period_ms: request.period_ms,
                max_ms,
            });
        }

        // Scope must expand to at least one frequency
        match &request.scope {
            ScanScope::Band(band) => {
                if self.scheduler.catalog().expand_band(*band).is_empty() {
                    return Err(AdmissionError::UnknownBand { bits: band.bits() });
                }
            }
            ScanScope::Channels(channels) => {
                if channels.is_empty() {
                    return Err(AdmissionError::EmptyScope);
                }
                // duplicates count once
                let count = self.scheduler.catalog().expand(&request.scope).len();
                if count > HW_MAX_CHANNELS {
                    return Err(AdmissionError::TooManyChannels {
                        count,
                        max: HW_MAX_CHANNELS,
                    });
                }
            }
        }

        // Backoff needs a ceiling above the period and at least one step
        if request.is_exponential()
            && (request.max_period_ms < request.period_ms || request.step_count == 0)
        {
            return Err(AdmissionError::InvalidBackoff {
                period_ms: request.period_ms,
                max_period_ms: request.max_period_ms,
                step_count: request.step_count,
            });
        }

        Ok(())
    }

    fn recompute(&mut self) {
        let requests: alloc::vec::Vec<ScanRequest> =
            self.entries.iter().map(|entry| entry.request.clone()).collect();

        let changed = self.scheduler.update_schedule(&requests);
        self.stats.recomputes += 1;
        if changed {
            self.stats.schedule_changes += 1;
        }
        self.stats.currently_registered = self.entries.len() as u8;
        debug!(
            registered = self.entries.len(),
            changed,
            "schedule recomputed"
        );
    }
}
