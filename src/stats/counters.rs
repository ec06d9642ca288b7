//! Pipeline counters.
//!
//! Every stage of the pipeline bumps a lock-free counter here so a running
//! session (or the `status` command afterwards) can report what happened to
//! the samples it was fed.

use crate::source::types::Sample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for one pipeline session.
#[derive(Debug)]
pub struct PipelineStats {
    fixes: AtomicU64,
    satellite_events: AtomicU64,
    radio_scans: AtomicU64,
    environment_readings: AtomicU64,
    inertial_samples: AtomicU64,
    step_events: AtomicU64,
    raw_sentences: AtomicU64,
    updates_finalized: AtomicU64,
    updates_delivered: AtomicU64,
    updates_rejected: AtomicU64,
    transport_failures: AtomicU64,
    updates_batched: AtomicU64,
    batches_persisted: AtomicU64,
    flush_failures: AtomicU64,
    encode_failures: AtomicU64,
    improvements_received: AtomicU64,
    session_start: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            fixes: AtomicU64::new(0),
            satellite_events: AtomicU64::new(0),
            radio_scans: AtomicU64::new(0),
            environment_readings: AtomicU64::new(0),
            inertial_samples: AtomicU64::new(0),
            step_events: AtomicU64::new(0),
            raw_sentences: AtomicU64::new(0),
            updates_finalized: AtomicU64::new(0),
            updates_delivered: AtomicU64::new(0),
            updates_rejected: AtomicU64::new(0),
            transport_failures: AtomicU64::new(0),
            updates_batched: AtomicU64::new(0),
            batches_persisted: AtomicU64::new(0),
            flush_failures: AtomicU64::new(0),
            encode_failures: AtomicU64::new(0),
            improvements_received: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create stats backed by a file, resuming from its last saved values.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!("Could not load previous pipeline stats: {e}");
        }

        stats
    }

    /// Count one incoming sample by kind.
    pub fn record_sample(&self, sample: &Sample) {
        let counter = match sample {
            Sample::Fix(_) => &self.fixes,
            Sample::Satellites(_) => &self.satellite_events,
            Sample::Radio(_) => &self.radio_scans,
            Sample::Environment(_) => &self.environment_readings,
            Sample::Inertial(_) => &self.inertial_samples,
            Sample::Step(_) => &self.step_events,
            Sample::Raw(_) => &self.raw_sentences,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_finalized(&self) {
        self.updates_finalized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.updates_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.updates_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_failure(&self) {
        self.transport_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batched(&self) {
        self.updates_batched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_persisted(&self) {
        self.batches_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush_failure(&self) {
        self.flush_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_encode_failure(&self) {
        self.encode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_improvement(&self) {
        self.improvements_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            fixes: self.fixes.load(Ordering::Relaxed),
            satellite_events: self.satellite_events.load(Ordering::Relaxed),
            radio_scans: self.radio_scans.load(Ordering::Relaxed),
            environment_readings: self.environment_readings.load(Ordering::Relaxed),
            inertial_samples: self.inertial_samples.load(Ordering::Relaxed),
            step_events: self.step_events.load(Ordering::Relaxed),
            raw_sentences: self.raw_sentences.load(Ordering::Relaxed),
            updates_finalized: self.updates_finalized.load(Ordering::Relaxed),
            updates_delivered: self.updates_delivered.load(Ordering::Relaxed),
            updates_rejected: self.updates_rejected.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
            updates_batched: self.updates_batched.load(Ordering::Relaxed),
            batches_persisted: self.batches_persisted.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            improvements_received: self.improvements_received.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Human-readable summary for the CLI.
    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "Pipeline Statistics:\n\
             - Samples received: {} ({} fixes, {} satellite events, {} radio scans,\n\
             \x20  {} environment, {} inertial, {} step events, {} raw sentences)\n\
             - Updates finalized: {}\n\
             - Delivered in realtime: {} (rejected: {}, transport failures: {})\n\
             - Added to batch: {}\n\
             - Batches persisted: {} (flush failures: {})\n\
             - Encode failures: {}\n\
             - Improvements received: {}\n\
             - Session duration: {} seconds",
            s.total_samples(),
            s.fixes,
            s.satellite_events,
            s.radio_scans,
            s.environment_readings,
            s.inertial_samples,
            s.step_events,
            s.raw_sentences,
            s.updates_finalized,
            s.updates_delivered,
            s.updates_rejected,
            s.transport_failures,
            s.updates_batched,
            s.batches_persisted,
            s.flush_failures,
            s.encode_failures,
            s.improvements_received,
            s.session_duration_secs
        )
    }

    /// Save counters to the persistence file, if any.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let persisted = PersistedStats {
                counters: self.snapshot(),
                last_updated: Utc::now(),
            };
            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;
                self.restore(&persisted.counters);
            }
        }
        Ok(())
    }

    fn restore(&self, c: &StatsSnapshot) {
        self.fixes.store(c.fixes, Ordering::Relaxed);
        self.satellite_events.store(c.satellite_events, Ordering::Relaxed);
        self.radio_scans.store(c.radio_scans, Ordering::Relaxed);
        self.environment_readings
            .store(c.environment_readings, Ordering::Relaxed);
        self.inertial_samples.store(c.inertial_samples, Ordering::Relaxed);
        self.step_events.store(c.step_events, Ordering::Relaxed);
        self.raw_sentences.store(c.raw_sentences, Ordering::Relaxed);
        self.updates_finalized
            .store(c.updates_finalized, Ordering::Relaxed);
        self.updates_delivered
            .store(c.updates_delivered, Ordering::Relaxed);
        self.updates_rejected.store(c.updates_rejected, Ordering::Relaxed);
        self.transport_failures
            .store(c.transport_failures, Ordering::Relaxed);
        self.updates_batched.store(c.updates_batched, Ordering::Relaxed);
        self.batches_persisted
            .store(c.batches_persisted, Ordering::Relaxed);
        self.flush_failures.store(c.flush_failures, Ordering::Relaxed);
        self.encode_failures.store(c.encode_failures, Ordering::Relaxed);
        self.improvements_received
            .store(c.improvements_received, Ordering::Relaxed);
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.restore(&StatsSnapshot::zeroed(self.session_start));
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub fixes: u64,
    pub satellite_events: u64,
    pub radio_scans: u64,
    pub environment_readings: u64,
    pub inertial_samples: u64,
    pub step_events: u64,
    pub raw_sentences: u64,
    pub updates_finalized: u64,
    pub updates_delivered: u64,
    pub updates_rejected: u64,
    pub transport_failures: u64,
    pub updates_batched: u64,
    pub batches_persisted: u64,
    pub flush_failures: u64,
    pub encode_failures: u64,
    pub improvements_received: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

impl StatsSnapshot {
    fn zeroed(session_start: DateTime<Utc>) -> Self {
        Self {
            fixes: 0,
            satellite_events: 0,
            radio_scans: 0,
            environment_readings: 0,
            inertial_samples: 0,
            step_events: 0,
            raw_sentences: 0,
            updates_finalized: 0,
            updates_delivered: 0,
            updates_rejected: 0,
            transport_failures: 0,
            updates_batched: 0,
            batches_persisted: 0,
            flush_failures: 0,
            encode_failures: 0,
            improvements_received: 0,
            session_start,
            session_duration_secs: 0,
        }
    }

    pub fn total_samples(&self) -> u64 {
        self.fixes
            + self.satellite_events
            + self.radio_scans
            + self.environment_readings
            + self.inertial_samples
            + self.step_events
            + self.raw_sentences
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    counters: StatsSnapshot,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared stats handle.
pub type SharedStats = Arc<PipelineStats>;

pub fn create_shared_stats() -> SharedStats {
    Arc::new(PipelineStats::new())
}

pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedStats {
    Arc::new(PipelineStats::with_persistence(path))
}
