//! Accumulation of incoming samples into the in-progress update.
//!
//! Producers push samples from their own threads. Every append and every
//! finalize goes through one mutex, so a finalize's snapshot-and-reset can
//! never interleave with an append: a concurrent sample lands either in the
//! finalized snapshot or in the fresh update, never in both and never lost.
//!
//! An update is finalized when a position fix arrives with a timestamp later
//! than the most recent satellite-status event, which correlates the
//! satellite signal data with the fix it contributed to. Updates that never
//! see that trigger are finalized by [`UpdateAccumulator::check_expiry`] once
//! they exceed the configured maximum age.

use crate::core::update::{Identity, Update};
use crate::source::types::{
    EnvironmentValue, EnvironmentalReading, InertialSample, PositionFix, RadioScan, RawSentence,
    Sample, SatelliteStatus, StepEvent,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Step counter bookkeeping between finalizes.
#[derive(Debug, Default)]
struct StepTracker {
    /// Counter value at the previous finalize
    baseline: Option<u32>,
    /// Latest counter value
    total: Option<u32>,
    /// Detector events since the previous finalize
    detected: u32,
}

impl StepTracker {
    fn record(&mut self, event: StepEvent) {
        match event {
            StepEvent::Counter { total, .. } => {
                if self.baseline.is_none() {
                    self.baseline = Some(total);
                }
                self.total = Some(total);
            }
            StepEvent::Detected { .. } => self.detected += 1,
        }
    }

    /// Steps since the previous call, or `None` if no step source has reported.
    fn take_delta(&mut self) -> Option<EnvironmentValue> {
        if self.total.is_none() && self.detected == 0 {
            return None;
        }

        let counted = match (self.total, self.baseline) {
            // A counter lower than the baseline means the sensor was reset.
            (Some(total), Some(base)) if total >= base => total - base,
            (Some(total), _) => total,
            (None, _) => 0,
        };
        self.baseline = self.total;

        let detected = std::mem::take(&mut self.detected);
        Some(EnvironmentValue::Steps { counted, detected })
    }
}

struct AccumulatorState {
    current: Update,
    /// Arrival time of the first sample in `current`
    opened_at: Option<DateTime<Utc>>,
    battery_level: Option<f32>,
    last_pressure: Option<f32>,
    steps: StepTracker,
}

impl AccumulatorState {
    fn mark_opened(&mut self) {
        if self.opened_at.is_none() {
            self.opened_at = Some(Utc::now());
        }
    }
}

/// Owns the in-progress [`Update`] and enforces append and finalize rules.
pub struct UpdateAccumulator {
    identity: Identity,
    max_update_age: Option<Duration>,
    state: Mutex<AccumulatorState>,
}

impl UpdateAccumulator {
    /// Create an accumulator with no maximum-age fallback.
    pub fn new(identity: Identity) -> Self {
        let current = Update::new(identity.clone());
        Self {
            identity,
            max_update_age: None,
            state: Mutex::new(AccumulatorState {
                current,
                opened_at: None,
                battery_level: None,
                last_pressure: None,
                steps: StepTracker::default(),
            }),
        }
    }

    /// Finalize updates that have held samples for longer than `max_age`.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_update_age = Some(max_age);
        self
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    fn lock(&self) -> MutexGuard<'_, AccumulatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Dispatch a sample to the matching append operation.
    ///
    /// Returns the finalized update if this sample triggered a finalize.
    pub fn push(&self, sample: Sample) -> Option<Update> {
        match sample {
            Sample::Fix(fix) => return self.append_fix(fix),
            Sample::Satellites(status) => self.append_satellites(status),
            Sample::Radio(scan) => self.append_radio_scan(scan),
            Sample::Environment(reading) => self.append_environment(reading),
            Sample::Inertial(inertial) => self.append_inertial(inertial),
            Sample::Step(event) => self.record_step(event),
            Sample::Raw(raw) => self.append_raw_sentence(raw.timestamp, raw.sentence),
        }
        None
    }

    /// Append a position fix.
    ///
    /// If a satellite-status event has been seen in the current update and
    /// this fix is later than it, the update (including this fix) is
    /// finalized and returned. A fix with a non-finite position or accuracy
    /// is dropped; non-finite optional fields are omitted.
    pub fn append_fix(&self, fix: PositionFix) -> Option<Update> {
        let Some(fix) = fix.sanitized() else {
            tracing::debug!("Dropping fix with non-finite position");
            return None;
        };
        let mut state = self.lock();
        state.mark_opened();

        let triggers = state
            .current
            .satellite_fix_deadline
            .is_some_and(|deadline| fix.timestamp > deadline);
        state.current.fixes.push(fix);

        if triggers {
            tracing::debug!("Fix after satellite status, finalizing update");
            Some(self.finalize_locked(&mut state))
        } else {
            None
        }
    }

    /// Append one satellite-status group and move the finalize deadline to it.
    pub fn append_satellites(&self, status: SatelliteStatus) {
        let status = status.sanitized();
        let mut state = self.lock();
        state.mark_opened();
        state.current.satellite_fix_deadline = Some(status.timestamp);
        state.current.satellites.push(status);
    }

    /// Append a Wi-Fi or cellular scan. Wi-Fi scans without access points are dropped.
    pub fn append_radio_scan(&self, scan: RadioScan) {
        if let RadioScan::Wifi(ref wifi) = scan {
            if wifi.access_points.is_empty() {
                return;
            }
        }

        let mut state = self.lock();
        state.mark_opened();
        state.current.radio_scans.push(scan);
    }

    /// Append an environmental reading.
    ///
    /// Battery readings update the level reported at finalize instead of
    /// being stored directly. A pressure value equal to the previous one is
    /// not stored again. Non-finite values are dropped.
    pub fn append_environment(&self, reading: EnvironmentalReading) {
        if !reading.value.is_finite() {
            return;
        }
        let mut state = self.lock();
        match reading.value {
            EnvironmentValue::Battery(level) => {
                state.battery_level = Some(level);
                return;
            }
            EnvironmentValue::Pressure(hpa) => {
                if state.last_pressure == Some(hpa) {
                    return;
                }
                state.last_pressure = Some(hpa);
            }
            _ => {}
        }
        state.mark_opened();
        state.current.environment.push(reading);
    }

    /// Append an inertial sample.
    pub fn append_inertial(&self, sample: InertialSample) {
        if !sample.is_finite() {
            return;
        }
        let mut state = self.lock();
        state.mark_opened();
        state.current.inertial.push(sample);
    }

    /// Record a step sensor event; steps are reported as a delta at finalize.
    pub fn record_step(&self, event: StepEvent) {
        self.lock().steps.record(event);
    }

    /// Set the battery level (0 to 1) reported with the next finalize.
    pub fn set_battery_level(&self, level: f32) {
        if level.is_finite() {
            self.lock().battery_level = Some(level);
        }
    }

    /// Append a raw NMEA sentence.
    pub fn append_raw_sentence(&self, timestamp: DateTime<Utc>, sentence: impl Into<String>) {
        let mut state = self.lock();
        state.mark_opened();
        state.current.raw_sentences.push(RawSentence {
            timestamp,
            sentence: sentence.into(),
        });
    }

    /// Snapshot the current update and start a fresh one.
    pub fn finalize(&self) -> Update {
        let mut state = self.lock();
        self.finalize_locked(&mut state)
    }

    /// Finalize the current update unless it holds no samples.
    ///
    /// The emptiness check and the swap happen under the same lock, so a
    /// concurrent trigger can never leave an empty update to be returned.
    pub fn finalize_if_non_empty(&self) -> Option<Update> {
        let mut state = self.lock();
        if state.current.is_empty() {
            None
        } else {
            Some(self.finalize_locked(&mut state))
        }
    }

    /// Finalize the current update if it has exceeded the maximum age.
    pub fn check_expiry(&self, now: DateTime<Utc>) -> Option<Update> {
        let max_age = self.max_update_age?;
        let mut state = self.lock();
        let opened_at = state.opened_at?;

        if now - opened_at >= max_age && !state.current.is_empty() {
            tracing::debug!(
                age_secs = (now - opened_at).num_seconds(),
                "Update exceeded maximum age, finalizing"
            );
            Some(self.finalize_locked(&mut state))
        } else {
            None
        }
    }

    /// Number of samples held in the in-progress update.
    pub fn pending_samples(&self) -> usize {
        self.lock().current.sample_count()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().current.is_empty()
    }

    fn finalize_locked(&self, state: &mut AccumulatorState) -> Update {
        let now = Utc::now();

        if let Some(level) = state.battery_level {
            state
                .current
                .environment
                .push(EnvironmentalReading::new(EnvironmentValue::Battery(level)).at(now));
        }
        if let Some(steps) = state.steps.take_delta() {
            state
                .current
                .environment
                .push(EnvironmentalReading::new(steps).at(now));
        }

        let snapshot = std::mem::replace(&mut state.current, Update::new(self.identity.clone()));
        state.opened_at = None;

        tracing::info!(
            fixes = snapshot.fixes.len(),
            satellites = snapshot.satellites.len(),
            radio_scans = snapshot.radio_scans.len(),
            environment = snapshot.environment.len(),
            "Finalized update"
        );
        snapshot
    }
}
