//! Update and batch records.
//!
//! An [`Update`] is one envelope of telemetry destined for a single upload or
//! batch slot. A [`Batch`] groups finalized updates for durable storage and a
//! later bulk upload.

use crate::source::types::{
    EnvironmentalReading, InertialSample, PositionFix, RadioScan, RawSentence, SatelliteStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity attached to every update and batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_model: Option<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            api_key: api_key.into(),
            device_model: None,
        }
    }

    pub fn with_device_model(mut self, model: impl Into<String>) -> Self {
        self.device_model = Some(model.into());
        self
    }
}

/// One telemetry envelope.
///
/// All sequences keep arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub identity: Identity,
    #[serde(default)]
    pub fixes: Vec<PositionFix>,
    #[serde(default)]
    pub satellites: Vec<SatelliteStatus>,
    #[serde(default)]
    pub radio_scans: Vec<RadioScan>,
    #[serde(default)]
    pub environment: Vec<EnvironmentalReading>,
    #[serde(default)]
    pub inertial: Vec<InertialSample>,
    #[serde(default)]
    pub raw_sentences: Vec<RawSentence>,
    /// Time of the latest satellite-status event in this update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub satellite_fix_deadline: Option<DateTime<Utc>>,
}

impl Update {
    /// Create an empty update for the given identity.
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            fixes: Vec::with_capacity(1),
            satellites: Vec::new(),
            radio_scans: Vec::new(),
            environment: Vec::new(),
            inertial: Vec::new(),
            raw_sentences: Vec::with_capacity(3),
            satellite_fix_deadline: None,
        }
    }

    /// Total number of samples across all sequences.
    pub fn sample_count(&self) -> usize {
        self.fixes.len()
            + self.satellites.len()
            + self.radio_scans.len()
            + self.environment.len()
            + self.inertial.len()
            + self.raw_sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count() == 0
    }

    /// Timestamp of the first fix, used to bound batch time ranges.
    pub fn first_fix_time(&self) -> Option<DateTime<Utc>> {
        self.fixes.first().map(|fix| fix.timestamp)
    }
}

/// A durable collection of finalized updates, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: String,
    pub user_id: String,
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub updates: Vec<Update>,
}

impl Batch {
    /// Assemble a batch, deriving its time range from the first and last update.
    pub fn new(batch_id: impl Into<String>, identity: &Identity, updates: Vec<Update>) -> Self {
        let start_time = updates.first().and_then(Update::first_fix_time);
        let end_time = updates.last().and_then(Update::first_fix_time);
        Self {
            batch_id: batch_id.into(),
            user_id: identity.user_id.clone(),
            api_key: identity.api_key.clone(),
            start_time,
            end_time,
            updates,
        }
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn identity() -> Identity {
        Identity::new("device-1", "key-1")
    }

    #[test]
    fn test_new_update_is_empty() {
        let update = Update::new(identity());
        assert!(update.is_empty());
        assert_eq!(update.identity.user_id, "device-1");
        assert!(update.satellite_fix_deadline.is_none());
    }

    #[test]
    fn test_batch_time_range_from_first_and_last() {
        let t0 = Utc::now() - Duration::minutes(2);
        let t1 = t0 + Duration::minutes(1);

        let mut first = Update::new(identity());
        first.fixes.push(PositionFix::new("gps", 1.0, 2.0, 3.0).at(t0));
        let middle = Update::new(identity());
        let mut last = Update::new(identity());
        last.fixes.push(PositionFix::new("gps", 1.5, 2.5, 3.0).at(t1));

        let batch = Batch::new("SMdevice-1_1", &identity(), vec![first, middle, last]);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.start_time, Some(t0));
        assert_eq!(batch.end_time, Some(t1));
        assert_eq!(batch.api_key, "key-1");
    }

    #[test]
    fn test_batch_without_fixes_has_no_range() {
        let batch = Batch::new("b", &identity(), vec![Update::new(identity())]);
        assert!(batch.start_time.is_none());
        assert!(batch.end_time.is_none());
    }
}
