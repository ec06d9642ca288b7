//! Telemetry sample types pushed into the pipeline by sample sources.
//!
//! Every sample carries the timestamp at which the source observed it. The
//! pipeline never reorders samples of the same kind, so these timestamps are
//! informational except for position fixes and satellite groups, which drive
//! the finalize trigger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A position estimate reported by a location provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    /// Time of the fix as reported by the provider
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude above the WGS84 ellipsoid in meters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    /// Horizontal accuracy radius in meters
    pub accuracy: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearing: Option<f32>,
    /// Name of the provider that produced the fix (e.g. "gps", "fused")
    pub provider: String,
}

impl PositionFix {
    /// Create a fix observed now.
    pub fn new(provider: impl Into<String>, latitude: f64, longitude: f64, accuracy: f32) -> Self {
        Self {
            timestamp: Utc::now(),
            latitude,
            longitude,
            altitude: None,
            accuracy,
            speed: None,
            bearing: None,
            provider: provider.into(),
        }
    }

    /// Override the observation time.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Drop non-finite optional fields; `None` if position or accuracy is non-finite.
    pub fn sanitized(mut self) -> Option<Self> {
        if !(self.latitude.is_finite() && self.longitude.is_finite() && self.accuracy.is_finite()) {
            return None;
        }
        self.altitude = self.altitude.filter(|v| v.is_finite());
        self.speed = self.speed.filter(|v| v.is_finite());
        self.bearing = self.bearing.filter(|v| v.is_finite());
        Some(self)
    }
}

/// Signal observation for a single satellite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatelliteObservation {
    /// Pseudo-random noise number identifying the satellite
    pub prn: u16,
    /// Signal to noise ratio in dB-Hz
    pub snr: f32,
    /// Elevation in degrees
    pub elevation: f32,
    /// Azimuth in degrees
    pub azimuth: f32,
    pub has_ephemeris: bool,
    pub has_almanac: bool,
    pub used_in_fix: bool,
}

impl SatelliteObservation {
    pub fn is_finite(&self) -> bool {
        self.snr.is_finite() && self.elevation.is_finite() && self.azimuth.is_finite()
    }
}

/// All satellites reported by one satellite-status event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatelliteStatus {
    pub timestamp: DateTime<Utc>,
    pub satellites: Vec<SatelliteObservation>,
}

impl SatelliteStatus {
    /// Create a satellite group observed now.
    pub fn new(satellites: Vec<SatelliteObservation>) -> Self {
        Self {
            timestamp: Utc::now(),
            satellites,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Remove observations carrying non-finite measurements.
    pub fn sanitized(mut self) -> Self {
        self.satellites.retain(SatelliteObservation::is_finite);
        self
    }
}

/// A single access point seen in a Wi-Fi scan.
///
/// Only the BSSID (AP MAC address) is recorded, never the human-readable SSID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiAccessPoint {
    pub bssid: String,
    /// Received signal strength in dBm
    pub rssi: i32,
    pub frequency_mhz: u32,
}

/// Results of one Wi-Fi scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiScan {
    pub timestamp: DateTime<Utc>,
    pub access_points: Vec<WifiAccessPoint>,
}

/// Serving cell observation from the telephony stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellObservation {
    pub timestamp: DateTime<Utc>,
    pub cell_id: u32,
    /// Location area code (GSM) or system id (CDMA)
    pub area_code: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_dbm: Option<i32>,
}

/// A radio environment scan, either Wi-Fi or cellular.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadioScan {
    Wifi(WifiScan),
    Cell(CellObservation),
}

impl RadioScan {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            RadioScan::Wifi(scan) => scan.timestamp,
            RadioScan::Cell(cell) => cell.timestamp,
        }
    }
}

/// Value carried by an environmental reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentValue {
    /// Barometric pressure in hPa
    Pressure(f32),
    /// Ambient light in lux
    Light(f32),
    /// Ambient or battery temperature in degrees Celsius
    Temperature(f32),
    /// Battery level in [0, 1]
    Battery(f32),
    /// Steps counted since the previous update, plus detector events
    Steps { counted: u32, detected: u32 },
}

impl EnvironmentValue {
    pub fn is_finite(&self) -> bool {
        match *self {
            EnvironmentValue::Pressure(v)
            | EnvironmentValue::Light(v)
            | EnvironmentValue::Temperature(v)
            | EnvironmentValue::Battery(v) => v.is_finite(),
            EnvironmentValue::Steps { .. } => true,
        }
    }
}

/// An environmental sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentalReading {
    pub timestamp: DateTime<Utc>,
    pub value: EnvironmentValue,
}

impl EnvironmentalReading {
    pub fn new(value: EnvironmentValue) -> Self {
        Self {
            timestamp: Utc::now(),
            value,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Step sensor events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepEvent {
    /// Cumulative step counter value since the sensor was enabled
    Counter { timestamp: DateTime<Utc>, total: u32 },
    /// A single detected step
    Detected { timestamp: DateTime<Utc> },
}

impl StepEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            StepEvent::Counter { timestamp, .. } | StepEvent::Detected { timestamp } => *timestamp,
        }
    }
}

/// Inertial sample type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InertialKind {
    /// Linear acceleration (x, y, z) in m/s^2, gravity removed
    Acceleration,
    /// Orientation (azimuth, pitch, roll) in radians
    Orientation,
}

/// An inertial sensor sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InertialSample {
    pub timestamp: DateTime<Utc>,
    pub kind: InertialKind,
    pub values: [f32; 3],
}

impl InertialSample {
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

/// A raw NMEA sentence from the GNSS receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSentence {
    pub timestamp: DateTime<Utc>,
    pub sentence: String,
}

/// Unified sample type accepted by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sample {
    Fix(PositionFix),
    Satellites(SatelliteStatus),
    Radio(RadioScan),
    Environment(EnvironmentalReading),
    Inertial(InertialSample),
    Step(StepEvent),
    Raw(RawSentence),
}

impl Sample {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Sample::Fix(s) => s.timestamp,
            Sample::Satellites(s) => s.timestamp,
            Sample::Radio(s) => s.timestamp(),
            Sample::Environment(s) => s.timestamp,
            Sample::Inertial(s) => s.timestamp,
            Sample::Step(s) => s.timestamp(),
            Sample::Raw(s) => s.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_fix_builder_overrides_timestamp() {
        let ts = Utc::now() - Duration::seconds(30);
        let fix = PositionFix::new("gps", 37.77, -122.41, 5.0).at(ts);
        assert_eq!(fix.timestamp, ts);
        assert_eq!(fix.provider, "gps");
        assert!(fix.altitude.is_none());
    }

    #[test]
    fn test_sample_timestamp_dispatch() {
        let ts = Utc::now() - Duration::milliseconds(1500);
        let step = Sample::Step(StepEvent::Counter {
            timestamp: ts,
            total: 42,
        });
        assert_eq!(step.timestamp(), ts);

        let cell = Sample::Radio(RadioScan::Cell(CellObservation {
            timestamp: ts,
            cell_id: 4021,
            area_code: 17,
            signal_dbm: Some(-87),
        }));
        assert_eq!(cell.timestamp(), ts);
    }

    #[test]
    fn test_sample_json_line_format() {
        let line = r#"{"raw":{"timestamp":"2024-05-01T12:00:00Z","sentence":"$GPGGA,120000"}}"#;
        let sample: Sample = serde_json::from_str(line).unwrap();
        match sample {
            Sample::Raw(raw) => assert_eq!(raw.sentence, "$GPGGA,120000"),
            other => panic!("unexpected sample {other:?}"),
        }
    }
}
