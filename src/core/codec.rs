//! Encoding of updates and batches, decoding of service responses.

use crate::core::update::{Batch, Update};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while encoding or decoding payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to encode {what}: {message}")]
    Encode { what: &'static str, message: String },
    #[error("Failed to decode {what}: {message}")]
    Decode { what: &'static str, message: String },
}

/// Improved location returned by the remote service for an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteResponse {
    pub lat: f64,
    pub lon: f64,
    /// Accuracy radius in meters
    pub acc: f64,
    /// Time the service produced the improvement
    pub utc: DateTime<Utc>,
    /// Reverse-geocoded street label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geocoded: Option<String>,
    /// PNG rendering of the sky view at the fix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skyview: Option<Vec<u8>>,
}

/// Serializer capability injected into the pipeline.
///
/// Batches must round-trip through `encode_batch`/`decode_batch` so that
/// persisted batch files can be re-read for upload. Updates are write-only.
pub trait Codec: Send + Sync {
    fn encode_update(&self, update: &Update) -> Result<Vec<u8>, CodecError>;

    fn encode_batch(&self, batch: &Batch) -> Result<Vec<u8>, CodecError>;

    fn decode_batch(&self, bytes: &[u8]) -> Result<Batch, CodecError>;

    fn decode_response(&self, bytes: &[u8]) -> Result<RemoteResponse, CodecError>;

    /// MIME type of encoded payloads.
    fn content_type(&self) -> &'static str;

    /// File extension used for persisted batches.
    fn extension(&self) -> &'static str;
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode_update(&self, update: &Update) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(update).map_err(|e| CodecError::Encode {
            what: "update",
            message: e.to_string(),
        })
    }

    fn encode_batch(&self, batch: &Batch) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(batch).map_err(|e| CodecError::Encode {
            what: "batch",
            message: e.to_string(),
        })
    }

    fn decode_batch(&self, bytes: &[u8]) -> Result<Batch, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
            what: "batch",
            message: e.to_string(),
        })
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<RemoteResponse, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
            what: "response",
            message: e.to_string(),
        })
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn extension(&self) -> &'static str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::update::Identity;
    use crate::source::types::{
        CellObservation, EnvironmentValue, EnvironmentalReading, InertialKind, InertialSample,
        PositionFix, RadioScan, RawSentence, SatelliteObservation, SatelliteStatus,
        WifiAccessPoint, WifiScan,
    };
    use chrono::{Duration, TimeZone};

    fn sample_update(offset_secs: i64) -> Update {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::seconds(offset_secs);
        let mut update = Update::new(Identity::new("device-1", "key-1").with_device_model("Pixel"));
        update.fixes.push(PositionFix {
            timestamp: t,
            latitude: 37.5,
            longitude: -122.25,
            altitude: Some(12.5),
            accuracy: 4.5,
            speed: Some(1.25),
            bearing: None,
            provider: "gps".to_string(),
        });
        update.satellites.push(SatelliteStatus {
            timestamp: t,
            satellites: vec![SatelliteObservation {
                prn: 7,
                snr: 41.0,
                elevation: 30.5,
                azimuth: 270.0,
                has_ephemeris: true,
                has_almanac: false,
                used_in_fix: true,
            }],
        });
        update.satellite_fix_deadline = Some(t);
        update.radio_scans.push(RadioScan::Wifi(WifiScan {
            timestamp: t,
            access_points: vec![WifiAccessPoint {
                bssid: "aa:bb:cc:dd:ee:ff".to_string(),
                rssi: -71,
                frequency_mhz: 5180,
            }],
        }));
        update.radio_scans.push(RadioScan::Cell(CellObservation {
            timestamp: t,
            cell_id: 1234,
            area_code: 56,
            signal_dbm: None,
        }));
        update.environment.push(EnvironmentalReading {
            timestamp: t,
            value: EnvironmentValue::Steps {
                counted: 12,
                detected: 3,
            },
        });
        update.inertial.push(InertialSample {
            timestamp: t,
            kind: InertialKind::Orientation,
            values: [0.5, -0.25, 1.0],
        });
        update.raw_sentences.push(RawSentence {
            timestamp: t,
            sentence: "$GPGSV,3,1,11".to_string(),
        });
        update
    }

    #[test]
    fn test_batch_round_trip_preserves_order() {
        let identity = Identity::new("device-1", "key-1");
        let updates: Vec<Update> = (0..4).map(sample_update).collect();
        let batch = Batch::new("SMdevice-1_1714564800000", &identity, updates);

        let codec = JsonCodec;
        let bytes = codec.encode_batch(&batch).unwrap();
        let decoded = codec.decode_batch(&bytes).unwrap();

        assert_eq!(decoded, batch);
        let times: Vec<_> = decoded.updates.iter().map(|u| u.fixes[0].timestamp).collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
    }

    #[test]
    fn test_decode_response_optional_fields() {
        let body = br#"{"lat":40.1,"lon":-74.2,"acc":3.5,"utc":"2024-05-01T12:00:01Z"}"#;
        let response = JsonCodec.decode_response(body).unwrap();
        assert_eq!(response.lat, 40.1);
        assert!(response.geocoded.is_none());
        assert!(response.skyview.is_none());
    }

    #[test]
    fn test_decode_malformed_response() {
        let err = JsonCodec.decode_response(b"<html>").unwrap_err();
        assert!(matches!(err, CodecError::Decode { what: "response", .. }));
    }
}
