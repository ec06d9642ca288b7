//! Sample sources for the telemetry pipeline.
//!
//! Live acquisition from OS sensor and radio APIs belongs to the host
//! platform. This module defines the sample types those producers push, and a
//! replay source that feeds recorded sessions through the same interface.

pub mod replay;
pub mod types;

// Re-export commonly used types
pub use replay::{ReplayConfig, ReplaySource, ReplaySummary, SourceError};
pub use types::{
    CellObservation, EnvironmentValue, EnvironmentalReading, InertialKind, InertialSample,
    PositionFix, RadioScan, RawSentence, Sample, SatelliteObservation, SatelliteStatus,
    StepEvent, WifiAccessPoint, WifiScan,
};
