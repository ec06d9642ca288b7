//! fixwire - telemetry aggregation and batching pipeline.
//!
//! Producers push satellite, position, radio, environmental, inertial and raw
//! NMEA samples at their own pace. The pipeline assembles them into
//! [`Update`](core::Update) envelopes, ships each one to a location-improvement
//! service in realtime when it can, and otherwise collects updates into
//! size-bounded batches that are persisted to disk for a later upload.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                             Pipeline                              │
//! ├───────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐              │
//! │  │   Sources   │──▶│ Accumulator │──▶│  Hand-off   │              │
//! │  │ (push API)  │   │  (finalize) │   │   queue     │              │
//! │  └─────────────┘   └─────────────┘   └──────┬──────┘              │
//! │                                             ▼                     │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐              │
//! │  │ Dispatcher  │◀──│  Transport  │◀──│  Scheduler  │              │
//! │  │  (sinks)    │   │ (send/persist)  │ (mode)      │              │
//! │  └─────────────┘   └──────▲──────┘   └──────┬──────┘              │
//! │                           │          ┌──────▼──────┐              │
//! │                           └──────────│ BatchStore  │              │
//! │                                      └─────────────┘              │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fixwire::{config::Config, core::ResultDispatcher, pipeline::Pipeline};
//! use fixwire::source::{PositionFix, Sample};
//! use fixwire::stats::create_shared_stats;
//! use fixwire::transport::{BatchDirectory, OfflineTransport};
//!
//! let config = Config::default();
//! let transport = Arc::new(OfflineTransport::new(BatchDirectory::new(&config.batch_path)));
//! let pipeline = Pipeline::from_config(&config, transport, ResultDispatcher::new(), create_shared_stats());
//!
//! pipeline.push(Sample::Fix(PositionFix::new("gps", 52.52, 13.40, 8.0)));
//! pipeline.shutdown().expect("final batch persisted");
//! ```

pub mod config;
pub mod core;
pub mod pipeline;
pub mod source;
pub mod stats;
pub mod transport;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError};
pub use crate::core::{
    Batch, BatchStore, Codec, DeliveryMode, DeliveryScheduler, Identity, JsonCodec,
    LocationImprovement, ResultDispatcher, Update, UpdateAccumulator,
};
pub use pipeline::Pipeline;
pub use source::{ReplaySource, Sample};
pub use stats::{PipelineStats, SharedStats};
pub use transport::{
    BatchDirectory, DeliveryOutcome, OfflineTransport, Transport, UplinkConfig, UplinkError,
};

#[cfg(feature = "gateway")]
pub use transport::{BlockingUplinkClient, HttpTransport, UplinkClient};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
