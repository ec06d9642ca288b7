//! Core of the telemetry pipeline.
//!
//! This module contains:
//! - The update accumulator fed by sample producers
//! - Update and batch records plus the codec that serializes them
//! - The delivery scheduler and the batch store it falls back to
//! - The dispatcher that hands service results to listeners

pub mod accumulator;
pub mod batch;
pub mod codec;
pub mod dispatch;
pub mod scheduler;
pub mod update;

// Re-export commonly used types
pub use accumulator::UpdateAccumulator;
pub use batch::{BatchError, BatchStore, FlushReport, DEFAULT_BATCH_CAPACITY};
pub use codec::{Codec, CodecError, JsonCodec, RemoteResponse};
pub use dispatch::{ChannelSink, ImprovementSink, LocationImprovement, LogSink, ResultDispatcher};
pub use scheduler::{DeliveryMode, DeliveryScheduler, ParseModeError, RouteOutcome};
pub use update::{Batch, Identity, Update};
