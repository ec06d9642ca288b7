//! Routing of finalized updates to realtime delivery or the batch.

use crate::core::batch::{BatchError, BatchStore, FlushReport};
use crate::core::codec::Codec;
use crate::core::dispatch::{LocationImprovement, ResultDispatcher};
use crate::core::update::Update;
use crate::stats::SharedStats;
use crate::transport::{DeliveryOutcome, Transport};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// How finalized updates leave the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Collection is paused; anything still finalized goes to the batch.
    Stopped,
    /// Send each update as soon as it is finalized.
    #[default]
    Realtime,
    /// Only batch; never touch the network.
    Passive,
    /// Batch, with uploads left to a periodic job.
    Periodic,
}

impl DeliveryMode {
    pub const ALL: [DeliveryMode; 4] = [
        DeliveryMode::Stopped,
        DeliveryMode::Realtime,
        DeliveryMode::Passive,
        DeliveryMode::Periodic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMode::Stopped => "stopped",
            DeliveryMode::Realtime => "realtime",
            DeliveryMode::Passive => "passive",
            DeliveryMode::Periodic => "periodic",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            DeliveryMode::Stopped => 0,
            DeliveryMode::Realtime => 1,
            DeliveryMode::Passive => 2,
            DeliveryMode::Periodic => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => DeliveryMode::Realtime,
            2 => DeliveryMode::Passive,
            3 => DeliveryMode::Periodic,
            _ => DeliveryMode::Stopped,
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown delivery mode '{0}' (expected stopped, realtime, passive or periodic)")]
pub struct ParseModeError(String);

impl FromStr for DeliveryMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeliveryMode::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseModeError(s.to_string()))
    }
}

/// What happened to one routed update.
#[derive(Debug)]
pub enum RouteOutcome {
    /// Sent in realtime; the service answered with an improvement.
    Delivered(LocationImprovement),
    /// Added to the batch, which may have been flushed as a result.
    Batched { flushed: Option<FlushReport> },
    /// Added to the batch, but the capacity flush failed. The update stays
    /// pending in memory and the flush is retried on the next add.
    FlushFailed(BatchError),
}

/// Decides, per finalized update, between one realtime attempt and the batch.
pub struct DeliveryScheduler {
    mode: AtomicU8,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn Codec>,
    batch: Arc<BatchStore>,
    dispatcher: ResultDispatcher,
    stats: SharedStats,
}

impl DeliveryScheduler {
    pub fn new(
        mode: DeliveryMode,
        transport: Arc<dyn Transport>,
        codec: Arc<dyn Codec>,
        batch: Arc<BatchStore>,
        dispatcher: ResultDispatcher,
        stats: SharedStats,
    ) -> Self {
        Self {
            mode: AtomicU8::new(mode.to_u8()),
            transport,
            codec,
            batch,
            dispatcher,
            stats,
        }
    }

    pub fn mode(&self) -> DeliveryMode {
        DeliveryMode::from_u8(self.mode.load(Ordering::SeqCst))
    }

    /// Change the mode. Takes effect from the next routed update.
    pub fn set_mode(&self, mode: DeliveryMode) {
        let previous = DeliveryMode::from_u8(self.mode.swap(mode.to_u8(), Ordering::SeqCst));
        if previous != mode {
            tracing::info!(%previous, current = %mode, "Delivery mode changed");
        }
    }

    pub fn batch(&self) -> &Arc<BatchStore> {
        &self.batch
    }

    /// Encode and route an update.
    ///
    /// Returns `None` when the update could not be encoded; it is dropped
    /// and counted rather than stalling the pipeline.
    pub fn submit(&self, update: Update) -> Option<RouteOutcome> {
        match self.codec.encode_update(&update) {
            Ok(encoded) => Some(self.route(update, &encoded)),
            Err(e) => {
                tracing::error!(samples = update.sample_count(), "Skipping update: {e}");
                self.stats.record_encode_failure();
                None
            }
        }
    }

    /// Route an already encoded update.
    ///
    /// In realtime mode with a reachable network, exactly one send is made.
    /// Every other path, including a failed send, ends in the batch.
    pub fn route(&self, update: Update, encoded: &[u8]) -> RouteOutcome {
        if self.mode() == DeliveryMode::Realtime {
            if self.transport.is_reachable() {
                if let Some(improvement) = self.send_once(encoded) {
                    return RouteOutcome::Delivered(improvement);
                }
            } else {
                tracing::debug!("Network unreachable, batching update");
            }
        }

        self.add_to_batch(update)
    }

    fn send_once(&self, encoded: &[u8]) -> Option<LocationImprovement> {
        match self.transport.send(encoded) {
            DeliveryOutcome::Delivered(body) => match self.codec.decode_response(&body) {
                Ok(response) => {
                    self.stats.record_delivered();
                    self.stats.record_improvement();
                    let improvement = self.dispatcher.dispatch(response);
                    tracing::info!(
                        bytes = encoded.len(),
                        delay_ms = improvement.delay_ms,
                        "Delivered update"
                    );
                    Some(improvement)
                }
                Err(e) => {
                    tracing::warn!("Unreadable service response, falling back to batch: {e}");
                    self.stats.record_transport_failure();
                    None
                }
            },
            DeliveryOutcome::Rejected { status, message } => {
                tracing::warn!(status, "Update rejected, falling back to batch: {message}");
                self.stats.record_rejected();
                None
            }
            DeliveryOutcome::TransportFailure(cause) => {
                tracing::warn!("Send failed, falling back to batch: {cause}");
                self.stats.record_transport_failure();
                None
            }
        }
    }

    fn add_to_batch(&self, update: Update) -> RouteOutcome {
        self.stats.record_batched();
        match self.batch.add(update) {
            Ok(flushed) => {
                if flushed.is_some() {
                    self.stats.record_batch_persisted();
                }
                RouteOutcome::Batched { flushed }
            }
            Err(e) => {
                tracing::error!(pending = self.batch.len(), "Batch flush failed: {e}");
                self.stats.record_flush_failure();
                RouteOutcome::FlushFailed(e)
            }
        }
    }

    /// Persist whatever is pending in the batch.
    pub fn flush(&self) -> Result<Option<FlushReport>, BatchError> {
        match self.batch.flush() {
            Ok(report) => {
                if report.is_some() {
                    self.stats.record_batch_persisted();
                }
                Ok(report)
            }
            Err(e) => {
                tracing::error!(pending = self.batch.len(), "Batch flush failed: {e}");
                self.stats.record_flush_failure();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::{CodecError, JsonCodec, RemoteResponse};
    use crate::core::update::{Batch, Identity};
    use crate::source::types::PositionFix;
    use crate::stats::create_shared_stats;
    use crate::transport::mocks::RecordingTransport;
    use crossbeam_channel::unbounded;
    use std::sync::atomic::{AtomicBool, Ordering};

    const RESPONSE: &[u8] =
        br#"{"lat":37.0,"lon":-122.0,"acc":2.5,"utc":"2024-05-01T12:00:00Z","geocoded":"Main St"}"#;

    fn identity() -> Identity {
        Identity::new("device-1", "key-1")
    }

    fn update() -> Update {
        let mut update = Update::new(identity());
        update.fixes.push(PositionFix::new("gps", 37.0, -122.0, 10.0));
        update
    }

    struct Harness {
        scheduler: DeliveryScheduler,
        transport: Arc<RecordingTransport>,
        stats: SharedStats,
    }

    fn harness(mode: DeliveryMode, outcome: DeliveryOutcome, capacity: usize) -> Harness {
        let transport = Arc::new(RecordingTransport::new(outcome));
        let codec: Arc<dyn Codec> = Arc::new(JsonCodec);
        let stats = create_shared_stats();
        let batch = Arc::new(BatchStore::new(
            identity(),
            capacity,
            codec.clone(),
            transport.clone(),
        ));
        let scheduler = DeliveryScheduler::new(
            mode,
            transport.clone(),
            codec,
            batch,
            ResultDispatcher::new(),
            stats.clone(),
        );
        Harness {
            scheduler,
            transport,
            stats,
        }
    }

    fn delivered() -> DeliveryOutcome {
        DeliveryOutcome::Delivered(RESPONSE.to_vec())
    }

    #[test]
    fn test_mode_parse_and_display() {
        assert_eq!("realtime".parse::<DeliveryMode>(), Ok(DeliveryMode::Realtime));
        assert_eq!(" Passive ".parse::<DeliveryMode>(), Ok(DeliveryMode::Passive));
        assert!("sometimes".parse::<DeliveryMode>().is_err());

        for mode in DeliveryMode::ALL {
            assert_eq!(mode.to_string().parse::<DeliveryMode>(), Ok(mode));
        }
        assert_eq!(
            serde_json::to_string(&DeliveryMode::Periodic).unwrap(),
            "\"periodic\""
        );
    }

    #[test]
    fn test_realtime_success_never_batches() {
        let h = harness(DeliveryMode::Realtime, delivered(), 10);

        for _ in 0..5 {
            let outcome = h.scheduler.submit(update()).unwrap();
            match outcome {
                RouteOutcome::Delivered(improvement) => {
                    assert_eq!(improvement.place.as_deref(), Some("Main St"));
                }
                other => panic!("expected delivery, got {other:?}"),
            }
        }

        assert_eq!(h.transport.send_count(), 5);
        assert!(h.scheduler.batch().is_empty());
        assert_eq!(h.stats.snapshot().updates_delivered, 5);
        assert_eq!(h.stats.snapshot().improvements_received, 5);
    }

    #[test]
    fn test_passive_never_sends() {
        let h = harness(DeliveryMode::Passive, delivered(), 10);

        for _ in 0..3 {
            let outcome = h.scheduler.submit(update()).unwrap();
            assert!(matches!(outcome, RouteOutcome::Batched { flushed: None }));
        }

        assert_eq!(h.transport.send_count(), 0);
        assert_eq!(h.scheduler.batch().len(), 3);
    }

    #[test]
    fn test_stopped_and_periodic_batch() {
        for mode in [DeliveryMode::Stopped, DeliveryMode::Periodic] {
            let h = harness(mode, delivered(), 10);
            h.scheduler.submit(update()).unwrap();
            assert_eq!(h.transport.send_count(), 0);
            assert_eq!(h.scheduler.batch().len(), 1);
        }
    }

    #[test]
    fn test_realtime_failure_falls_back_once() {
        let h = harness(
            DeliveryMode::Realtime,
            DeliveryOutcome::TransportFailure("connection reset".to_string()),
            10,
        );

        let outcome = h.scheduler.submit(update()).unwrap();
        assert!(matches!(outcome, RouteOutcome::Batched { .. }));
        assert_eq!(h.transport.send_count(), 1);
        assert_eq!(h.scheduler.batch().len(), 1);
        assert_eq!(h.stats.snapshot().transport_failures, 1);
    }

    #[test]
    fn test_realtime_rejection_falls_back() {
        let h = harness(
            DeliveryMode::Realtime,
            DeliveryOutcome::Rejected {
                status: 401,
                message: "bad key".to_string(),
            },
            10,
        );

        h.scheduler.submit(update()).unwrap();
        assert_eq!(h.scheduler.batch().len(), 1);
        assert_eq!(h.stats.snapshot().updates_rejected, 1);
    }

    #[test]
    fn test_undecodable_response_falls_back() {
        let h = harness(
            DeliveryMode::Realtime,
            DeliveryOutcome::Delivered(b"<html>oops</html>".to_vec()),
            10,
        );

        let outcome = h.scheduler.submit(update()).unwrap();
        assert!(matches!(outcome, RouteOutcome::Batched { .. }));
        assert_eq!(h.scheduler.batch().len(), 1);
    }

    #[test]
    fn test_unreachable_network_skips_send() {
        let h = harness(DeliveryMode::Realtime, delivered(), 10);
        h.transport.reachable.store(false, Ordering::SeqCst);

        h.scheduler.submit(update()).unwrap();
        assert_eq!(h.transport.send_count(), 0);
        assert_eq!(h.scheduler.batch().len(), 1);
    }

    #[test]
    fn test_mode_change_applies_to_next_route() {
        let h = harness(DeliveryMode::Passive, delivered(), 10);
        h.scheduler.submit(update()).unwrap();
        assert_eq!(h.transport.send_count(), 0);

        h.scheduler.set_mode(DeliveryMode::Realtime);
        assert_eq!(h.scheduler.mode(), DeliveryMode::Realtime);
        h.scheduler.submit(update()).unwrap();
        assert_eq!(h.transport.send_count(), 1);
    }

    #[test]
    fn test_flush_failure_is_reported_and_counted() {
        let h = harness(DeliveryMode::Passive, delivered(), 2);
        h.transport.fail_persist.store(true, Ordering::SeqCst);

        h.scheduler.submit(update()).unwrap();
        let outcome = h.scheduler.submit(update()).unwrap();
        assert!(matches!(outcome, RouteOutcome::FlushFailed(_)));
        assert_eq!(h.scheduler.batch().len(), 2);
        assert_eq!(h.stats.snapshot().flush_failures, 1);

        h.transport.fail_persist.store(false, Ordering::SeqCst);
        let report = h.scheduler.flush().unwrap().unwrap();
        assert_eq!(report.updates, 2);
        assert_eq!(h.stats.snapshot().batches_persisted, 1);
    }

    #[test]
    fn test_delivered_improvement_reaches_sink() {
        let transport = Arc::new(RecordingTransport::new(delivered()));
        let codec: Arc<dyn Codec> = Arc::new(JsonCodec);
        let batch = Arc::new(BatchStore::new(identity(), 10, codec.clone(), transport.clone()));
        let (tx, rx) = unbounded();
        let scheduler = DeliveryScheduler::new(
            DeliveryMode::Realtime,
            transport,
            codec,
            batch,
            ResultDispatcher::new().with_sink(crate::core::dispatch::ChannelSink::new(tx)),
            create_shared_stats(),
        );

        scheduler.submit(update()).unwrap();
        let improvement = rx.try_recv().unwrap();
        assert_eq!(improvement.latitude, 37.0);
        assert_eq!(improvement.accuracy, 2.5);
    }

    /// JSON codec whose update encoding can be switched to fail.
    struct FlakyCodec {
        failing: AtomicBool,
    }

    impl Codec for FlakyCodec {
        fn encode_update(&self, update: &Update) -> Result<Vec<u8>, CodecError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(CodecError::Encode {
                    what: "update",
                    message: "unsupported value".to_string(),
                });
            }
            JsonCodec.encode_update(update)
        }

        fn encode_batch(&self, batch: &Batch) -> Result<Vec<u8>, CodecError> {
            JsonCodec.encode_batch(batch)
        }

        fn decode_batch(&self, bytes: &[u8]) -> Result<Batch, CodecError> {
            JsonCodec.decode_batch(bytes)
        }

        fn decode_response(&self, bytes: &[u8]) -> Result<RemoteResponse, CodecError> {
            JsonCodec.decode_response(bytes)
        }

        fn content_type(&self) -> &'static str {
            JsonCodec.content_type()
        }

        fn extension(&self) -> &'static str {
            JsonCodec.extension()
        }
    }

    #[test]
    fn test_encode_failure_skips_update_and_continues() {
        let transport = Arc::new(RecordingTransport::new(delivered()));
        let codec = Arc::new(FlakyCodec {
            failing: AtomicBool::new(true),
        });
        let stats = create_shared_stats();
        let batch = Arc::new(BatchStore::new(
            identity(),
            10,
            Arc::new(JsonCodec),
            transport.clone(),
        ));
        let scheduler = DeliveryScheduler::new(
            DeliveryMode::Realtime,
            transport.clone(),
            codec.clone(),
            batch,
            ResultDispatcher::new(),
            stats.clone(),
        );

        assert!(scheduler.submit(update()).is_none());
        assert_eq!(stats.snapshot().encode_failures, 1);
        assert_eq!(transport.send_count(), 0);
        assert!(scheduler.batch().is_empty());

        codec.failing.store(false, Ordering::SeqCst);
        let outcome = scheduler.submit(update()).unwrap();
        assert!(matches!(outcome, RouteOutcome::Delivered(_)));
        assert_eq!(transport.send_count(), 1);
        assert_eq!(stats.snapshot().encode_failures, 1);
    }
}
