//! End-to-end wiring of the accumulator, hand-off queue and delivery worker.
//!
//! Producers call [`Pipeline::push`] from any thread. A finalized update is
//! moved into the hand-off channel and the single delivery worker encodes and
//! routes it, so network and disk I/O never run under the accumulator lock.

use crate::config::Config;
use crate::core::{
    BatchError, BatchStore, Codec, DeliveryMode, DeliveryScheduler, FlushReport, JsonCodec,
    ResultDispatcher, Update, UpdateAccumulator,
};
use crate::source::types::Sample;
use crate::stats::SharedStats;
use crate::transport::Transport;
use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often the idle worker checks the in-progress update for expiry.
const IDLE_TICK: Duration = Duration::from_millis(100);

/// A running pipeline with its delivery worker.
pub struct Pipeline {
    accumulator: Arc<UpdateAccumulator>,
    scheduler: Arc<DeliveryScheduler>,
    stats: SharedStats,
    handoff: Option<Sender<Update>>,
    worker: Option<JoinHandle<()>>,
    closed: bool,
}

impl Pipeline {
    /// Start the delivery worker for an already assembled accumulator and scheduler.
    pub fn start(
        accumulator: UpdateAccumulator,
        scheduler: DeliveryScheduler,
        stats: SharedStats,
    ) -> Self {
        let accumulator = Arc::new(accumulator);
        let scheduler = Arc::new(scheduler);
        let (handoff, queue) = unbounded();

        let worker = {
            let accumulator = accumulator.clone();
            let scheduler = scheduler.clone();
            let stats = stats.clone();
            thread::Builder::new()
                .name("fixwire-delivery".to_string())
                .spawn(move || run_worker(queue, accumulator, scheduler, stats))
        };
        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                // Without a worker, finalized updates are routed on the producer thread.
                tracing::error!("Failed to spawn delivery worker: {e}");
                None
            }
        };

        tracing::info!(mode = %scheduler.mode(), "Pipeline started");

        Self {
            accumulator,
            scheduler,
            stats,
            handoff: worker.as_ref().map(|_| handoff),
            worker,
            closed: false,
        }
    }

    /// Build a pipeline from configuration with the JSON codec.
    pub fn from_config(
        config: &Config,
        transport: Arc<dyn Transport>,
        dispatcher: ResultDispatcher,
        stats: SharedStats,
    ) -> Self {
        let identity = config.identity();
        let codec: Arc<dyn Codec> = Arc::new(JsonCodec);

        let mut accumulator = UpdateAccumulator::new(identity.clone());
        if let Some(max_age) = config.max_update_age() {
            accumulator = accumulator.with_max_age(max_age);
        }

        let batch = Arc::new(BatchStore::new(
            identity,
            config.batch_capacity,
            codec.clone(),
            transport.clone(),
        ));
        let scheduler = DeliveryScheduler::new(
            config.mode,
            transport,
            codec,
            batch,
            dispatcher,
            stats.clone(),
        );

        Self::start(accumulator, scheduler, stats)
    }

    /// Feed one sample from a producer.
    pub fn push(&self, sample: Sample) {
        self.stats.record_sample(&sample);
        if let Some(update) = self.accumulator.push(sample) {
            self.hand_off(update);
        }
    }

    /// Finalize the in-progress update now, if it holds anything.
    ///
    /// Returns whether an update was handed off.
    pub fn finalize_now(&self) -> bool {
        match self.accumulator.finalize_if_non_empty() {
            Some(update) => {
                self.hand_off(update);
                true
            }
            None => false,
        }
    }

    fn hand_off(&self, update: Update) {
        self.stats.record_finalized();
        tracing::debug!(samples = update.sample_count(), "Handing off finalized update");

        let update = match &self.handoff {
            Some(sender) => match sender.send(update) {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!("Delivery worker gone, routing inline");
                    e.into_inner()
                }
            },
            None => update,
        };
        self.scheduler.submit(update);
    }

    pub fn mode(&self) -> DeliveryMode {
        self.scheduler.mode()
    }

    pub fn set_mode(&self, mode: DeliveryMode) {
        self.scheduler.set_mode(mode);
    }

    pub fn accumulator(&self) -> &UpdateAccumulator {
        &self.accumulator
    }

    pub fn scheduler(&self) -> &DeliveryScheduler {
        &self.scheduler
    }

    pub fn stats(&self) -> &SharedStats {
        &self.stats
    }

    /// Stop the pipeline.
    ///
    /// Finalizes a non-empty in-progress update, waits for the worker to
    /// route everything queued, then persists whatever is left in the batch.
    pub fn shutdown(mut self) -> Result<Option<FlushReport>, BatchError> {
        self.close()
    }

    fn close(&mut self) -> Result<Option<FlushReport>, BatchError> {
        if self.closed {
            return Ok(None);
        }
        self.closed = true;

        self.finalize_now();

        // Dropping the sender lets the worker drain the queue and exit.
        self.handoff.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Delivery worker panicked");
            }
        }

        let report = self.scheduler.flush()?;
        tracing::info!(
            persisted = report.as_ref().map(|r| r.updates).unwrap_or(0),
            "Pipeline stopped"
        );
        Ok(report)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!("Pending batch lost on drop: {e}");
        }
    }
}

fn run_worker(
    queue: Receiver<Update>,
    accumulator: Arc<UpdateAccumulator>,
    scheduler: Arc<DeliveryScheduler>,
    stats: SharedStats,
) {
    loop {
        match queue.recv_timeout(IDLE_TICK) {
            Ok(update) => {
                scheduler.submit(update);
            }
            Err(RecvTimeoutError::Timeout) => {
                if let Some(update) = accumulator.check_expiry(Utc::now()) {
                    stats.record_finalized();
                    scheduler.submit(update);
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::debug!("Delivery worker exiting");
}
