//! Bounded in-memory batch of finalized updates with overflow to storage.

use crate::core::codec::{Codec, CodecError};
use crate::core::update::{Batch, Identity, Update};
use crate::transport::Transport;
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Default number of updates that triggers a flush.
pub const DEFAULT_BATCH_CAPACITY: usize = 120;

/// Errors raised while flushing a batch.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("Failed to persist batch {batch_id}: {source}")]
    Persist {
        batch_id: String,
        #[source]
        source: std::io::Error,
    },
}

/// Details of a successful flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub batch_id: String,
    /// Name the batch was persisted under
    pub file_name: String,
    pub updates: usize,
    pub bytes: usize,
}

struct BatchState {
    entries: Vec<Update>,
    /// Millisecond stamp of the previous batch id
    last_stamp: i64,
}

/// Accumulates finalized updates until they are persisted as one batch.
///
/// Entries are kept oldest first and are only removed after the transport
/// confirms the batch was persisted. A failed flush leaves every entry in
/// place; the next `add` re-checks the size and tries again.
pub struct BatchStore {
    identity: Identity,
    capacity: usize,
    codec: Arc<dyn Codec>,
    transport: Arc<dyn Transport>,
    state: Mutex<BatchState>,
}

impl BatchStore {
    pub fn new(
        identity: Identity,
        capacity: usize,
        codec: Arc<dyn Codec>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            identity,
            capacity: capacity.max(1),
            codec,
            transport,
            state: Mutex::new(BatchState {
                entries: Vec::with_capacity(capacity.max(1)),
                last_stamp: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an update, flushing if the batch has reached capacity.
    ///
    /// Returns the flush report when this add caused a successful flush.
    pub fn add(&self, update: Update) -> Result<Option<FlushReport>, BatchError> {
        let mut state = self.lock();
        state.entries.push(update);

        if state.entries.len() >= self.capacity {
            tracing::debug!(
                entries = state.entries.len(),
                capacity = self.capacity,
                "Batch reached capacity, flushing"
            );
            self.flush_locked(&mut state)
        } else {
            Ok(None)
        }
    }

    /// Persist every pending update as one batch and clear on success.
    ///
    /// Returns `Ok(None)` when there is nothing to flush.
    pub fn flush(&self) -> Result<Option<FlushReport>, BatchError> {
        let mut state = self.lock();
        self.flush_locked(&mut state)
    }

    fn flush_locked(&self, state: &mut BatchState) -> Result<Option<FlushReport>, BatchError> {
        if state.entries.is_empty() {
            return Ok(None);
        }

        // Ids must be unique per flush even when two flushes share a millisecond.
        let stamp = Utc::now().timestamp_millis().max(state.last_stamp + 1);
        state.last_stamp = stamp;
        let batch_id = format!("SM{}_{}", self.identity.user_id, stamp);

        let batch = Batch::new(batch_id.clone(), &self.identity, state.entries.clone());
        let bytes = self.codec.encode_batch(&batch)?;
        let file_name = format!("{batch_id}.{}", self.codec.extension());

        self.transport
            .persist(&bytes, &file_name)
            .map_err(|source| BatchError::Persist {
                batch_id: batch_id.clone(),
                source,
            })?;

        let report = FlushReport {
            batch_id,
            file_name,
            updates: state.entries.len(),
            bytes: bytes.len(),
        };
        state.entries.clear();

        tracing::info!(
            batch_id = %report.batch_id,
            updates = report.updates,
            bytes = report.bytes,
            "Persisted batch"
        );
        Ok(Some(report))
    }

    /// Number of updates waiting in memory.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::JsonCodec;
    use crate::source::types::PositionFix;
    use crate::transport::mocks::RecordingTransport;
    use crate::transport::DeliveryOutcome;
    use std::sync::atomic::Ordering;

    fn identity() -> Identity {
        Identity::new("device-1", "key-1")
    }

    fn update(lat: f64) -> Update {
        let mut update = Update::new(identity());
        update.fixes.push(PositionFix::new("gps", lat, 0.0, 5.0));
        update
    }

    fn store(capacity: usize) -> (BatchStore, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::new(DeliveryOutcome::TransportFailure(
            "unused".to_string(),
        )));
        let store = BatchStore::new(identity(), capacity, Arc::new(JsonCodec), transport.clone());
        (store, transport)
    }

    #[test]
    fn test_capacity_triggers_exactly_one_flush() {
        let (store, transport) = store(DEFAULT_BATCH_CAPACITY);

        let mut reports = Vec::new();
        for i in 0..DEFAULT_BATCH_CAPACITY {
            if let Some(report) = store.add(update(i as f64)).unwrap() {
                reports.push(report);
            }
        }

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].updates, DEFAULT_BATCH_CAPACITY);
        assert_eq!(transport.persist_count(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_failed_flush_keeps_entries() {
        let (store, transport) = store(3);
        transport.fail_persist.store(true, Ordering::SeqCst);

        store.add(update(1.0)).unwrap();
        store.add(update(2.0)).unwrap();
        let err = store.add(update(3.0)).unwrap_err();
        assert!(matches!(err, BatchError::Persist { .. }));
        assert_eq!(store.len(), 3);

        // The next add re-attempts the flush with everything still present.
        transport.fail_persist.store(false, Ordering::SeqCst);
        let report = store.add(update(4.0)).unwrap().expect("flush succeeds");
        assert_eq!(report.updates, 4);
        assert!(store.is_empty());
    }

    #[test]
    fn test_persisted_batch_decodes_in_arrival_order() {
        let (store, transport) = store(10);
        for lat in [1.0, 2.0, 3.0] {
            store.add(update(lat)).unwrap();
        }
        let report = store.flush().unwrap().unwrap();
        assert!(report.file_name.ends_with(".json"));

        let persisted = transport.persisted.lock().unwrap();
        let (name, bytes) = &persisted[0];
        assert_eq!(name, &report.file_name);

        let batch = JsonCodec.decode_batch(bytes).unwrap();
        assert_eq!(batch.batch_id, report.batch_id);
        let lats: Vec<f64> = batch.updates.iter().map(|u| u.fixes[0].latitude).collect();
        assert_eq!(lats, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_batch_with_non_finite_inputs_decodes() {
        use crate::core::accumulator::UpdateAccumulator;
        use crate::source::types::{EnvironmentValue, EnvironmentalReading};

        let acc = UpdateAccumulator::new(identity());
        let mut fix = PositionFix::new("gps", 40.0, -74.0, 8.0);
        fix.bearing = Some(f32::NAN);
        acc.append_fix(fix);
        acc.append_environment(EnvironmentalReading::new(EnvironmentValue::Pressure(f32::NAN)));
        acc.append_environment(EnvironmentalReading::new(EnvironmentValue::Light(250.0)));

        let (store, transport) = store(10);
        store.add(acc.finalize()).unwrap();
        store.flush().unwrap().unwrap();

        let persisted = transport.persisted.lock().unwrap();
        let batch = JsonCodec.decode_batch(&persisted[0].1).unwrap();
        let update = &batch.updates[0];
        assert_eq!(update.fixes.len(), 1);
        assert_eq!(update.fixes[0].bearing, None);
        assert_eq!(update.environment.len(), 1);
        assert_eq!(update.environment[0].value, EnvironmentValue::Light(250.0));
    }

    #[test]
    fn test_batch_ids_unique_per_flush() {
        let (store, _transport) = store(1);
        let a = store.add(update(1.0)).unwrap().unwrap();
        let b = store.add(update(2.0)).unwrap().unwrap();
        let c = store.add(update(3.0)).unwrap().unwrap();

        assert!(a.batch_id.starts_with("SMdevice-1_"));
        assert_ne!(a.batch_id, b.batch_id);
        assert_ne!(b.batch_id, c.batch_id);
    }

    #[test]
    fn test_flush_empty_is_noop() {
        let (store, transport) = store(5);
        assert!(store.flush().unwrap().is_none());
        assert_eq!(transport.persist_count(), 0);
    }
}
