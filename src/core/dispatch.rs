//! Delivery of improved locations to interested listeners.

use crate::core::codec::RemoteResponse;
use chrono::{DateTime, Duration, Utc};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

/// Improved location reported back for a delivered update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationImprovement {
    pub latitude: f64,
    pub longitude: f64,
    /// Accuracy radius in meters
    pub accuracy: f64,
    pub place: Option<String>,
    /// PNG bytes
    pub skyview_png: Option<Vec<u8>>,
    pub response_time: DateTime<Utc>,
    /// Time between the service producing the result and us receiving it
    pub delay_ms: i64,
}

impl LocationImprovement {
    pub fn from_response(response: RemoteResponse, received_at: DateTime<Utc>) -> Self {
        let delay: Duration = received_at - response.utc;
        Self {
            latitude: response.lat,
            longitude: response.lon,
            accuracy: response.acc,
            place: response.geocoded,
            skyview_png: response.skyview,
            response_time: response.utc,
            delay_ms: delay.num_milliseconds(),
        }
    }
}

/// Receiver of location improvements.
pub trait ImprovementSink: Send + Sync {
    fn notify(&self, improvement: &LocationImprovement);
}

/// Forwards improvements over a channel.
pub struct ChannelSink {
    sender: Sender<LocationImprovement>,
}

impl ChannelSink {
    pub fn new(sender: Sender<LocationImprovement>) -> Self {
        Self { sender }
    }
}

impl ImprovementSink for ChannelSink {
    fn notify(&self, improvement: &LocationImprovement) {
        // A dropped receiver just means nobody is listening any more.
        if self.sender.try_send(improvement.clone()).is_err() {
            tracing::debug!("Improvement listener gone or full, dropping notification");
        }
    }
}

/// Logs each improvement.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ImprovementSink for LogSink {
    fn notify(&self, improvement: &LocationImprovement) {
        tracing::info!(
            lat = improvement.latitude,
            lon = improvement.longitude,
            acc = improvement.accuracy,
            place = improvement.place.as_deref().unwrap_or("-"),
            delay_ms = improvement.delay_ms,
            "Received location improvement"
        );
    }
}

/// Fans successful service responses out to every registered sink.
#[derive(Default)]
pub struct ResultDispatcher {
    sinks: Vec<Box<dyn ImprovementSink>>,
}

impl ResultDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: impl ImprovementSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Notify every sink once and return the event that was sent.
    pub fn dispatch(&self, response: RemoteResponse) -> LocationImprovement {
        let improvement = LocationImprovement::from_response(response, Utc::now());
        for sink in &self.sinks {
            sink.notify(&improvement);
        }
        improvement
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crossbeam_channel::unbounded;

    fn response() -> RemoteResponse {
        RemoteResponse {
            lat: 48.85,
            lon: 2.35,
            acc: 3.0,
            utc: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            geocoded: Some("Rue de Rivoli".to_string()),
            skyview: Some(vec![0x89, b'P', b'N', b'G']),
        }
    }

    #[test]
    fn test_improvement_from_response() {
        let received = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 2).unwrap();
        let improvement = LocationImprovement::from_response(response(), received);

        assert_eq!(improvement.latitude, 48.85);
        assert_eq!(improvement.place.as_deref(), Some("Rue de Rivoli"));
        assert_eq!(improvement.skyview_png.as_ref().map(Vec::len), Some(4));
        assert_eq!(improvement.delay_ms, 2000);
    }

    #[test]
    fn test_dispatch_notifies_each_sink_once() {
        let (tx_a, rx_a) = unbounded();
        let (tx_b, rx_b) = unbounded();
        let dispatcher = ResultDispatcher::new()
            .with_sink(ChannelSink::new(tx_a))
            .with_sink(ChannelSink::new(tx_b))
            .with_sink(LogSink);
        assert_eq!(dispatcher.sink_count(), 3);

        let sent = dispatcher.dispatch(response());

        assert_eq!(rx_a.try_recv().unwrap(), sent);
        assert_eq!(rx_b.try_recv().unwrap(), sent);
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (tx, rx) = unbounded();
        drop(rx);
        let dispatcher = ResultDispatcher::new().with_sink(ChannelSink::new(tx));
        dispatcher.dispatch(response());
    }
}
