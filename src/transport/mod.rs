//! Network delivery and durable persistence for encoded payloads.
//!
//! The pipeline only sees the narrow [`Transport`] capability. The HTTP uplink
//! (behind the `gateway` feature) and the on-disk batch directory are the
//! concrete halves composed by [`HttpTransport`] and [`OfflineTransport`].

pub mod disk;
pub mod uplink;

pub use disk::BatchDirectory;
#[cfg(feature = "gateway")]
pub use uplink::{BlockingUplinkClient, HttpTransport, UplinkClient};
pub use uplink::{UplinkConfig, UplinkError};

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The service accepted the payload; carries the raw response body.
    Delivered(Vec<u8>),
    /// The service answered with a non-success status.
    Rejected { status: u16, message: String },
    /// The request never produced a response.
    TransportFailure(String),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered(_))
    }
}

/// Capability used by the pipeline to ship and store payloads.
///
/// Both calls may block for a long time; the pipeline only invokes them from
/// its delivery worker, never while holding the accumulator lock.
pub trait Transport: Send + Sync {
    /// Whether the network is reachable right now. Queried before every send.
    fn is_reachable(&self) -> bool;

    /// Make one delivery attempt.
    fn send(&self, payload: &[u8]) -> DeliveryOutcome;

    /// Durably store `payload` under `name`.
    fn persist(&self, payload: &[u8], name: &str) -> std::io::Result<()>;
}

/// Transport with no network half: every update ends up in a batch file.
#[derive(Debug, Clone)]
pub struct OfflineTransport {
    store: BatchDirectory,
}

impl OfflineTransport {
    pub fn new(store: BatchDirectory) -> Self {
        Self { store }
    }
}

impl Transport for OfflineTransport {
    fn is_reachable(&self) -> bool {
        false
    }

    fn send(&self, _payload: &[u8]) -> DeliveryOutcome {
        DeliveryOutcome::TransportFailure("offline transport".to_string())
    }

    fn persist(&self, payload: &[u8], name: &str) -> std::io::Result<()> {
        self.store.persist(payload, name).map(|_| ())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_transport_never_delivers() {
        let dir = tempfile::tempdir().unwrap();
        let transport = OfflineTransport::new(BatchDirectory::new(dir.path()));

        assert!(!transport.is_reachable());
        assert!(!transport.send(b"{}").is_delivered());

        transport.persist(b"{}", "SMdevice_1.json").unwrap();
        assert!(dir.path().join("SMdevice_1.json").exists());
    }
}
