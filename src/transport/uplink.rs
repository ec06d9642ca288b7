//! HTTP uplink to the location-improvement service.
//!
//! Realtime updates are POSTed one at a time to the update endpoint; persisted
//! batch files are re-uploaded to the batch endpoint. The service answers an
//! accepted update with the improved location in the response body.

use crate::config::Config;
use std::time::Duration;
use thiserror::Error;

/// Uplink configuration.
#[derive(Debug, Clone)]
pub struct UplinkConfig {
    /// URL receiving single realtime updates
    pub endpoint: String,
    /// URL receiving whole batch files
    pub batch_endpoint: String,
    /// Bearer token sent with every request
    pub api_key: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl UplinkConfig {
    /// Create a new uplink configuration with default batch endpoint and timeout.
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let batch_endpoint = Self::derive_batch_endpoint(&endpoint);
        Self {
            endpoint,
            batch_endpoint,
            api_key: api_key.into(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Build the uplink configuration from the agent configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            batch_endpoint: config.batch_endpoint.clone(),
            api_key: config.api_key.clone(),
            timeout: config.request_timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The batch endpoint lives next to the update endpoint (`.../update/` → `.../batch/`).
    fn derive_batch_endpoint(endpoint: &str) -> String {
        let trimmed = endpoint.trim_end_matches('/');
        match trimmed.rsplit_once('/') {
            Some((base, _)) => format!("{base}/batch/"),
            None => format!("{trimmed}/batch/"),
        }
    }
}

/// Uplink error types.
#[derive(Debug, Error)]
pub enum UplinkError {
    #[error("Uplink config error: {0}")]
    Config(String),
    #[error("Uplink network error: {0}")]
    Network(String),
    #[error("Uplink server error ({status}): {message}")]
    Server { status: u16, message: String },
}

#[cfg(feature = "gateway")]
mod http {
    use super::{UplinkConfig, UplinkError};
    use crate::transport::{BatchDirectory, DeliveryOutcome, Transport};
    use reqwest::StatusCode;
    use std::net::{TcpStream, ToSocketAddrs};
    use std::time::Duration;

    /// Timeout for the TCP reachability probe.
    const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

    /// Async client for the improvement service.
    pub struct UplinkClient {
        config: UplinkConfig,
        client: reqwest::Client,
    }

    impl UplinkClient {
        /// Create a new uplink client.
        pub fn new(config: UplinkConfig) -> Result<Self, UplinkError> {
            let client = reqwest::Client::builder()
                .timeout(config.timeout)
                .build()
                .map_err(|e| UplinkError::Config(format!("Failed to create HTTP client: {e}")))?;

            Ok(Self { config, client })
        }

        pub fn config(&self) -> &UplinkConfig {
            &self.config
        }

        /// POST a single encoded update. 200 and 202 count as delivered.
        pub async fn send_update(&self, payload: &[u8], content_type: &str) -> DeliveryOutcome {
            match self.post(&self.config.endpoint, payload, content_type).await {
                Ok((status, body)) if status == StatusCode::OK || status == StatusCode::ACCEPTED => {
                    DeliveryOutcome::Delivered(body)
                }
                Ok((status, body)) => DeliveryOutcome::Rejected {
                    status: status.as_u16(),
                    message: String::from_utf8_lossy(&body).into_owned(),
                },
                Err(e) => DeliveryOutcome::TransportFailure(e.to_string()),
            }
        }

        /// POST a whole encoded batch.
        pub async fn send_batch(&self, payload: &[u8], content_type: &str) -> Result<(), UplinkError> {
            let (status, body) = self
                .post(&self.config.batch_endpoint, payload, content_type)
                .await?;

            if !status.is_success() {
                return Err(UplinkError::Server {
                    status: status.as_u16(),
                    message: String::from_utf8_lossy(&body).into_owned(),
                });
            }
            Ok(())
        }

        async fn post(
            &self,
            url: &str,
            payload: &[u8],
            content_type: &str,
        ) -> Result<(StatusCode, Vec<u8>), UplinkError> {
            let response = self
                .client
                .post(url)
                .header("Authorization", format!("Bearer {}", self.config.api_key))
                .header("Content-Type", content_type)
                .header("Accept", content_type)
                .body(payload.to_vec())
                .send()
                .await
                .map_err(|e| UplinkError::Network(e.to_string()))?;

            let status = response.status();
            let body = response
                .bytes()
                .await
                .map_err(|e| UplinkError::Network(e.to_string()))?;

            Ok((status, body.to_vec()))
        }
    }

    /// Blocking uplink client for use from the delivery worker thread.
    pub struct BlockingUplinkClient {
        inner: UplinkClient,
        runtime: tokio::runtime::Runtime,
    }

    impl BlockingUplinkClient {
        /// Create a new blocking uplink client.
        pub fn new(config: UplinkConfig) -> Result<Self, UplinkError> {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| UplinkError::Config(format!("Failed to create runtime: {e}")))?;

            Ok(Self {
                inner: UplinkClient::new(config)?,
                runtime,
            })
        }

        pub fn config(&self) -> &UplinkConfig {
            self.inner.config()
        }

        pub fn send_update(&self, payload: &[u8], content_type: &str) -> DeliveryOutcome {
            self.runtime
                .block_on(self.inner.send_update(payload, content_type))
        }

        pub fn send_batch(&self, payload: &[u8], content_type: &str) -> Result<(), UplinkError> {
            self.runtime
                .block_on(self.inner.send_batch(payload, content_type))
        }
    }

    /// Transport that sends over HTTP and persists to a batch directory.
    pub struct HttpTransport {
        uplink: BlockingUplinkClient,
        store: BatchDirectory,
        content_type: &'static str,
        probe_host: String,
        probe_port: u16,
    }

    impl HttpTransport {
        pub fn new(
            config: UplinkConfig,
            store: BatchDirectory,
            content_type: &'static str,
        ) -> Result<Self, UplinkError> {
            let url = reqwest::Url::parse(&config.endpoint).map_err(|e| {
                UplinkError::Config(format!("Invalid endpoint '{}': {e}", config.endpoint))
            })?;
            let probe_host = url
                .host_str()
                .ok_or_else(|| UplinkError::Config(format!("Endpoint '{url}' has no host")))?
                .to_string();
            let probe_port = url
                .port_or_known_default()
                .ok_or_else(|| UplinkError::Config(format!("Endpoint '{url}' has no port")))?;

            Ok(Self {
                uplink: BlockingUplinkClient::new(config)?,
                store,
                content_type,
                probe_host,
                probe_port,
            })
        }
    }

    impl Transport for HttpTransport {
        fn is_reachable(&self) -> bool {
            let addrs = match (self.probe_host.as_str(), self.probe_port).to_socket_addrs() {
                Ok(addrs) => addrs,
                Err(e) => {
                    tracing::debug!(host = %self.probe_host, "Endpoint did not resolve: {e}");
                    return false;
                }
            };

            addrs
                .into_iter()
                .any(|addr| TcpStream::connect_timeout(&addr, PROBE_TIMEOUT).is_ok())
        }

        fn send(&self, payload: &[u8]) -> DeliveryOutcome {
            self.uplink.send_update(payload, self.content_type)
        }

        fn persist(&self, payload: &[u8], name: &str) -> std::io::Result<()> {
            self.store.persist(payload, name).map(|_| ())
        }
    }
}

#[cfg(feature = "gateway")]
pub use http::{BlockingUplinkClient, HttpTransport, UplinkClient};
