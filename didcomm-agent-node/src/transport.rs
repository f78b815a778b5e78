//! Outbound message delivery.
//!
//! The agent hands packed envelopes to an [`OutboundTransport`]. Two
//! implementations are provided:
//!
//! - [`HttpTransport`] posts the envelope to an HTTP(S) endpoint
//! - [`QueuedTransport`] only enqueues; a [`QueueWorker`] delivers through an
//!   inner transport and retries failures
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use didcomm_agent_node::config::TransportConfig;
//! use didcomm_agent_node::transport::{HttpTransport, OutboundTransport, QueuedTransport};
//!
//! async fn send(envelope: &[u8]) -> Result<(), didcomm_agent_node::error::TransportError> {
//!     let config = TransportConfig::default();
//!     let http = Arc::new(HttpTransport::new(&config)?);
//!     let (queue, _worker) = QueuedTransport::spawn(http, &config);
//!     queue.send(envelope, "https://bob.example/endpoint").await
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use url::Url;

use crate::config::TransportConfig;
use crate::error::TransportError;

/// Content type of packed envelopes on HTTP.
pub const CONTENT_TYPE: &str = "application/ssi-agent-wire";

/// Delivers raw bytes to an endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutboundTransport: Send + Sync {
    /// Delivers `payload` to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the payload was not accepted.
    async fn send(&self, payload: &[u8], endpoint: &str) -> Result<(), TransportError>;
}

/// Posts envelopes over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Creates a transport with the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Http`] if the client cannot be built.
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl OutboundTransport for HttpTransport {
    async fn send(&self, payload: &[u8], endpoint: &str) -> Result<(), TransportError> {
        let url = Url::parse(endpoint)
            .ok()
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .ok_or_else(|| TransportError::InvalidEndpoint(endpoint.to_string()))?;

        debug!(endpoint = %url, bytes = payload.len(), "Dispatching message");

        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::Status {
                endpoint: endpoint.to_string(),
                status: response.status().as_u16(),
            });
        }

        Ok(())
    }
}

#[derive(Debug)]
struct QueuedMessage {
    payload: Vec<u8>,
    endpoint: String,
}

/// Enqueues envelopes for a [`QueueWorker`].
///
/// `send` never waits for the network; it fails only when the queue is full
/// or its worker has stopped.
#[derive(Debug, Clone)]
pub struct QueuedTransport {
    sender: mpsc::Sender<QueuedMessage>,
}

/// Drains a [`QueuedTransport`] into an inner transport.
#[derive(Debug)]
pub struct QueueWorker {
    receiver: mpsc::Receiver<QueuedMessage>,
    max_retries: u32,
    backoff: Duration,
}

impl QueuedTransport {
    /// Creates a queue and the worker that must drain it.
    #[must_use]
    pub fn channel(config: &TransportConfig) -> (Self, QueueWorker) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let worker = QueueWorker {
            receiver,
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        };
        (Self { sender }, worker)
    }

    /// Creates a queue and spawns its worker over `inner`.
    ///
    /// The worker stops once every clone of the queue is dropped.
    pub fn spawn(
        inner: Arc<dyn OutboundTransport>,
        config: &TransportConfig,
    ) -> (Self, JoinHandle<()>) {
        let (queue, worker) = Self::channel(config);
        (queue, tokio::spawn(worker.run(inner)))
    }
}

#[async_trait]
impl OutboundTransport for QueuedTransport {
    async fn send(&self, payload: &[u8], endpoint: &str) -> Result<(), TransportError> {
        let message = QueuedMessage {
            payload: payload.to_vec(),
            endpoint: endpoint.to_string(),
        };
        self.sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => TransportError::QueueClosed,
        })
    }
}

impl QueueWorker {
    /// Delivers queued messages until the queue is closed.
    pub async fn run(mut self, inner: Arc<dyn OutboundTransport>) {
        while let Some(message) = self.receiver.recv().await {
            self.deliver(inner.as_ref(), &message).await;
        }
        debug!("outbound queue closed");
    }

    async fn deliver(&self, inner: &dyn OutboundTransport, message: &QueuedMessage) -> bool {
        let mut attempt = 0;
        loop {
            match inner.send(&message.payload, &message.endpoint).await {
                Ok(()) => return true,
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(endpoint = %message.endpoint, attempt, error = %e, "delivery failed, retrying");
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(e) => {
                    error!(endpoint = %message.endpoint, error = %e, "delivery failed, dropping message");
                    return false;
                }
            }
        }
    }
}
