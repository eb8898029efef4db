//! Provider transports.
//!
//! A [`RelayTransport`] moves a signed [`RelayRequest`] to one provider endpoint and returns
//! the provider's [`RelayReply`] unverified. Authentication happens in the dispatcher.

pub mod http;
pub mod websocket;

pub use http::{HttpRelayTransport, HttpTransportConfig};

use crate::types::{RelayReply, RelayRequest};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};

/// Messages buffered per subscription before the reader applies backpressure.
pub const SUBSCRIPTION_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("HTTP error: {0} - {1}")]
    HttpError(u16, String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("concurrency limit reached for {0}")]
    ConcurrencyLimit(String),

    #[error("subscription closed")]
    SubscriptionClosed,
}

impl TransportError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::DeadlineExceeded)
    }
}

/// Sends relays to a single provider endpoint.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Sends a unary relay and waits for the reply.
    async fn relay(&self, request: &RelayRequest) -> Result<RelayReply, TransportError>;

    /// Opens a subscription relay. Replies stream until the subscription is dropped.
    async fn relay_subscribe(&self, request: &RelayRequest)
        -> Result<RelaySubscription, TransportError>;
}

/// Stream of replies from a subscription relay.
///
/// Dropping the subscription aborts the task reading from the provider.
pub struct RelaySubscription {
    receiver: mpsc::Receiver<Result<RelayReply, TransportError>>,
    reader: Option<JoinHandle<()>>,
}

impl RelaySubscription {
    pub fn new(
        receiver: mpsc::Receiver<Result<RelayReply, TransportError>>,
        reader: Option<JoinHandle<()>>,
    ) -> Self {
        Self { receiver, reader }
    }

    /// Creates a subscription fed by the returned sender, with no reader task attached.
    pub fn channel() -> (mpsc::Sender<Result<RelayReply, TransportError>>, Self) {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        (tx, Self::new(rx, None))
    }

    /// Next reply, or `None` once the provider closed the stream.
    pub async fn next(&mut self) -> Option<Result<RelayReply, TransportError>> {
        self.receiver.recv().await
    }
}

impl Drop for RelaySubscription {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl fmt::Debug for RelaySubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelaySubscription")
            .field("has_reader", &self.reader.is_some())
            .finish_non_exhaustive()
    }
}
