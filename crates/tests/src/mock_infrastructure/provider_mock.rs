//! In-process provider that answers relays with replies signed by its own key.

use alloy::{primitives::Address, signers::local::PrivateKeySigner};
use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::{
    sigs,
    transport::{RelaySubscription, RelayTransport, TransportError},
    types::{RelayReply, RelayRequest},
};
use serde_json::{json, Map, Value};
use std::{sync::Arc, time::Duration};

/// How a [`MockProvider`] answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderBehavior {
    /// Correctly signed replies, including finalization data for the consumer.
    Healthy,
    /// Replies signed by a key that is not the provider's.
    WrongKey,
    /// Finalization data signed for a different consumer.
    ForeignFinalization,
    /// Correctly signed replies whose payload is unique to this provider.
    Divergent,
    /// Healthy replies after a delay.
    Slow(Duration),
    /// Answers primary relays at once and data-reliability relays after a delay.
    SlowFollowUp(Duration),
    /// Every relay fails at the transport.
    Unreachable,
}

/// A provider that signs replies the way a real one would, with switchable misbehavior.
pub struct MockProvider {
    key: PrivateKeySigner,
    consumer: Address,
    latest_block: i64,
    behavior: Mutex<ProviderBehavior>,
    received: Mutex<Vec<RelayRequest>>,
}

impl MockProvider {
    #[must_use]
    pub fn new(consumer: Address, behavior: ProviderBehavior) -> Arc<Self> {
        Arc::new(Self {
            key: PrivateKeySigner::random(),
            consumer,
            latest_block: 1_000,
            behavior: Mutex::new(behavior),
            received: Mutex::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn with_latest_block(consumer: Address, behavior: ProviderBehavior, latest_block: i64) -> Arc<Self> {
        Arc::new(Self {
            key: PrivateKeySigner::random(),
            consumer,
            latest_block,
            behavior: Mutex::new(behavior),
            received: Mutex::new(Vec::new()),
        })
    }

    /// Checksummed provider address, as it appears in the pairing.
    #[must_use]
    pub fn address(&self) -> String {
        self.key.address().to_string()
    }

    pub fn set_behavior(&self, behavior: ProviderBehavior) {
        *self.behavior.lock() = behavior;
    }

    #[must_use]
    pub fn behavior(&self) -> ProviderBehavior {
        self.behavior.lock().clone()
    }

    /// Every request this provider received, in order.
    #[must_use]
    pub fn received(&self) -> Vec<RelayRequest> {
        self.received.lock().clone()
    }

    #[must_use]
    pub fn latest_block(&self) -> i64 {
        self.latest_block
    }

    fn payload(&self, behavior: &ProviderBehavior, sequence: usize) -> Vec<u8> {
        let result = match behavior {
            ProviderBehavior::Divergent => json!({ "number": "0x10", "miner": self.address() }),
            _ => json!({ "number": "0x10" }),
        };
        let mut body = json!({ "jsonrpc": "2.0", "id": 1, "result": result });
        if sequence > 0 {
            body["params"] = json!({ "seq": sequence });
        }
        body.to_string().into_bytes()
    }

    fn finalized_hashes(&self) -> Vec<u8> {
        let final_block = self.latest_block - 5;
        let mut hashes = Map::new();
        hashes.insert(final_block.to_string(), Value::String(format!("0x{final_block:064x}")));
        Value::Object(hashes).to_string().into_bytes()
    }

    /// Builds and signs the reply to `request`, honoring the current behavior.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidResponse`] if signing fails.
    pub fn sign_reply(&self, request: &RelayRequest, sequence: usize) -> Result<RelayReply, TransportError> {
        let behavior = self.behavior();
        let mut reply = RelayReply {
            data: self.payload(&behavior, sequence),
            latest_block: self.latest_block,
            finalized_blocks_hashes: self.finalized_hashes(),
            ..RelayReply::default()
        };

        let signing_error = |e: sigs::SigError| TransportError::InvalidResponse(e.to_string());
        let reply_key = match behavior {
            ProviderBehavior::WrongKey => PrivateKeySigner::random(),
            _ => self.key.clone(),
        };
        reply.sig = sigs::sign_relay_reply(&reply_key, &reply, request).map_err(signing_error)?;

        let finalization_consumer = match behavior {
            ProviderBehavior::ForeignFinalization => PrivateKeySigner::random().address(),
            _ => self.consumer,
        };
        reply.sig_blocks =
            sigs::sign_finalization_data(&reply_key, &reply, request, finalization_consumer)
                .map_err(signing_error)?;
        Ok(reply)
    }
}

#[async_trait]
impl RelayTransport for MockProvider {
    async fn relay(&self, request: &RelayRequest) -> Result<RelayReply, TransportError> {
        self.received.lock().push(request.clone());
        match self.behavior() {
            ProviderBehavior::Unreachable => {
                return Err(TransportError::ConnectionFailed("provider unreachable".to_string()));
            }
            ProviderBehavior::Slow(delay) => tokio::time::sleep(delay).await,
            ProviderBehavior::SlowFollowUp(delay) if request.is_data_reliability() => {
                tokio::time::sleep(delay).await;
            }
            _ => {}
        }
        self.sign_reply(request, 0)
    }

    async fn relay_subscribe(
        &self,
        request: &RelayRequest,
    ) -> Result<RelaySubscription, TransportError> {
        self.received.lock().push(request.clone());
        if self.behavior() == ProviderBehavior::Unreachable {
            return Err(TransportError::ConnectionFailed("provider unreachable".to_string()));
        }

        let (tx, subscription) = RelaySubscription::channel();
        for sequence in 1..=3 {
            let reply = self.sign_reply(request, sequence);
            if tx.send(reply).await.is_err() {
                break;
            }
        }
        Ok(subscription)
    }
}
