//! Test fixtures wiring mock providers into a chain proxy.

use super::{
    provider_mock::{MockProvider, ProviderBehavior},
    session_mock::CountingSessionManager,
};
use alloy::signers::local::PrivateKeySigner;
use relay_core::{
    chainproxy::{get_chain_proxy, ChainProxy},
    relay::{send_relay, RelayContext, RelayError, RelayResponse},
    sentry::{NetworkDirectory, Sentry},
    session::{ConsumerSessionsWithProvider, Endpoint, SessionManager},
    transport::RelayTransport,
};
use std::{sync::Arc, time::Duration};

pub const EPOCH: u64 = 20;

pub const BLOCK_NUMBER: &[u8] = br#"{"jsonrpc":"2.0","id":1,"method":"eth_blockNumber","params":[]}"#;

pub const SUBSCRIBE_HEADS: &[u8] =
    br#"{"jsonrpc":"2.0","id":1,"method":"eth_subscribe","params":["newHeads"]}"#;

/// `eth_getBlockByNumber` for a concrete height, an API eligible for data reliability.
#[must_use]
pub fn block_by_number(block: i64) -> Vec<u8> {
    format!(
        r#"{{"jsonrpc":"2.0","id":1,"method":"eth_getBlockByNumber","params":["0x{block:x}",false]}}"#
    )
    .into_bytes()
}

#[derive(Debug, Clone)]
pub struct NetworkOptions {
    pub providers: usize,
    pub behavior: ProviderBehavior,
    pub compares_hashes: bool,
    pub reliability_threshold: u32,
    /// `None` keeps the chain proxy's default deadline.
    pub relay_timeout: Option<Duration>,
    pub max_compute_units: u64,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            providers: 1,
            behavior: ProviderBehavior::Healthy,
            compares_hashes: true,
            reliability_threshold: 0,
            relay_timeout: Some(Duration::from_millis(500)),
            max_compute_units: 10_000,
        }
    }
}

/// A consumer paired with in-process mock providers.
pub struct TestNetwork {
    pub consumer: PrivateKeySigner,
    pub sentry: Arc<Sentry>,
    pub manager: Arc<CountingSessionManager>,
    pub proxy: ChainProxy,
    pub providers: Vec<Arc<MockProvider>>,
}

impl TestNetwork {
    pub async fn new(options: NetworkOptions) -> Self {
        let consumer = PrivateKeySigner::random();
        let providers = (0..options.providers)
            .map(|_| MockProvider::new(consumer.address(), options.behavior.clone()))
            .collect();
        Self::with_providers(consumer, providers, &options).await
    }

    /// Pairs the consumer with providers built by the caller.
    pub async fn with_providers(
        consumer: PrivateKeySigner,
        providers: Vec<Arc<MockProvider>>,
        options: &NetworkOptions,
    ) -> Self {
        let sentry = Arc::new(Sentry::new(
            "ETH1",
            "jsonrpc",
            options.compares_hashes,
            options.reliability_threshold,
        ));
        sentry.set_providers(providers.len());

        let manager = CountingSessionManager::new();
        let mut proxy = get_chain_proxy(
            "http://node.test",
            4,
            Arc::clone(&sentry) as Arc<dyn NetworkDirectory>,
            Arc::clone(&manager) as Arc<dyn SessionManager>,
        )
        .expect("jsonrpc is supported");
        if let Some(timeout) = options.relay_timeout {
            proxy = proxy.with_relay_timeout(timeout);
        }

        let paired = providers
            .iter()
            .map(|provider| {
                let client = Arc::clone(provider) as Arc<dyn RelayTransport>;
                let endpoint = Endpoint::new("mock://provider", client);
                ConsumerSessionsWithProvider::new(
                    provider.address(),
                    vec![endpoint],
                    options.max_compute_units,
                    EPOCH,
                )
            })
            .collect();
        proxy.update_all_providers(EPOCH, paired).await.expect("fresh pairing");

        Self { consumer, sentry, manager, proxy, providers }
    }

    pub async fn relay(&self, request: &[u8]) -> Result<RelayResponse, RelayError> {
        send_relay(&RelayContext::background(), &self.proxy, &self.consumer, "", request, "POST")
            .await
    }

    #[must_use]
    pub fn provider(&self, address: &str) -> Option<&Arc<MockProvider>> {
        self.providers.iter().find(|p| p.address() == address)
    }

    /// Compute units in use across every provider.
    #[must_use]
    pub fn used_compute_units(&self) -> u64 {
        self.providers
            .iter()
            .filter_map(|p| self.manager.inner().used_compute_units(&p.address()))
            .sum()
    }
}
