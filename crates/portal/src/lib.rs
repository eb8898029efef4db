//! Consumer portal: accepts client traffic and relays it through [`relay_core`].

pub mod middleware;
pub mod router;

pub use router::{create_router, PortalState};

use anyhow::{Context, Result};
use relay_core::{
    chainproxy::{get_chain_proxy, ChainProxy, ChainSpec},
    config::AppConfig,
    sentry::Sentry,
    session::{ConsumerSessionManager, ConsumerSessionsWithProvider, Endpoint},
};
use std::sync::Arc;
use tracing::info;

/// Builds the chain proxy for the configured network and installs the configured pairing.
///
/// # Errors
///
/// Fails on an unsupported interface, an invalid API table, an invalid provider endpoint, or a
/// rejected pairing.
pub async fn init_chain_proxy(config: &AppConfig) -> Result<ChainProxy> {
    let network = &config.network;
    let sentry = Arc::new(Sentry::new(
        &network.chain_id,
        &network.api_interface,
        network.compares_hashes,
        network.data_reliability_threshold,
    ));
    sentry.set_providers(config.providers.len());

    let mut chain_proxy = get_chain_proxy(
        &network.node_url,
        network.n_conns,
        sentry,
        Arc::new(ConsumerSessionManager::new()),
    )?
    .with_relay_timeout(config.relay_timeout());
    if !config.spec.is_empty() {
        chain_proxy = chain_proxy.with_spec(ChainSpec::new(config.spec.clone()))?;
    }

    let mut providers = Vec::with_capacity(config.providers.len());
    for provider in &config.providers {
        let endpoints = provider
            .endpoints
            .iter()
            .map(|url| {
                chain_proxy
                    .connect(url)
                    .map(|client| Endpoint::new(url.as_str(), client))
                    .with_context(|| format!("invalid endpoint {url} for {}", provider.address))
            })
            .collect::<Result<Vec<_>>>()?;
        providers.push(ConsumerSessionsWithProvider::new(
            provider.address.as_str(),
            endpoints,
            provider.max_compute_units,
            network.epoch,
        ));
    }

    chain_proxy.update_all_providers(network.epoch, providers).await?;
    info!(
        chain_id = %network.chain_id,
        interface = %chain_proxy.interface(),
        epoch = network.epoch,
        providers = config.providers.len(),
        "chain proxy ready"
    );
    Ok(chain_proxy)
}
