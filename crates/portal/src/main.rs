use anyhow::Result;
use axum::serve;
use portal::{create_router, init_chain_proxy, PortalState};
use relay_core::{config::AppConfig, metrics::MetricsCollector};
use rustls::crypto::{ring::default_provider, CryptoProvider};
use std::{net::SocketAddr, sync::Arc};
use tokio::signal;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes logging from the configuration. `RUST_LOG` overrides the configured level.
fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = config.logging.level.as_str();
        EnvFilter::new(format!("warn,relay_core={level},portal={level}"))
    });

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format.as_str() == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        registry.with(fmt_layer).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    CryptoProvider::install_default(default_provider())
        .map_err(|e| anyhow::anyhow!("Failed to install crypto provider: {e:?}"))?;

    let config = AppConfig::load().map_err(|e| anyhow::anyhow!("Configuration load failed: {e}"))?;
    config.validate().map_err(|e| anyhow::anyhow!("Configuration validation failed: {e}"))?;

    init_logging(&config);
    info!("Starting relay portal");

    let signer = config.signer().map_err(|e| anyhow::anyhow!(e))?;
    if config.consumer.private_key.is_none() {
        info!("No consumer key configured, using an ephemeral key");
    }
    debug!(
        consumer = %signer.address(),
        chain_id = %config.network.chain_id,
        interface = %config.network.api_interface,
        providers = config.providers.len(),
        "Configuration loaded"
    );

    let chain_proxy = init_chain_proxy(&config).await?;
    let state = PortalState {
        chain_proxy: Arc::new(chain_proxy),
        signer: Arc::new(signer),
        metrics: config.metrics.enabled.then(MetricsCollector::new),
    };

    let app = create_router(state, &config.portal);
    let addr: SocketAddr = config.socket_addr().map_err(|e| anyhow::anyhow!(e))?;
    info!(address = %addr, "Portal listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    if let Err(e) = serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "Server error occurred");
    }

    info!("Portal shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                () = std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, draining in-flight relays");
}
