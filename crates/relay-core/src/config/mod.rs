//! Consumer configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: Hardcoded in struct `Default` implementations
//! 2. **Config file**: TOML file specified by `RELAY_CONFIG` env var
//! 3. **Environment variables**: `RELAY__*` env vars override specific fields
//!
//! # Configuration Sections
//!
//! - [`PortalConfig`]: HTTP server settings (bind address, concurrency)
//! - [`NetworkConfig`]: Chain, interface and provider-population settings
//! - [`RelaySettings`]: Relay timeout
//! - [`ConsumerKeyConfig`]: Consumer signing key
//! - [`ProviderConfig`]: Paired provider endpoints and compute-unit budgets
//! - [`MetricsConfig`]: Prometheus metrics endpoint
//! - [`LoggingConfig`]: Log level and format
//!
//! # Example
//!
//! ```toml
//! [network]
//! chain_id = "ETH1"
//! api_interface = "jsonrpc"
//! epoch = 1
//!
//! [[providers]]
//! address = "0x8ba1f109551bD432803012645Ac136ddd64DBA72"
//! endpoints = ["http://127.0.0.1:2221"]
//! max_compute_units = 100000
//! ```

use crate::chainproxy::{ApiInterface, ServiceApi};
use alloy::signers::local::PrivateKeySigner;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path, time::Duration};

/// HTTP server configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    /// IP address to bind the server to. Defaults to `127.0.0.1`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port number to listen on. Must be greater than 0. Defaults to `3333`.
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Maximum number of concurrent client requests. Defaults to `100`.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    3333
}

fn default_max_concurrent_requests() -> usize {
    100
}

/// The chain this consumer relays to and what it knows about the provider population.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub chain_id: String,

    /// `jsonrpc`, `tendermintrpc` or `rest`.
    pub api_interface: String,

    /// Node URL the chain proxy is labeled with.
    #[serde(default)]
    pub node_url: String,

    /// Pairing epoch the configured providers belong to.
    #[serde(default = "default_epoch")]
    pub epoch: u64,

    /// Require replies to carry finalization data signed for this consumer.
    #[serde(default)]
    pub compares_hashes: bool,

    /// VRF threshold for data-reliability checks. `0` disables them.
    #[serde(default)]
    pub data_reliability_threshold: u32,

    /// Connection hint, used to size each provider transport.
    #[serde(default = "default_n_conns")]
    pub n_conns: usize,
}

fn default_epoch() -> u64 {
    1
}

fn default_n_conns() -> usize {
    8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Bound on a unary relay in milliseconds. Defaults to `5000`.
    #[serde(default = "default_relay_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_relay_timeout_ms() -> u64 {
    5_000
}

/// Consumer signing key. Without one an ephemeral key is generated at startup.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ConsumerKeyConfig {
    /// Hex-encoded secp256k1 private key, with or without `0x`.
    #[serde(default)]
    pub private_key: Option<String>,
}

impl fmt::Debug for ConsumerKeyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerKeyConfig")
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A paired provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider account address. Replies must be signed by it.
    pub address: String,

    /// Relay endpoints. The first one is used.
    pub endpoints: Vec<String>,

    /// Compute units the consumer may spend with this provider in the epoch.
    #[serde(default = "default_max_compute_units")]
    pub max_compute_units: u64,
}

fn default_max_compute_units() -> u64 {
    100_000
}

/// Prometheus metrics configuration.
///
/// When enabled, metrics are exposed at `/metrics` on the portal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled. Defaults to `true`.
    pub enabled: bool,
}

/// Application logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "trace", "debug", "info", "warn", "error"). Defaults to `"info"`.
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    pub format: String,
}

/// Root consumer configuration.
///
/// Loaded with the `RELAY` prefix for environment overrides using `__` as a separator, e.g.
/// `RELAY__NETWORK__CHAIN_ID=LAV1`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub portal: PortalConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub relay: RelaySettings,

    #[serde(default)]
    pub consumer: ConsumerKeyConfig,

    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Overrides the built-in API table of the interface when non-empty.
    #[serde(default)]
    pub spec: Vec<ServiceApi>,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            chain_id: "ETH1".to_string(),
            api_interface: "jsonrpc".to_string(),
            node_url: String::new(),
            epoch: default_epoch(),
            compares_hashes: false,
            data_reliability_threshold: 0,
            n_conns: default_n_conns(),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self { timeout_ms: default_relay_timeout_ms() }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config_builder = Config::builder()
            .set_default("portal.bind_address", "127.0.0.1")?
            .set_default("portal.bind_port", 3333)?
            .set_default("portal.max_concurrent_requests", 100)?
            .set_default("network.chain_id", "ETH1")?
            .set_default("network.api_interface", "jsonrpc")?
            .set_default("relay.timeout_ms", 5_000)?
            .set_default("metrics.enabled", true)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("RELAY").prefix_separator("__").separator("__"))
            .build()?;

        config_builder.try_deserialize()
    }

    /// Loads configuration from `config/config.toml`, or the file named by `RELAY_CONFIG`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("RELAY_CONFIG").unwrap_or_else(|_| "config/config.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Returns the parsed socket address for the portal.
    ///
    /// # Errors
    ///
    /// Returns an error string if the address cannot be parsed.
    pub fn socket_addr(&self) -> Result<std::net::SocketAddr, String> {
        format!("{}:{}", self.portal.bind_address, self.portal.bind_port)
            .parse()
            .map_err(|_| {
                format!(
                    "Invalid socket address: {}:{}",
                    self.portal.bind_address, self.portal.bind_port
                )
            })
    }

    #[must_use]
    pub fn relay_timeout(&self) -> Duration {
        Duration::from_millis(self.relay.timeout_ms)
    }

    /// The consumer signing key, or a fresh random key if none is configured.
    ///
    /// # Errors
    ///
    /// Returns an error string if the configured key is not a valid private key.
    pub fn signer(&self) -> Result<PrivateKeySigner, String> {
        match self.consumer.private_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => {
                key.parse::<PrivateKeySigner>().map_err(|e| format!("Invalid consumer private key: {e}"))
            }
            _ => Ok(PrivateKeySigner::random()),
        }
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.network.chain_id.is_empty() {
            return Err("Chain ID must not be empty".to_string());
        }

        self.network
            .api_interface
            .parse::<ApiInterface>()
            .map_err(|e| format!("Invalid network.api_interface: {e}"))?;

        if self.providers.is_empty() {
            return Err("No providers configured".to_string());
        }

        for provider in &self.providers {
            if provider.address.parse::<alloy::primitives::Address>().is_err() {
                return Err(format!("Invalid provider address: {}", provider.address));
            }
            let Some(endpoint) = provider.endpoints.first() else {
                return Err(format!("No endpoints for provider: {}", provider.address));
            };
            if !endpoint.starts_with("http") {
                return Err(format!(
                    "Invalid endpoint URL for provider {}: {}",
                    provider.address, endpoint
                ));
            }
            if provider.max_compute_units == 0 {
                return Err(format!(
                    "Max compute units must be greater than 0 for provider: {}",
                    provider.address
                ));
            }
        }

        if self.relay.timeout_ms == 0 {
            return Err("Relay timeout must be greater than 0".to_string());
        }

        if self.portal.max_concurrent_requests == 0 {
            return Err("Max concurrent requests must be greater than 0".to_string());
        }

        if self.portal.bind_port == 0 {
            return Err("Bind port must be greater than 0".to_string());
        }

        if self.network.n_conns == 0 {
            return Err("Connection count must be greater than 0".to_string());
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        self.signer().map(|_| ())
    }
}
