//! Chain proxies: the parser and transport bundle for one API interface.
//!
//! [`get_chain_proxy`] selects the interface once, at construction. The resulting
//! [`ChainProxy`] parses client requests into [`NodeMessage`]s and opens transports to provider
//! endpoints; the dispatcher drives relays through it.

mod errors;
pub mod jsonrpc;
mod message;
pub mod rest;
pub mod spec;
pub mod tendermint;

pub use errors::{ChainProxyError, ParseError};
pub use jsonrpc::JsonRpcParser;
pub use message::NodeMessage;
pub use rest::RestParser;
pub use spec::{ApiCategory, BlockParser, ChainSpec, ServiceApi};
pub use tendermint::TendermintRpcParser;

use crate::{
    sentry::NetworkDirectory,
    session::{ConsumerSessionsWithProvider, SessionError, SessionManager},
    transport::{HttpRelayTransport, HttpTransportConfig, RelayTransport, TransportError},
};
use std::{fmt, str::FromStr, sync::Arc, time::Duration};

/// Default bound on a unary relay.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiInterface {
    JsonRpc,
    TendermintRpc,
    Rest,
}

impl ApiInterface {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JsonRpc => "jsonrpc",
            Self::TendermintRpc => "tendermintrpc",
            Self::Rest => "rest",
        }
    }
}

impl fmt::Display for ApiInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiInterface {
    type Err = ChainProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jsonrpc" => Ok(Self::JsonRpc),
            "tendermintrpc" => Ok(Self::TendermintRpc),
            "rest" => Ok(Self::Rest),
            other => Err(ChainProxyError::UnsupportedInterface(other.to_string())),
        }
    }
}

/// Interface-specific request parser.
#[derive(Debug, Clone)]
pub enum ChainParser {
    JsonRpc(JsonRpcParser),
    TendermintRpc(TendermintRpcParser),
    Rest(RestParser),
}

impl ChainParser {
    fn new(interface: ApiInterface, spec: Arc<ChainSpec>) -> Self {
        match interface {
            ApiInterface::JsonRpc => Self::JsonRpc(JsonRpcParser::new(spec)),
            ApiInterface::TendermintRpc => Self::TendermintRpc(TendermintRpcParser::new(spec)),
            ApiInterface::Rest => Self::Rest(RestParser::new(spec)),
        }
    }

    pub fn parse_msg(
        &self,
        url: &str,
        data: &[u8],
        connection_type: &str,
    ) -> Result<NodeMessage, ParseError> {
        match self {
            Self::JsonRpc(parser) => parser.parse_msg(url, data, connection_type),
            Self::TendermintRpc(parser) => parser.parse_msg(url, data, connection_type),
            Self::Rest(parser) => parser.parse_msg(url, data, connection_type),
        }
    }

    pub fn spec(&self) -> &ChainSpec {
        match self {
            Self::JsonRpc(parser) => parser.spec(),
            Self::TendermintRpc(parser) => parser.spec(),
            Self::Rest(parser) => parser.spec(),
        }
    }
}

/// Parser and transport bundle for one chain interface.
pub struct ChainProxy {
    interface: ApiInterface,
    node_url: String,
    n_conns: usize,
    relay_timeout: Duration,
    parser: ChainParser,
    sentry: Arc<dyn NetworkDirectory>,
    session_manager: Arc<dyn SessionManager>,
}

/// Builds the chain proxy for the interface the network directory advertises.
///
/// # Errors
///
/// Returns [`ChainProxyError::UnsupportedInterface`] for anything other than `jsonrpc`,
/// `tendermintrpc`, or `rest`.
pub fn get_chain_proxy(
    node_url: &str,
    n_conns: usize,
    sentry: Arc<dyn NetworkDirectory>,
    session_manager: Arc<dyn SessionManager>,
) -> Result<ChainProxy, ChainProxyError> {
    let interface: ApiInterface = sentry.api_interface().parse()?;
    let spec = Arc::new(ChainSpec::default_for(interface));

    tracing::debug!(
        interface = %interface,
        chain_id = sentry.chain_id(),
        apis = spec.len(),
        "chain proxy created"
    );

    Ok(ChainProxy {
        interface,
        node_url: node_url.to_string(),
        n_conns: n_conns.max(1),
        relay_timeout: DEFAULT_TIMEOUT,
        parser: ChainParser::new(interface, spec),
        sentry,
        session_manager,
    })
}

impl ChainProxy {
    /// Replaces the built-in API table.
    ///
    /// # Errors
    ///
    /// Returns [`ChainProxyError::InvalidSpec`] if the table is empty.
    pub fn with_spec(mut self, spec: ChainSpec) -> Result<Self, ChainProxyError> {
        if spec.is_empty() {
            return Err(ChainProxyError::InvalidSpec(format!(
                "no apis configured for {}",
                self.interface
            )));
        }
        self.parser = ChainParser::new(self.interface, Arc::new(spec));
        Ok(self)
    }

    #[must_use]
    pub fn with_relay_timeout(mut self, timeout: Duration) -> Self {
        self.relay_timeout = timeout;
        self
    }

    pub fn parse_msg(
        &self,
        url: &str,
        data: &[u8],
        connection_type: &str,
    ) -> Result<NodeMessage, ParseError> {
        self.parser.parse_msg(url, data, connection_type)
    }

    #[must_use]
    pub fn interface(&self) -> ApiInterface {
        self.interface
    }

    #[must_use]
    pub fn node_url(&self) -> &str {
        &self.node_url
    }

    #[must_use]
    pub fn parser(&self) -> &ChainParser {
        &self.parser
    }

    #[must_use]
    pub fn relay_timeout(&self) -> Duration {
        self.relay_timeout
    }

    #[must_use]
    pub fn sentry(&self) -> &Arc<dyn NetworkDirectory> {
        &self.sentry
    }

    #[must_use]
    pub fn session_manager(&self) -> &Arc<dyn SessionManager> {
        &self.session_manager
    }

    /// Opens an HTTP transport to a provider endpoint, sized from the connection hint.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the endpoint URL is invalid.
    pub fn connect(&self, endpoint_url: &str) -> Result<Arc<dyn RelayTransport>, TransportError> {
        let config =
            HttpTransportConfig { concurrent_limit: self.n_conns, ..HttpTransportConfig::default() };
        Ok(Arc::new(HttpRelayTransport::new(endpoint_url, config)?))
    }

    /// Installs a new provider pairing for `epoch`.
    ///
    /// # Errors
    ///
    /// Propagates the session manager's rejection of a stale epoch.
    pub async fn update_all_providers(
        &self,
        epoch: u64,
        providers: Vec<ConsumerSessionsWithProvider>,
    ) -> Result<(), SessionError> {
        self.session_manager.update_all_providers(epoch, providers).await
    }
}

impl fmt::Debug for ChainProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainProxy")
            .field("interface", &self.interface)
            .field("node_url", &self.node_url)
            .field("n_conns", &self.n_conns)
            .field("relay_timeout", &self.relay_timeout)
            .finish_non_exhaustive()
    }
}
