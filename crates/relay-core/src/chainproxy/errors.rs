use thiserror::Error;

/// Errors raised while normalizing a client request into a [`NodeMessage`](super::NodeMessage).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("batch requests are not supported")]
    BatchNotSupported,

    #[error("api not supported: {0}")]
    ApiNotSupported(String),

    #[error("api {api} does not accept connection type {connection_type}")]
    UnsupportedConnectionType { api: String, connection_type: String },

    #[error("invalid block parameter: {0}")]
    InvalidBlockParam(String),

    #[error("missing block parameter for {0}")]
    MissingBlockParam(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainProxyError {
    #[error("chain proxy for apiInterface ({0}) not found")]
    UnsupportedInterface(String),

    #[error("invalid chain spec: {0}")]
    InvalidSpec(String),
}
