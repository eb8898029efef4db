//! Service API tables per chain interface.
//!
//! A [`ChainSpec`] lists every API the consumer will relay for one interface together with its
//! compute-unit cost, category flags, and how the targeted block is read from its parameters.
//! The built-in tables are used unless the configuration provides one.

use super::{ApiInterface, ParseError};
use crate::types::{
    EARLIEST_BLOCK, FINALIZED_BLOCK, LATEST_BLOCK, NOT_APPLICABLE, PENDING_BLOCK, SAFE_BLOCK,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};

/// Behavioral flags of a service API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApiCategory {
    /// Identical requests at the same block yield identical payloads.
    #[serde(default)]
    pub deterministic: bool,
    /// Answered from provider-local state, not chain state.
    #[serde(default)]
    pub local: bool,
    #[serde(default)]
    pub subscription: bool,
    /// Mutates chain state (transaction submission).
    #[serde(default)]
    pub stateful: bool,
    /// Replies are eligible for a data-reliability follow-up relay.
    #[serde(default)]
    pub data_reliability: bool,
}

/// How the requested block is read from an API's parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "func", rename_all = "snake_case")]
pub enum BlockParser {
    /// The API does not target a block.
    Empty,
    /// The API always targets the given block tag or number.
    Default { value: String },
    /// The block is the positional parameter at `index`.
    ByArg {
        index: usize,
        #[serde(default)]
        default: Option<String>,
    },
    /// The block is the named parameter `name`.
    ByName {
        name: String,
        #[serde(default)]
        default: Option<String>,
    },
}

impl BlockParser {
    /// Reads the requested block from `params`, an array or object of request parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::MissingBlockParam`] if the parameter is absent and no default is
    /// configured, or [`ParseError::InvalidBlockParam`] if it cannot be parsed.
    pub fn parse(&self, api: &str, params: &Value) -> Result<i64, ParseError> {
        match self {
            Self::Empty => Ok(NOT_APPLICABLE),
            Self::Default { value } => parse_block_str(value),
            Self::ByArg { index, default } => {
                let found = match params {
                    Value::Array(items) => items.get(*index),
                    _ => None,
                };
                resolve(api, found, default.as_deref())
            }
            Self::ByName { name, default } => {
                let found = match params {
                    Value::Object(map) => map.get(name),
                    // positional params carrying a filter object, e.g. eth_getLogs
                    Value::Array(items) => {
                        items.first().and_then(Value::as_object).and_then(|map| map.get(name))
                    }
                    _ => None,
                };
                resolve(api, found, default.as_deref())
            }
        }
    }
}

fn resolve(api: &str, found: Option<&Value>, default: Option<&str>) -> Result<i64, ParseError> {
    match (found, default) {
        (Some(value), _) if !value.is_null() => parse_block_value(value),
        (_, Some(default)) => parse_block_str(default),
        _ => Err(ParseError::MissingBlockParam(api.to_string())),
    }
}

/// Parses a block tag, `0x` hex number, or decimal number.
pub fn parse_block_str(value: &str) -> Result<i64, ParseError> {
    match value {
        "latest" => Ok(LATEST_BLOCK),
        "earliest" => Ok(EARLIEST_BLOCK),
        "pending" => Ok(PENDING_BLOCK),
        "safe" => Ok(SAFE_BLOCK),
        "finalized" => Ok(FINALIZED_BLOCK),
        s => {
            let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => i64::from_str_radix(hex, 16).ok(),
                None => s.parse::<i64>().ok(),
            };
            parsed
                .filter(|block| *block >= 0)
                .ok_or_else(|| ParseError::InvalidBlockParam(s.to_string()))
        }
    }
}

fn parse_block_value(value: &Value) -> Result<i64, ParseError> {
    match value {
        Value::String(s) => parse_block_str(s),
        Value::Number(n) => n
            .as_i64()
            .filter(|block| *block >= 0)
            .ok_or_else(|| ParseError::InvalidBlockParam(n.to_string())),
        // block-hash objects (EIP-1898) don't pin a height we can compare
        Value::Object(map) => match map.get("blockNumber") {
            Some(number) => parse_block_value(number),
            None => Ok(NOT_APPLICABLE),
        },
        other => Err(ParseError::InvalidBlockParam(other.to_string())),
    }
}

/// One relayable API of a chain interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceApi {
    /// Method name, or path template for REST (`/blocks/{height}`).
    pub name: String,
    pub compute_units: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub category: ApiCategory,
    #[serde(default = "default_block_parsing")]
    pub block_parsing: BlockParser,
    /// Accepted connection types (HTTP methods). Empty accepts any.
    #[serde(default)]
    pub connection_types: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_block_parsing() -> BlockParser {
    BlockParser::Empty
}

impl ServiceApi {
    fn new(name: &str, compute_units: u64, category: ApiCategory, block_parsing: BlockParser) -> Self {
        Self {
            name: name.to_string(),
            compute_units,
            enabled: true,
            category,
            block_parsing,
            connection_types: Vec::new(),
        }
    }

    fn with_connection_types(mut self, types: &[&str]) -> Self {
        self.connection_types = types.iter().map(|t| (*t).to_string()).collect();
        self
    }

    /// Returns `true` if the API accepts `connection_type`. Comparison is case-insensitive.
    #[must_use]
    pub fn accepts_connection_type(&self, connection_type: &str) -> bool {
        self.connection_types.is_empty() ||
            self.connection_types.iter().any(|t| t.eq_ignore_ascii_case(connection_type))
    }
}

/// Table of service APIs for one interface, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ChainSpec {
    apis: HashMap<String, Arc<ServiceApi>>,
}

impl ChainSpec {
    #[must_use]
    pub fn new(apis: impl IntoIterator<Item = ServiceApi>) -> Self {
        Self { apis: apis.into_iter().map(|api| (api.name.clone(), Arc::new(api))).collect() }
    }

    /// Enabled API by exact name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<ServiceApi>> {
        self.apis.get(name).filter(|api| api.enabled)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ServiceApi>> {
        self.apis.values().filter(|api| api.enabled)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.apis.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.apis.is_empty()
    }

    /// Built-in API table for `interface`.
    #[must_use]
    pub fn default_for(interface: ApiInterface) -> Self {
        match interface {
            ApiInterface::JsonRpc => Self::new(default_jsonrpc_apis()),
            ApiInterface::TendermintRpc => Self::new(default_tendermint_apis()),
            ApiInterface::Rest => Self::new(default_rest_apis()),
        }
    }
}

const DETERMINISTIC: ApiCategory = ApiCategory {
    deterministic: true,
    local: false,
    subscription: false,
    stateful: false,
    data_reliability: true,
};

const HEAD: ApiCategory = ApiCategory {
    deterministic: false,
    local: false,
    subscription: false,
    stateful: false,
    data_reliability: false,
};

const LOCAL: ApiCategory = ApiCategory {
    deterministic: true,
    local: true,
    subscription: false,
    stateful: false,
    data_reliability: false,
};

const STATEFUL: ApiCategory = ApiCategory {
    deterministic: false,
    local: false,
    subscription: false,
    stateful: true,
    data_reliability: false,
};

const SUBSCRIPTION: ApiCategory = ApiCategory {
    deterministic: false,
    local: false,
    subscription: true,
    stateful: false,
    data_reliability: false,
};

fn latest() -> BlockParser {
    BlockParser::Default { value: "latest".to_string() }
}

fn by_arg(index: usize, default: Option<&str>) -> BlockParser {
    BlockParser::ByArg { index, default: default.map(str::to_string) }
}

fn by_name(name: &str, default: Option<&str>) -> BlockParser {
    BlockParser::ByName { name: name.to_string(), default: default.map(str::to_string) }
}

fn default_jsonrpc_apis() -> Vec<ServiceApi> {
    vec![
        ServiceApi::new("eth_blockNumber", 10, HEAD, latest()),
        ServiceApi::new("eth_chainId", 1, LOCAL, BlockParser::Empty),
        ServiceApi::new("net_version", 1, LOCAL, BlockParser::Empty),
        ServiceApi::new("eth_gasPrice", 10, HEAD, latest()),
        ServiceApi::new("eth_getBlockByNumber", 20, DETERMINISTIC, by_arg(0, None)),
        ServiceApi::new("eth_getBlockByHash", 20, DETERMINISTIC, BlockParser::Empty),
        ServiceApi::new("eth_getBalance", 20, DETERMINISTIC, by_arg(1, Some("latest"))),
        ServiceApi::new("eth_getCode", 20, DETERMINISTIC, by_arg(1, Some("latest"))),
        ServiceApi::new("eth_getTransactionCount", 20, DETERMINISTIC, by_arg(1, Some("latest"))),
        ServiceApi::new("eth_getStorageAt", 20, DETERMINISTIC, by_arg(2, Some("latest"))),
        ServiceApi::new("eth_call", 20, DETERMINISTIC, by_arg(1, Some("latest"))),
        ServiceApi::new("eth_estimateGas", 20, HEAD, by_arg(1, Some("latest"))),
        ServiceApi::new("eth_getLogs", 50, DETERMINISTIC, by_name("toBlock", Some("latest"))),
        ServiceApi::new("eth_getTransactionByHash", 20, DETERMINISTIC, BlockParser::Empty),
        ServiceApi::new("eth_getTransactionReceipt", 20, DETERMINISTIC, BlockParser::Empty),
        ServiceApi::new("eth_sendRawTransaction", 20, STATEFUL, BlockParser::Empty),
        ServiceApi::new("eth_subscribe", 100, SUBSCRIPTION, BlockParser::Empty),
        ServiceApi::new("eth_unsubscribe", 10, HEAD, BlockParser::Empty),
    ]
}

fn default_tendermint_apis() -> Vec<ServiceApi> {
    vec![
        ServiceApi::new("status", 10, HEAD, latest()),
        ServiceApi::new("health", 1, LOCAL, BlockParser::Empty),
        ServiceApi::new("block", 20, DETERMINISTIC, by_name("height", Some("latest"))),
        ServiceApi::new("block_results", 20, DETERMINISTIC, by_name("height", Some("latest"))),
        ServiceApi::new("commit", 20, DETERMINISTIC, by_name("height", Some("latest"))),
        ServiceApi::new("validators", 20, DETERMINISTIC, by_name("height", Some("latest"))),
        ServiceApi::new("abci_query", 20, DETERMINISTIC, by_name("height", Some("latest"))),
        ServiceApi::new("tx", 20, DETERMINISTIC, BlockParser::Empty),
        ServiceApi::new("broadcast_tx_sync", 20, STATEFUL, BlockParser::Empty),
        ServiceApi::new("subscribe", 100, SUBSCRIPTION, BlockParser::Empty),
        ServiceApi::new("unsubscribe", 10, HEAD, BlockParser::Empty),
    ]
}

fn default_rest_apis() -> Vec<ServiceApi> {
    vec![
        ServiceApi::new("/cosmos/base/tendermint/v1beta1/blocks/latest", 10, HEAD, latest())
            .with_connection_types(&["GET"]),
        ServiceApi::new(
            "/cosmos/base/tendermint/v1beta1/blocks/{height}",
            20,
            DETERMINISTIC,
            by_name("height", None),
        )
        .with_connection_types(&["GET"]),
        ServiceApi::new(
            "/cosmos/bank/v1beta1/balances/{address}",
            20,
            DETERMINISTIC,
            by_name("height", Some("latest")),
        )
        .with_connection_types(&["GET"]),
        ServiceApi::new("/cosmos/base/tendermint/v1beta1/node_info", 1, LOCAL, BlockParser::Empty)
            .with_connection_types(&["GET"]),
        ServiceApi::new("/cosmos/tx/v1beta1/txs/{hash}", 20, DETERMINISTIC, BlockParser::Empty)
            .with_connection_types(&["GET"]),
        ServiceApi::new("/cosmos/tx/v1beta1/txs", 20, STATEFUL, BlockParser::Empty)
            .with_connection_types(&["POST"]),
    ]
}
