use super::{jsonrpc::JsonRpcMessage, spec::ChainSpec, NodeMessage, ParseError};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Parser for Tendermint RPC, accepting both the JSON-RPC body form and the URI form
/// (`/block?height=5`).
#[derive(Debug, Clone)]
pub struct TendermintRpcParser {
    spec: Arc<ChainSpec>,
}

impl TendermintRpcParser {
    pub fn new(spec: Arc<ChainSpec>) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &ChainSpec {
        &self.spec
    }

    pub fn parse_msg(
        &self,
        url: &str,
        data: &[u8],
        connection_type: &str,
    ) -> Result<NodeMessage, ParseError> {
        let (method, params) = if data.iter().all(u8::is_ascii_whitespace) {
            parse_uri(url)?
        } else {
            let message = JsonRpcMessage::from_slice(data)?;
            (message.method, message.params)
        };

        let api = self.spec.get(&method).ok_or_else(|| ParseError::ApiNotSupported(method))?;
        if !api.accepts_connection_type(connection_type) {
            return Err(ParseError::UnsupportedConnectionType {
                api: api.name.clone(),
                connection_type: connection_type.to_string(),
            });
        }

        let requested_block = api.block_parsing.parse(&api.name, &params)?;
        Ok(NodeMessage::new(Arc::clone(api), requested_block, params, url.to_string(), data.to_vec()))
    }
}

/// Splits `/method?key=value&...` into the method name and an object of parameters.
/// Quoted values (`?hash="0xab"`) are unquoted.
fn parse_uri(url: &str) -> Result<(String, Value), ParseError> {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    let method = path.trim_matches('/');
    if method.is_empty() || method.contains('/') {
        return Err(ParseError::InvalidBody(format!("invalid tendermint uri: {url}")));
    }

    let mut params = Map::new();
    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = value.trim_matches('"');
        params.insert(key.to_string(), Value::String(value.to_string()));
    }
    Ok((method.to_string(), Value::Object(params)))
}
