use super::{spec::ChainSpec, NodeMessage, ParseError};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// Body of a single JSON-RPC 2.0 request.
#[derive(Debug, Deserialize)]
pub(crate) struct JsonRpcMessage {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcMessage {
    pub(crate) fn from_slice(data: &[u8]) -> Result<Self, ParseError> {
        let trimmed = data.iter().position(|b| !b.is_ascii_whitespace()).map(|i| data[i]);
        if trimmed == Some(b'[') {
            return Err(ParseError::BatchNotSupported);
        }
        serde_json::from_slice(data).map_err(|e| ParseError::InvalidBody(e.to_string()))
    }
}

/// Parser for EVM-style JSON-RPC chains.
#[derive(Debug, Clone)]
pub struct JsonRpcParser {
    spec: Arc<ChainSpec>,
}

impl JsonRpcParser {
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
        let message = JsonRpcMessage::from_slice(data)?;
        let api = self
            .spec
            .get(&message.method)
            .ok_or_else(|| ParseError::ApiNotSupported(message.method.clone()))?;

        if !api.accepts_connection_type(connection_type) {
            return Err(ParseError::UnsupportedConnectionType {
                api: api.name.clone(),
                connection_type: connection_type.to_string(),
            });
        }

        let requested_block = api.block_parsing.parse(&api.name, &message.params)?;
        Ok(NodeMessage::new(
            Arc::clone(api),
            requested_block,
            message.params,
            url.to_string(),
            data.to_vec(),
        ))
    }
}
