use super::{
    spec::{ChainSpec, ServiceApi},
    NodeMessage, ParseError,
};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Parser for REST chains. API names are path templates whose `{var}` segments bind path
/// variables; query parameters are merged into the same parameter object.
#[derive(Debug, Clone)]
pub struct RestParser {
    spec: Arc<ChainSpec>,
}

impl RestParser {
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
        let (path, query) = url.split_once('?').unwrap_or((url, ""));
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let mut best: Option<(&Arc<ServiceApi>, usize, Map<String, Value>)> = None;
        for api in self.spec.iter() {
            if let Some((literals, vars)) = match_template(&api.name, &segments) {
                // literal segments outrank variables: /blocks/latest beats /blocks/{height}
                if best.as_ref().map_or(true, |(_, score, _)| literals > *score) {
                    best = Some((api, literals, vars));
                }
            }
        }
        let (api, _, mut params) =
            best.ok_or_else(|| ParseError::ApiNotSupported(path.to_string()))?;

        if !api.accepts_connection_type(connection_type) {
            return Err(ParseError::UnsupportedConnectionType {
                api: api.name.clone(),
                connection_type: connection_type.to_string(),
            });
        }

        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            params.entry(key.to_string()).or_insert_with(|| Value::String(value.to_string()));
        }
        let params = Value::Object(params);

        let requested_block = api.block_parsing.parse(&api.name, &params)?;
        Ok(NodeMessage::new(Arc::clone(api), requested_block, params, url.to_string(), data.to_vec()))
    }
}

/// Matches `segments` against a path template, returning the number of literal segments and
/// the bound variables.
fn match_template(template: &str, segments: &[&str]) -> Option<(usize, Map<String, Value>)> {
    let parts: Vec<&str> = template.split('/').filter(|s| !s.is_empty()).collect();
    if parts.len() != segments.len() {
        return None;
    }

    let mut literals = 0;
    let mut vars = Map::new();
    for (part, segment) in parts.iter().zip(segments) {
        match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
            Some(name) => {
                vars.insert(name.to_string(), Value::String((*segment).to_string()));
            }
            None if part == segment => literals += 1,
            None => return None,
        }
    }
    Some((literals, vars))
}
