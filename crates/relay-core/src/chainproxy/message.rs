use super::spec::ServiceApi;
use serde_json::Value;
use std::sync::Arc;

/// A client request normalized against the chain's API table.
#[derive(Debug, Clone)]
pub struct NodeMessage {
    api: Arc<ServiceApi>,
    requested_block: i64,
    params: Value,
    path: String,
    data: Vec<u8>,
}

impl NodeMessage {
    pub(crate) fn new(
        api: Arc<ServiceApi>,
        requested_block: i64,
        params: Value,
        path: String,
        data: Vec<u8>,
    ) -> Self {
        Self { api, requested_block, params, path, data }
    }

    #[must_use]
    pub fn service_api(&self) -> &ServiceApi {
        &self.api
    }

    /// Block hint parsed from the request, possibly a symbolic marker.
    #[must_use]
    pub fn requested_block(&self) -> i64 {
        self.requested_block
    }

    #[must_use]
    pub fn compute_units(&self) -> u64 {
        self.api.compute_units
    }

    #[must_use]
    pub fn is_subscription(&self) -> bool {
        self.api.category.subscription
    }

    #[must_use]
    pub fn params(&self) -> &Value {
        &self.params
    }

    /// Request path as received, including any query string.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw payload forwarded to the provider.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}
