use crate::{
    session::{SingleConsumerSession, DATA_RELIABILITY_SESSION_ID},
    sigs::{self, SigError},
    types::{RelayRequest, VrfData, NOT_APPLICABLE},
};
use alloy::signers::local::PrivateKeySigner;

/// Assembles a [`RelayRequest`] field by field and signs it.
///
/// Nothing built here is sendable until [`sign`](Self::sign) succeeds.
#[derive(Debug, Clone)]
pub struct RelayRequestBuilder {
    request: RelayRequest,
}

impl RelayRequestBuilder {
    pub fn new(chain_id: &str, api_url: &str, connection_type: &str, data: &[u8]) -> Self {
        Self {
            request: RelayRequest {
                chain_id: chain_id.to_string(),
                api_url: api_url.to_string(),
                connection_type: connection_type.to_string(),
                data: data.to_vec(),
                request_block: NOT_APPLICABLE,
                ..RelayRequest::default()
            },
        }
    }

    #[must_use]
    pub fn provider(mut self, provider: &str) -> Self {
        self.request.provider = provider.to_string();
        self
    }

    /// Binds the request to a primary session, embedding its last QoS report.
    #[must_use]
    pub fn session(mut self, session: &SingleConsumerSession) -> Self {
        self.request.session_id = session.session_id;
        self.request.cu_sum = session.cu_sum;
        self.request.relay_num = session.relay_num;
        self.request.qos_report = session.qos_info.last_qos_report;
        self
    }

    /// Binds the request to a data-reliability session. These never carry a QoS report.
    #[must_use]
    pub fn reliability_session(mut self, session: &SingleConsumerSession, vrf: VrfData) -> Self {
        self.request.session_id = DATA_RELIABILITY_SESSION_ID;
        self.request.cu_sum = session.cu_sum;
        self.request.relay_num = session.relay_num;
        self.request.qos_report = None;
        self.request.request_block = vrf.request_block;
        self.request.data_reliability = Some(vrf);
        self
    }

    #[must_use]
    pub fn block_height(mut self, block_height: i64) -> Self {
        self.request.block_height = block_height;
        self
    }

    #[must_use]
    pub fn request_block(mut self, request_block: i64) -> Self {
        self.request.request_block = request_block;
        self
    }

    #[must_use]
    pub fn unresponsive_providers(mut self, reported: Vec<u8>) -> Self {
        self.request.unresponsive_providers = reported;
        self
    }

    /// Signs the request. An embedded VRF payload is signed first, so the request signature
    /// covers it.
    ///
    /// # Errors
    ///
    /// Returns [`SigError`] if either signature cannot be produced.
    pub fn sign(mut self, signer: &PrivateKeySigner) -> Result<RelayRequest, SigError> {
        if let Some(vrf) = self.request.data_reliability.as_mut() {
            if vrf.sig.is_empty() {
                vrf.sig = sigs::sign_vrf_data(signer, vrf)?;
            }
        }
        self.request.sig = sigs::sign_relay(signer, &self.request)?;
        Ok(self.request)
    }
}
