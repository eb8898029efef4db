//! Relay envelope types exchanged between the consumer and providers.
//!
//! # Type Categories
//!
//! ## Signed Envelope
//! - [`RelayRequest`]: built and signed once per relay attempt by the consumer
//! - [`RelayReply`]: returned by a provider, untrusted until authenticated
//!
//! ## Embedded Payloads
//! - [`VrfData`]: data-reliability proof carried by the follow-up relay
//! - [`QosReport`]: the consumer's last computed quality report for the session
//!
//! ## Requested-Block Markers
//! Negative block numbers are symbolic (`latest`, `earliest`, ...). See
//! [`replace_requested_block`] for how they resolve against a provider's reply.
//!
//! Byte fields serialize as `0x`-prefixed hex so envelopes stay readable on the wire.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The request does not target a specific block.
pub const NOT_APPLICABLE: i64 = -1;
/// The most recent block known to the provider.
pub const LATEST_BLOCK: i64 = -2;
/// The genesis block.
pub const EARLIEST_BLOCK: i64 = -3;
/// The pending block.
pub const PENDING_BLOCK: i64 = -4;
/// The most recent safe head.
pub const SAFE_BLOCK: i64 = -5;
/// The most recent finalized block.
pub const FINALIZED_BLOCK: i64 = -6;

/// Resolves a symbolic requested block against the latest block a provider reported.
///
/// `latest`, `safe` and `finalized` collapse to the provider's latest block so a follow-up relay
/// can target the same concrete height. `earliest` becomes [`NOT_APPLICABLE`]. `pending` content
/// differs between providers, so it stays symbolic and is never cross-checked. Concrete heights
/// pass through unchanged.
#[must_use]
pub fn replace_requested_block(requested_block: i64, latest_block: i64) -> i64 {
    match requested_block {
        LATEST_BLOCK | SAFE_BLOCK | FINALIZED_BLOCK => latest_block,
        EARLIEST_BLOCK => NOT_APPLICABLE,
        other => other,
    }
}

/// Quality-of-service report a consumer computes for a session and embeds in its next request.
///
/// All three scores are in `[0.0, 1.0]`, higher is better.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QosReport {
    pub latency: f64,
    pub availability: f64,
    pub sync: f64,
}

/// Verifiable-random payload attached to a data-reliability relay.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VrfData {
    pub chain_id: String,
    pub epoch: u64,
    /// Selects the second candidate index when the first lands on the original provider.
    pub differentiator: bool,
    /// Block the follow-up relay is pinned to.
    pub request_block: i64,
    #[serde(with = "hex_bytes")]
    pub vrf_value: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub vrf_proof: Vec<u8>,
    /// Signature of the primary reply this check corroborates.
    #[serde(with = "hex_bytes")]
    pub provider_sig: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub all_data_hash: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub query_hash: Vec<u8>,
    #[serde(with = "hex_bytes", default)]
    pub sig: Vec<u8>,
}

/// Signed relay request sent from the consumer to a provider.
///
/// The signature in `sig` covers every other field, including the signature of an embedded
/// [`VrfData`] payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RelayRequest {
    pub provider: String,
    pub connection_type: String,
    pub api_url: String,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    /// `0` is reserved for data-reliability relays.
    pub session_id: u64,
    pub chain_id: String,
    pub cu_sum: u64,
    /// Epoch block height, pinned when the session was leased.
    pub block_height: i64,
    pub relay_num: u64,
    pub request_block: i64,
    #[serde(default)]
    pub qos_report: Option<QosReport>,
    #[serde(default)]
    pub data_reliability: Option<VrfData>,
    /// JSON-encoded list of provider addresses the consumer found unresponsive.
    #[serde(with = "hex_bytes", default)]
    pub unresponsive_providers: Vec<u8>,
    #[serde(with = "hex_bytes", default)]
    pub sig: Vec<u8>,
}

impl RelayRequest {
    /// Returns `true` once the request carries a signature.
    #[must_use]
    pub fn is_signed(&self) -> bool {
        !self.sig.is_empty()
    }

    /// Returns `true` for data-reliability follow-up relays.
    #[must_use]
    pub fn is_data_reliability(&self) -> bool {
        self.session_id == 0 && self.data_reliability.is_some()
    }
}

/// Reply returned by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RelayReply {
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    #[serde(with = "hex_bytes", default)]
    pub sig: Vec<u8>,
    #[serde(default)]
    pub nonce: u32,
    pub latest_block: i64,
    /// JSON object mapping block numbers to block hashes the provider considers final.
    #[serde(with = "hex_bytes", default)]
    pub finalized_blocks_hashes: Vec<u8>,
    /// Provider signature over the finalization data, bound to the requesting consumer.
    #[serde(with = "hex_bytes", default)]
    pub sig_blocks: Vec<u8>,
}

impl RelayReply {
    /// Decodes the finalized block hashes map. An empty field decodes to an empty map.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the field is present but malformed.
    pub fn finalized_hashes(&self) -> Result<BTreeMap<i64, String>, serde_json::Error> {
        if self.finalized_blocks_hashes.is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_slice(&self.finalized_blocks_hashes)
    }
}

/// Serde adapter encoding byte vectors as `0x`-prefixed hex strings.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(bytes: T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: AsRef<[u8]>,
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes.as_ref())))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let digits = encoded.strip_prefix("0x").unwrap_or(&encoded);
        hex::decode(digits).map_err(serde::de::Error::custom)
    }
}
