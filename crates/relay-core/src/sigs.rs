//! Signing and signer recovery over relay payloads.
//!
//! Every payload is reduced to a keccak-256 digest over a length-prefixed transcript of its
//! fields. Signatures are 65-byte recoverable secp256k1 signatures, so verifying a payload
//! means recovering the signer address and comparing it with the expected identity.

use crate::types::{QosReport, RelayReply, RelayRequest, VrfData};
use alloy::{
    primitives::{Address, Keccak256, Signature, B256},
    signers::{local::PrivateKeySigner, SignerSync},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SigError {
    #[error("signing failed: {0}")]
    Signing(#[from] alloy::signers::Error),

    #[error("signature is missing")]
    Missing,

    #[error("invalid signature: {0}")]
    Invalid(String),
}

/// Length-prefixed keccak transcript. Each payload kind starts with its own domain tag so
/// a signature over one kind never verifies as another.
struct Transcript(Keccak256);

impl Transcript {
    fn new(domain: &[u8]) -> Self {
        let mut hasher = Keccak256::new();
        hasher.update(domain);
        Self(hasher)
    }

    fn bytes(&mut self, value: &[u8]) -> &mut Self {
        self.0.update((value.len() as u64).to_be_bytes());
        self.0.update(value);
        self
    }

    fn str(&mut self, value: &str) -> &mut Self {
        self.bytes(value.as_bytes())
    }

    fn u64(&mut self, value: u64) -> &mut Self {
        self.0.update(value.to_be_bytes());
        self
    }

    fn i64(&mut self, value: i64) -> &mut Self {
        self.0.update(value.to_be_bytes());
        self
    }

    fn bool(&mut self, value: bool) -> &mut Self {
        self.0.update([u8::from(value)]);
        self
    }

    fn qos(&mut self, report: Option<&QosReport>) -> &mut Self {
        match report {
            Some(report) => {
                self.bool(true);
                self.u64(report.latency.to_bits());
                self.u64(report.availability.to_bits());
                self.u64(report.sync.to_bits())
            }
            None => self.bool(false),
        }
    }

    fn finish(self) -> B256 {
        self.0.finalize()
    }
}

/// Digest of a [`VrfData`] payload, excluding its own signature.
#[must_use]
pub fn vrf_digest(vrf: &VrfData) -> B256 {
    let mut t = Transcript::new(b"relay/vrf-data");
    t.str(&vrf.chain_id)
        .u64(vrf.epoch)
        .bool(vrf.differentiator)
        .i64(vrf.request_block)
        .bytes(&vrf.vrf_value)
        .bytes(&vrf.vrf_proof)
        .bytes(&vrf.provider_sig)
        .bytes(&vrf.all_data_hash)
        .bytes(&vrf.query_hash);
    t.finish()
}

/// Digest of a [`RelayRequest`], excluding its own signature. An embedded VRF payload is
/// covered including its signature.
#[must_use]
pub fn relay_digest(request: &RelayRequest) -> B256 {
    let mut t = Transcript::new(b"relay/request");
    t.str(&request.provider)
        .str(&request.connection_type)
        .str(&request.api_url)
        .bytes(&request.data)
        .u64(request.session_id)
        .str(&request.chain_id)
        .u64(request.cu_sum)
        .i64(request.block_height)
        .u64(request.relay_num)
        .i64(request.request_block)
        .qos(request.qos_report.as_ref())
        .bytes(&request.unresponsive_providers);
    match &request.data_reliability {
        Some(vrf) => {
            t.bool(true).bytes(vrf_digest(vrf).as_slice()).bytes(&vrf.sig);
        }
        None => {
            t.bool(false);
        }
    }
    t.finish()
}

/// Digest a provider signs over its reply, bound to the request it answers.
#[must_use]
pub fn reply_digest(reply: &RelayReply, request: &RelayRequest) -> B256 {
    let mut t = Transcript::new(b"relay/reply");
    t.bytes(&reply.data)
        .u64(u64::from(reply.nonce))
        .i64(reply.latest_block)
        .bytes(relay_digest(request).as_slice());
    t.finish()
}

/// Digest a provider signs over its finalization data. The requesting consumer's address is
/// part of the digest, so the signature only verifies for that consumer.
#[must_use]
pub fn finalization_digest(reply: &RelayReply, request: &RelayRequest, consumer: Address) -> B256 {
    let mut t = Transcript::new(b"relay/finalization");
    t.i64(reply.latest_block)
        .bytes(&reply.finalized_blocks_hashes)
        .u64(request.session_id)
        .i64(request.block_height)
        .u64(request.relay_num)
        .bytes(consumer.as_slice());
    t.finish()
}

/// Digest the consumer signs to produce a VRF proof.
#[must_use]
pub fn vrf_input_digest(
    chain_id: &str,
    epoch: u64,
    request_block: i64,
    query_hash: &[u8],
    all_data_hash: &[u8],
    differentiator: bool,
) -> B256 {
    let mut t = Transcript::new(b"relay/vrf-input");
    t.str(chain_id)
        .u64(epoch)
        .i64(request_block)
        .bytes(query_hash)
        .bytes(all_data_hash)
        .bool(differentiator);
    t.finish()
}

/// Signs a prehashed digest, returning the 65-byte `r || s || v` encoding.
pub fn sign_digest(signer: &PrivateKeySigner, digest: &B256) -> Result<Vec<u8>, SigError> {
    let signature = signer.sign_hash_sync(digest)?;
    Ok(signature.as_bytes().to_vec())
}

/// Recovers the address that produced `sig` over `digest`.
pub fn recover_digest(sig: &[u8], digest: &B256) -> Result<Address, SigError> {
    if sig.is_empty() {
        return Err(SigError::Missing);
    }
    let signature = Signature::from_raw(sig).map_err(|e| SigError::Invalid(e.to_string()))?;
    signature
        .recover_address_from_prehash(digest)
        .map_err(|e| SigError::Invalid(e.to_string()))
}

pub fn sign_relay(signer: &PrivateKeySigner, request: &RelayRequest) -> Result<Vec<u8>, SigError> {
    sign_digest(signer, &relay_digest(request))
}

pub fn sign_vrf_data(signer: &PrivateKeySigner, vrf: &VrfData) -> Result<Vec<u8>, SigError> {
    sign_digest(signer, &vrf_digest(vrf))
}

pub fn sign_relay_reply(
    signer: &PrivateKeySigner,
    reply: &RelayReply,
    request: &RelayRequest,
) -> Result<Vec<u8>, SigError> {
    sign_digest(signer, &reply_digest(reply, request))
}

pub fn sign_finalization_data(
    signer: &PrivateKeySigner,
    reply: &RelayReply,
    request: &RelayRequest,
    consumer: Address,
) -> Result<Vec<u8>, SigError> {
    sign_digest(signer, &finalization_digest(reply, request, consumer))
}

pub fn recover_relay_signer(request: &RelayRequest) -> Result<Address, SigError> {
    recover_digest(&request.sig, &relay_digest(request))
}

pub fn recover_vrf_signer(vrf: &VrfData) -> Result<Address, SigError> {
    recover_digest(&vrf.sig, &vrf_digest(vrf))
}

pub fn recover_reply_signer(reply: &RelayReply, request: &RelayRequest) -> Result<Address, SigError> {
    recover_digest(&reply.sig, &reply_digest(reply, request))
}

pub fn recover_finalization_signer(
    reply: &RelayReply,
    request: &RelayRequest,
    consumer: Address,
) -> Result<Address, SigError> {
    recover_digest(&reply.sig_blocks, &finalization_digest(reply, request, consumer))
}
