//! Data-reliability selection and cross-provider comparison.
//!
//! After a primary reply verifies, the consumer derives a verifiable random value from its own
//! deterministic signature over the relay. The value decides whether a follow-up relay is sent
//! and which provider answers it, and the provider receiving the follow-up can recompute both.

use super::VerificationError;
use crate::{
    chainproxy::ServiceApi,
    sigs::{self, SigError},
    types::{RelayReply, RelayRequest, VrfData},
};
use alloy::{
    primitives::{keccak256, Address, Keccak256},
    signers::local::PrivateKeySigner,
};

/// Builds the unsigned VRF payload for a follow-up to `request`/`reply`, pinned to
/// `request_block`.
pub fn calculate_vrf(
    signer: &PrivateKeySigner,
    chain_id: &str,
    epoch: u64,
    request: &RelayRequest,
    reply: &RelayReply,
    request_block: i64,
    differentiator: bool,
) -> Result<VrfData, SigError> {
    let query_hash = query_hash(request);
    let all_data_hash = all_data_hash(&query_hash, reply);

    let input = sigs::vrf_input_digest(
        chain_id,
        epoch,
        request_block,
        &query_hash,
        &all_data_hash,
        differentiator,
    );
    let vrf_proof = sigs::sign_digest(signer, &input)?;
    let vrf_value = keccak256(&vrf_proof).to_vec();

    Ok(VrfData {
        chain_id: chain_id.to_string(),
        epoch,
        differentiator,
        request_block,
        vrf_value,
        vrf_proof,
        provider_sig: reply.sig.clone(),
        all_data_hash,
        query_hash,
        sig: Vec::new(),
    })
}

fn query_hash(request: &RelayRequest) -> Vec<u8> {
    let mut hasher = Keccak256::new();
    hasher.update(request.api_url.as_bytes());
    hasher.update(&request.data);
    hasher.finalize().to_vec()
}

fn all_data_hash(query_hash: &[u8], reply: &RelayReply) -> Vec<u8> {
    let mut hasher = Keccak256::new();
    hasher.update(query_hash);
    hasher.update(&reply.data);
    hasher.finalize().to_vec()
}

/// Checks that the VRF proof and the payload signature were produced by `consumer` and that the
/// value derives from the proof.
pub fn verify_vrf(vrf: &VrfData, consumer: Address) -> Result<(), VerificationError> {
    let input = sigs::vrf_input_digest(
        &vrf.chain_id,
        vrf.epoch,
        vrf.request_block,
        &vrf.query_hash,
        &vrf.all_data_hash,
        vrf.differentiator,
    );
    let prover = sigs::recover_digest(&vrf.vrf_proof, &input)
        .map_err(|source| VerificationError::InvalidSignature { context: "vrf proof", source })?;
    if prover != consumer {
        return Err(VerificationError::IdentityMismatch {
            context: "vrf proof",
            recovered: prover.to_string(),
            expected: consumer.to_string(),
        });
    }
    if keccak256(&vrf.vrf_proof).as_slice() != vrf.vrf_value.as_slice() {
        return Err(VerificationError::InvalidSignature {
            context: "vrf value",
            source: SigError::Invalid("value does not derive from proof".to_string()),
        });
    }

    let signer = sigs::recover_vrf_signer(vrf)
        .map_err(|source| VerificationError::InvalidSignature { context: "vrf data", source })?;
    if signer != consumer {
        return Err(VerificationError::IdentityMismatch {
            context: "vrf data",
            recovered: signer.to_string(),
            expected: consumer.to_string(),
        });
    }
    Ok(())
}

/// First four bytes of the VRF value, big-endian.
#[must_use]
pub fn threshold_value(vrf: &VrfData) -> u32 {
    match vrf.vrf_value.get(..4) {
        Some(bytes) => u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        None => u32::MAX,
    }
}

/// Whether the VRF value falls under the network's reliability threshold.
#[must_use]
pub fn should_check_reliability(vrf: &VrfData, threshold: u32) -> bool {
    threshold > 0 && threshold_value(vrf) <= threshold
}

/// Index of the provider that must answer the follow-up, or `None` with no providers.
#[must_use]
pub fn provider_index(vrf: &VrfData, providers: usize) -> Option<usize> {
    if providers == 0 {
        return None;
    }
    let tail = vrf.vrf_value.get(vrf.vrf_value.len().saturating_sub(8)..)?;
    let mut bytes = [0u8; 8];
    bytes[8 - tail.len()..].copy_from_slice(tail);
    Some((u64::from_be_bytes(bytes) % providers as u64) as usize)
}

/// Compares two authenticated replies to the same query. Returns the reason they conflict.
#[must_use]
pub fn detect_conflict(api: &ServiceApi, first: &RelayReply, second: &RelayReply) -> Option<String> {
    if api.category.deterministic && first.data != second.data {
        return Some(format!("{} returned different payloads", api.name));
    }

    let (Ok(first_hashes), Ok(second_hashes)) = (first.finalized_hashes(), second.finalized_hashes())
    else {
        return None;
    };
    first_hashes.iter().find_map(|(block, hash)| match second_hashes.get(block) {
        Some(other) if other != hash => {
            Some(format!("finalized hash mismatch at block {block}: {hash} vs {other}"))
        }
        _ => None,
    })
}
