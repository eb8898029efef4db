use super::VerificationError;
use crate::{
    sigs,
    types::{RelayReply, RelayRequest},
};
use alloy::primitives::Address;

/// Parses a provider address in `0x`-prefixed hex.
pub fn parse_address(address: &str) -> Result<Address, VerificationError> {
    address.parse::<Address>().map_err(|e| VerificationError::MalformedAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

/// Authenticates a provider reply against the request it answers.
///
/// The reply signature must recover to `provider_address`. With `compares_hashes`, the
/// finalization signature is recovered over finalization data bound to `consumer` and must
/// also recover to the provider, so finalization data issued for another consumer is rejected.
///
/// # Errors
///
/// - [`VerificationError::MalformedAddress`] if `provider_address` is not a valid address
/// - [`VerificationError::InvalidSignature`] if a signature is missing or unrecoverable
/// - [`VerificationError::IdentityMismatch`] if a signature recovers to anyone else
pub fn verify_relay_reply(
    reply: &RelayReply,
    request: &RelayRequest,
    provider_address: &str,
    consumer: Address,
    compares_hashes: bool,
) -> Result<(), VerificationError> {
    let expected = parse_address(provider_address)?;

    let server = sigs::recover_reply_signer(reply, request)
        .map_err(|source| VerificationError::InvalidSignature { context: "reply", source })?;
    if server != expected {
        return Err(VerificationError::IdentityMismatch {
            context: "reply",
            recovered: server.to_string(),
            expected: expected.to_string(),
        });
    }

    if compares_hashes {
        let finalizer = sigs::recover_finalization_signer(reply, request, consumer).map_err(
            |source| VerificationError::InvalidSignature { context: "finalization data", source },
        )?;
        if finalizer != expected {
            return Err(VerificationError::IdentityMismatch {
                context: "finalization data",
                recovered: finalizer.to_string(),
                expected: expected.to_string(),
            });
        }
    }

    Ok(())
}
