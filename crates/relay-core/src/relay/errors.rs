use crate::{
    chainproxy::{ChainProxyError, ParseError},
    session::SessionError,
    sigs::SigError,
    transport::TransportError,
};
use std::time::Duration;
use thiserror::Error;

/// Why a reply failed authentication.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("malformed address {address}: {reason}")]
    MalformedAddress { address: String, reason: String },

    #[error("{context} signed by {recovered}, expected {expected}")]
    IdentityMismatch { context: &'static str, recovered: String, expected: String },

    #[error("{context} signature invalid: {source}")]
    InvalidSignature {
        context: &'static str,
        #[source]
        source: SigError,
    },
}

impl VerificationError {
    /// A malformed pairing address is a configuration fault, not provider misbehavior.
    #[must_use]
    pub fn is_malformed_address(&self) -> bool {
        matches!(self, Self::MalformedAddress { .. })
    }
}

/// Errors surfaced by [`send_relay`](super::send_relay).
///
/// Provider-attributable variants carry the provider address so the caller can deprioritize it.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("no available session: {0}")]
    NoAvailableSession(#[from] SessionError),

    #[error("signing failed: {0}")]
    Signing(#[from] SigError),

    #[error("relay to {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("relay to {provider} failed: {source}")]
    Transport {
        provider: String,
        #[source]
        source: TransportError,
    },

    #[error("reply from {provider} failed verification: {source}")]
    Verification {
        provider: String,
        #[source]
        source: VerificationError,
    },

    #[error(transparent)]
    UnsupportedInterface(#[from] ChainProxyError),

    #[error("relay cancelled")]
    Cancelled,
}

impl RelayError {
    /// Provider the error is attributed to, if any.
    #[must_use]
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::Timeout { provider, .. } |
            Self::Transport { provider, .. } |
            Self::Verification { provider, .. } => Some(provider),
            _ => None,
        }
    }

    /// Returns `true` if the caller may retry the relay with another provider.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Transport { .. } | Self::NoAvailableSession(_) => true,
            Self::Verification { source, .. } => !source.is_malformed_address(),
            _ => false,
        }
    }

    /// Returns `true` if the provider is at fault and should be deprioritized.
    #[must_use]
    pub fn should_penalize_provider(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Verification { source, .. } => !source.is_malformed_address(),
            Self::Transport { source, .. } => !matches!(source, TransportError::ConcurrencyLimit(_)),
            _ => false,
        }
    }

    /// Returns `true` for integrity failures, which must never be downgraded.
    #[must_use]
    pub fn is_verification(&self) -> bool {
        matches!(self, Self::Verification { .. })
    }

    /// Stable label for metrics and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parse(_) => "parse_error",
            Self::NoAvailableSession(_) => "no_available_session",
            Self::Signing(_) => "signing_error",
            Self::Timeout { .. } => "timeout",
            Self::Transport { .. } => "transport_error",
            Self::Verification { source: VerificationError::MalformedAddress { .. }, .. } => {
                "malformed_address"
            }
            Self::Verification { .. } => "verification_error",
            Self::UnsupportedInterface(_) => "unsupported_interface",
            Self::Cancelled => "cancelled",
        }
    }
}
