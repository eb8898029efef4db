//! Two-phase relay dispatch.
//!
//! ```text
//! PARSE -> LEASE -> BUILD -> SEND -> { SUBSCRIBE | VERIFY -> SCORE }
//!       -> [ BUILD_RELIABILITY -> SEND_RELIABILITY -> VERIFY_RELIABILITY ] -> RELEASE
//! ```
//!
//! Every leased session is wrapped in a [`SessionRelease`] guard, so it goes back to the
//! session manager exactly once whichever way the relay ends, including when the caller
//! cancels or drops the future.

use super::{
    builder::RelayRequestBuilder, reliability, verify::verify_relay_reply, RelayContext, RelayError,
};
use crate::{
    chainproxy::{ChainProxy, NodeMessage},
    metrics,
    session::{SessionLease, SessionManager, SessionOutcome},
    transport::{RelaySubscription, RelayTransport},
    types::{replace_requested_block, RelayReply, RelayRequest},
};
use alloy::signers::local::PrivateKeySigner;
use std::{
    collections::HashSet,
    ops::{Deref, DerefMut},
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, warn};

/// Successful outcome of [`send_relay`].
#[derive(Debug)]
pub enum RelayResponse {
    /// An authenticated reply, with the outcome of the data-reliability follow-up.
    Reply { provider: String, reply: RelayReply, reliability: ReliabilityStatus },
    /// An open subscription. Replies are streamed unverified, as the provider sends them.
    Subscription { provider: String, subscription: RelaySubscription },
}

impl RelayResponse {
    #[must_use]
    pub fn provider(&self) -> &str {
        match self {
            Self::Reply { provider, .. } | Self::Subscription { provider, .. } => provider,
        }
    }

    #[must_use]
    pub fn reply(&self) -> Option<&RelayReply> {
        match self {
            Self::Reply { reply, .. } => Some(reply),
            Self::Subscription { .. } => None,
        }
    }

    #[must_use]
    pub fn reliability(&self) -> Option<&ReliabilityStatus> {
        match self {
            Self::Reply { reliability, .. } => Some(reliability),
            Self::Subscription { .. } => None,
        }
    }
}

/// Outcome of the data-reliability follow-up. Never invalidates the primary reply.
#[derive(Debug)]
pub enum ReliabilityStatus {
    /// The API is not eligible for reliability checks.
    NotRequested,
    /// Eligible, but no follow-up was sent.
    Skipped(&'static str),
    /// A second provider returned a matching, authenticated reply.
    Verified { provider: String },
    /// Both replies authenticated but disagree.
    Conflict { provider: String, reason: String },
    /// The follow-up failed. The error names the provider when one is at fault.
    Failed(RelayError),
}

impl ReliabilityStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRequested => "not_requested",
            Self::Skipped(_) => "skipped",
            Self::Verified { .. } => "verified",
            Self::Conflict { .. } => "conflict",
            Self::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeaseKind {
    Primary,
    Reliability,
}

/// Returns a lease to its manager on drop, with the last recorded verdict.
///
/// Until a verdict is recorded the lease is returned as [`SessionOutcome::Aborted`].
struct SessionRelease {
    manager: Arc<dyn SessionManager>,
    kind: LeaseKind,
    lease: Option<SessionLease>,
    latest_block: i64,
    outcome: SessionOutcome,
}

impl SessionRelease {
    fn new(manager: Arc<dyn SessionManager>, kind: LeaseKind, lease: SessionLease) -> Self {
        let latest_block = lease.session.latest_block;
        Self { manager, kind, lease: Some(lease), latest_block, outcome: SessionOutcome::Aborted }
    }

    fn succeed(&mut self, latest_block: i64) {
        self.latest_block = latest_block;
        self.outcome = SessionOutcome::Success;
    }

    fn fail(&mut self) {
        self.outcome = SessionOutcome::Failure;
    }
}

impl Deref for SessionRelease {
    type Target = SessionLease;

    fn deref(&self) -> &SessionLease {
        match &self.lease {
            Some(lease) => lease,
            None => unreachable!("lease is only taken on drop"),
        }
    }
}

impl DerefMut for SessionRelease {
    fn deref_mut(&mut self) -> &mut SessionLease {
        match &mut self.lease {
            Some(lease) => lease,
            None => unreachable!("lease is only taken on drop"),
        }
    }
}

impl Drop for SessionRelease {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        debug!(
            provider = %lease.provider_address,
            session_id = lease.session.session_id,
            outcome = self.outcome.as_str(),
            latest_block = self.latest_block,
            "session released"
        );
        match self.kind {
            LeaseKind::Primary => {
                self.manager.on_session_done(lease, self.latest_block, self.outcome);
            }
            LeaseKind::Reliability => {
                self.manager.on_data_reliability_session_done(lease, self.latest_block, self.outcome);
            }
        }
    }
}

/// State carried from the primary relay into the follow-up.
struct RelayAttempt<'a> {
    message: &'a NodeMessage,
    url: &'a str,
    connection_type: &'a str,
    chain_id: &'a str,
    epoch: u64,
    /// Pinned when the session is leased and reused by the follow-up.
    block_height: i64,
    /// The message's block hint, resolved against the primary reply once it verifies.
    requested_block: i64,
}

/// Relays a raw client request through the chain proxy.
///
/// Parses the request, leases a session, sends a signed relay to the session's provider and
/// authenticates the reply. Eligible replies are corroborated by a second, VRF-selected
/// provider. The leased sessions are returned on every path.
///
/// # Errors
///
/// See [`RelayError`]. A reply that fails authentication is never returned.
pub async fn send_relay(
    ctx: &RelayContext,
    chain_proxy: &ChainProxy,
    signer: &PrivateKeySigner,
    url: &str,
    request: &[u8],
    connection_type: &str,
) -> Result<RelayResponse, RelayError> {
    let started = Instant::now();
    let result = tokio::select! {
        biased;
        () = ctx.cancelled() => Err(RelayError::Cancelled),
        result = dispatch(chain_proxy, signer, url, request, connection_type) => result,
    };

    let chain_id = chain_proxy.sentry().chain_id();
    match &result {
        Ok(response) => {
            metrics::record_relay(chain_id, Some(response.provider()), "success", started.elapsed());
        }
        Err(err) => {
            debug!(error = %err, kind = err.as_str(), "relay failed");
            metrics::record_relay(chain_id, err.provider(), err.as_str(), started.elapsed());
        }
    }
    result
}

async fn dispatch(
    chain_proxy: &ChainProxy,
    signer: &PrivateKeySigner,
    url: &str,
    data: &[u8],
    connection_type: &str,
) -> Result<RelayResponse, RelayError> {
    let message = chain_proxy.parse_msg(url, data, connection_type)?;
    let sentry = chain_proxy.sentry();
    let manager = chain_proxy.session_manager();

    let lease = manager.get_session(message.compute_units(), &HashSet::new()).await?;
    let mut primary = SessionRelease::new(Arc::clone(manager), LeaseKind::Primary, lease);
    let provider = primary.provider_address.clone();

    let mut attempt = RelayAttempt {
        message: &message,
        url,
        connection_type,
        chain_id: sentry.chain_id(),
        epoch: primary.epoch,
        block_height: i64::try_from(primary.epoch).unwrap_or(i64::MAX),
        requested_block: message.requested_block(),
    };

    let request = RelayRequestBuilder::new(attempt.chain_id, url, connection_type, message.data())
        .provider(&provider)
        .session(&primary.session)
        .block_height(attempt.block_height)
        .request_block(message.requested_block())
        .unresponsive_providers(primary.reported_providers.clone())
        .sign(signer)?;
    let client = Arc::clone(&primary.endpoint.client);
    primary.session.qos_info.record_sent();

    debug!(
        provider = %provider,
        session_id = request.session_id,
        relay_num = request.relay_num,
        api = %message.service_api().name,
        "sending relay"
    );

    if message.is_subscription() {
        return match client.relay_subscribe(&request).await {
            Ok(subscription) => {
                let latest_block = primary.session.latest_block;
                primary.succeed(latest_block);
                Ok(RelayResponse::Subscription { provider, subscription })
            }
            Err(source) => {
                primary.fail();
                Err(RelayError::Transport { provider, source })
            }
        };
    }

    let (reply, latency) =
        send_unary(client.as_ref(), &request, chain_proxy.relay_timeout(), &mut primary).await?;

    if let Err(source) =
        verify_relay_reply(&reply, &request, &provider, signer.address(), sentry.compares_hashes())
    {
        warn!(provider = %provider, error = %source, "relay reply failed verification");
        if !source.is_malformed_address() {
            primary.fail();
        }
        return Err(RelayError::Verification { provider, source });
    }

    attempt.requested_block = replace_requested_block(request.request_block, reply.latest_block);

    let (expected_block_height, providers_with_height) = sentry.expected_block_height();
    let report = primary.session.qos_info.calculate_qos(
        message.compute_units(),
        latency,
        expected_block_height.saturating_sub(reply.latest_block),
        providers_with_height,
        sentry.providers_count(),
    );
    metrics::record_qos(&provider, &report);
    sentry.record_provider_block(&provider, reply.latest_block);
    primary.succeed(reply.latest_block);

    let reliability = if message.service_api().category.data_reliability {
        match send_reliability(&attempt, chain_proxy, signer, &provider, &request, &reply).await {
            Ok(status) => status,
            Err(err) => {
                warn!(error = %err, "data reliability relay failed");
                ReliabilityStatus::Failed(err)
            }
        }
    } else {
        ReliabilityStatus::NotRequested
    };
    metrics::record_reliability(attempt.chain_id, reliability.as_str());

    drop(primary);
    Ok(RelayResponse::Reply { provider, reply, reliability })
}

/// Sends a unary relay bounded by `timeout`, recording failures on the leased session.
async fn send_unary(
    client: &dyn RelayTransport,
    request: &RelayRequest,
    timeout: Duration,
    release: &mut SessionRelease,
) -> Result<(RelayReply, Duration), RelayError> {
    let sent_at = Instant::now();
    match tokio::time::timeout(timeout, client.relay(request)).await {
        Ok(Ok(reply)) => Ok((reply, sent_at.elapsed())),
        Ok(Err(source)) if !source.is_timeout() => {
            release.fail();
            Err(RelayError::Transport { provider: release.provider_address.clone(), source })
        }
        Ok(Err(_)) | Err(_) => {
            release.session.qos_info.record_timeout();
            release.fail();
            Err(RelayError::Timeout { provider: release.provider_address.clone(), timeout })
        }
    }
}

async fn send_reliability(
    attempt: &RelayAttempt<'_>,
    chain_proxy: &ChainProxy,
    signer: &PrivateKeySigner,
    original_provider: &str,
    primary_request: &RelayRequest,
    primary_reply: &RelayReply,
) -> Result<ReliabilityStatus, RelayError> {
    if attempt.requested_block < 0 {
        return Ok(ReliabilityStatus::Skipped("requested block not applicable"));
    }
    let sentry = chain_proxy.sentry();
    let manager = chain_proxy.session_manager();

    let vrf_for = |differentiator: bool| {
        reliability::calculate_vrf(
            signer,
            attempt.chain_id,
            attempt.epoch,
            primary_request,
            primary_reply,
            attempt.requested_block,
            differentiator,
        )
    };

    let first = vrf_for(false)?;
    if !reliability::should_check_reliability(&first, sentry.data_reliability_threshold()) {
        return Ok(ReliabilityStatus::Skipped("vrf above threshold"));
    }

    // The flipped VRF is only signed once the first index lands on the original provider.
    let mut vrf = first;
    let lease = loop {
        let Some(index) = reliability::provider_index(&vrf, sentry.providers_count()) else {
            return Ok(ReliabilityStatus::Skipped("no providers"));
        };
        match manager.get_data_reliability_session(original_provider, index, attempt.epoch).await {
            Ok(lease) => break lease,
            Err(err) if err.is_index_conflict() && !vrf.differentiator => vrf = vrf_for(true)?,
            Err(err) if err.is_index_conflict() => {
                return Ok(ReliabilityStatus::Skipped("vrf selected the original provider"));
            }
            Err(err) => {
                debug!(error = %err, index = index, "no data reliability session");
                return Ok(ReliabilityStatus::Skipped("no reliability session"));
            }
        }
    };

    let mut release = SessionRelease::new(Arc::clone(manager), LeaseKind::Reliability, lease);
    let provider = release.provider_address.clone();

    let request = RelayRequestBuilder::new(
        attempt.chain_id,
        attempt.url,
        attempt.connection_type,
        attempt.message.data(),
    )
    .provider(&provider)
    .reliability_session(&release.session, vrf)
    .block_height(attempt.block_height)
    .sign(signer)?;
    let client = Arc::clone(&release.endpoint.client);
    release.session.qos_info.record_sent();

    debug!(
        provider = %provider,
        original_provider = original_provider,
        request_block = request.request_block,
        "sending data reliability relay"
    );

    let (reply, _latency) =
        send_unary(client.as_ref(), &request, chain_proxy.relay_timeout(), &mut release).await?;

    if let Err(source) = verify_relay_reply(&reply, &request, &provider, signer.address(), true) {
        warn!(provider = %provider, error = %source, "data reliability reply failed verification");
        if !source.is_malformed_address() {
            release.fail();
        }
        return Err(RelayError::Verification { provider, source });
    }
    release.succeed(reply.latest_block);

    if let Some(reason) =
        reliability::detect_conflict(attempt.message.service_api(), primary_reply, &reply)
    {
        warn!(
            provider = %provider,
            original_provider = original_provider,
            reason = %reason,
            "data reliability conflict"
        );
        return Ok(ReliabilityStatus::Conflict { provider, reason });
    }

    Ok(ReliabilityStatus::Verified { provider })
}
