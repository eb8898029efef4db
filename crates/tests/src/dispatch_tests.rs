//! Integration tests for the two-phase relay dispatcher.
//!
//! These tests verify that:
//! - Healthy replies are authenticated and scored
//! - Replies signed by anyone but the leased provider are rejected
//! - Deadlines surface as timeouts and count against the session
//! - Every leased session is handed back exactly once, whatever the outcome

use crate::mock_infrastructure::{
    block_by_number, LeaseKind, NetworkOptions, ProviderBehavior, TestNetwork, BLOCK_NUMBER,
    EPOCH, SUBSCRIBE_HEADS,
};
use relay_core::{
    relay::{
        send_relay, RelayContext, RelayError, RelayResponse, ReliabilityStatus, VerificationError,
        DEFAULT_TIMEOUT,
    },
    session::{ConsumerSessionsWithProvider, Endpoint, SessionOutcome, MAX_CONSECUTIVE_FAILURES},
    transport::RelayTransport,
};
use std::{sync::Arc, time::Duration};

#[tokio::test]
async fn test_healthy_unary_relay_is_verified_and_scored() {
    let network = TestNetwork::new(NetworkOptions::default()).await;

    let response = network.relay(BLOCK_NUMBER).await.unwrap();
    let RelayResponse::Reply { provider, reply, reliability } = response else {
        panic!("expected a unary reply");
    };
    assert_eq!(provider, network.providers[0].address());
    assert_eq!(reply.latest_block, 1_000);
    assert!(matches!(reliability, ReliabilityStatus::NotRequested));

    let releases = network.manager.releases();
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].outcome, SessionOutcome::Success);
    assert_eq!(releases[0].answered_relays, 1);
    assert_eq!(releases[0].latest_block, 1_000);

    network.relay(BLOCK_NUMBER).await.unwrap();
    let releases = network.manager.releases();
    assert_eq!(releases[1].session_id, releases[0].session_id);
    assert_eq!(releases[1].answered_relays, releases[0].answered_relays + 1);
    assert_eq!(network.used_compute_units(), 20);
}

#[tokio::test]
async fn test_wrong_key_reply_is_rejected() {
    let options = NetworkOptions { behavior: ProviderBehavior::WrongKey, ..NetworkOptions::default() };
    let network = TestNetwork::new(options).await;

    let err = network.relay(BLOCK_NUMBER).await.unwrap_err();
    assert!(err.is_verification(), "expected verification error, got {err:?}");
    assert_eq!(err.provider(), Some(network.providers[0].address().as_str()));

    let releases = network.manager.releases();
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].outcome, SessionOutcome::Failure);
    assert_eq!(releases[0].answered_relays, 0);
    assert!(network.manager.is_balanced());
    assert_eq!(network.used_compute_units(), 0, "failed relay should be refunded");
}

#[tokio::test]
async fn test_foreign_finalization_rejected_when_comparing_hashes() {
    let options = NetworkOptions {
        behavior: ProviderBehavior::ForeignFinalization,
        compares_hashes: true,
        ..NetworkOptions::default()
    };
    let network = TestNetwork::new(options).await;

    let err = network.relay(BLOCK_NUMBER).await.unwrap_err();
    assert!(err.is_verification());
    assert!(network.manager.is_balanced());
}

#[tokio::test]
async fn test_foreign_finalization_accepted_without_hash_comparison() {
    let options = NetworkOptions {
        behavior: ProviderBehavior::ForeignFinalization,
        compares_hashes: false,
        ..NetworkOptions::default()
    };
    let network = TestNetwork::new(options).await;

    assert!(network.relay(BLOCK_NUMBER).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_deadline_exceeded_is_timeout() {
    let options = NetworkOptions {
        behavior: ProviderBehavior::Slow(Duration::from_secs(10)),
        relay_timeout: None,
        ..NetworkOptions::default()
    };
    let network = TestNetwork::new(options).await;

    match network.relay(BLOCK_NUMBER).await {
        Err(RelayError::Timeout { provider, timeout }) => {
            assert_eq!(provider, network.providers[0].address());
            assert_eq!(timeout, DEFAULT_TIMEOUT);
        }
        other => panic!("expected timeout, got {other:?}"),
    }

    let releases = network.manager.releases();
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].outcome, SessionOutcome::Failure);
    assert_eq!(releases[0].consecutive_timeouts, 1);
    assert_eq!(network.used_compute_units(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_timeouts_reset_on_answer() {
    let options = NetworkOptions {
        behavior: ProviderBehavior::Slow(Duration::from_secs(10)),
        relay_timeout: None,
        ..NetworkOptions::default()
    };
    let network = TestNetwork::new(options).await;

    for _ in 0..MAX_CONSECUTIVE_FAILURES - 1 {
        assert!(matches!(network.relay(BLOCK_NUMBER).await, Err(RelayError::Timeout { .. })));
    }
    assert_eq!(network.manager.releases().last().unwrap().consecutive_timeouts, 2);

    network.providers[0].set_behavior(ProviderBehavior::Healthy);
    network.relay(BLOCK_NUMBER).await.unwrap();

    let last = network.manager.releases().last().cloned().unwrap();
    assert_eq!(last.outcome, SessionOutcome::Success);
    assert_eq!(last.consecutive_timeouts, 0);
    assert_eq!(last.answered_relays, 1);
}

#[tokio::test]
async fn test_unreachable_provider_is_blocked_and_reported() {
    let consumer = alloy::signers::local::PrivateKeySigner::random();
    let unreachable = crate::mock_infrastructure::MockProvider::new(
        consumer.address(),
        ProviderBehavior::Unreachable,
    );
    let healthy =
        crate::mock_infrastructure::MockProvider::new(consumer.address(), ProviderBehavior::Healthy);
    let options = NetworkOptions { providers: 2, ..NetworkOptions::default() };
    let network = TestNetwork::with_providers(
        consumer,
        vec![Arc::clone(&unreachable), Arc::clone(&healthy)],
        &options,
    )
    .await;

    let mut transport_errors = 0;
    for _ in 0..10 {
        if network.manager.inner().is_blocked(&unreachable.address()) {
            break;
        }
        match network.relay(BLOCK_NUMBER).await {
            Ok(response) => assert_eq!(response.provider(), healthy.address()),
            Err(RelayError::Transport { provider, .. }) => {
                assert_eq!(provider, unreachable.address());
                transport_errors += 1;
            }
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(transport_errors, MAX_CONSECUTIVE_FAILURES);
    assert!(network.manager.inner().is_blocked(&unreachable.address()));

    network.relay(BLOCK_NUMBER).await.unwrap();
    let last = healthy.received().pop().unwrap();
    let reported: Vec<String> = serde_json::from_slice(&last.unresponsive_providers).unwrap();
    assert_eq!(reported, vec![unreachable.address()]);
    assert!(network.manager.is_balanced());
}

#[tokio::test]
async fn test_parse_error_never_leases() {
    let network = TestNetwork::new(NetworkOptions::default()).await;

    let err = network.relay(br#"{"jsonrpc":"2.0","id":1,"method":"debug_traceCall"}"#).await;
    assert!(matches!(err, Err(RelayError::Parse(_))));
    assert_eq!(network.manager.lease_count(), 0);
    assert!(network.providers[0].received().is_empty());
}

#[tokio::test]
async fn test_exhausted_budget_is_no_available_session() {
    let options = NetworkOptions { max_compute_units: 5, ..NetworkOptions::default() };
    let network = TestNetwork::new(options).await;

    let err = network.relay(BLOCK_NUMBER).await;
    assert!(matches!(err, Err(RelayError::NoAvailableSession(_))));
    assert_eq!(network.manager.lease_count(), 0);
}

#[tokio::test]
async fn test_cancelled_relay_releases_once() {
    let options = NetworkOptions {
        behavior: ProviderBehavior::Slow(Duration::from_secs(30)),
        relay_timeout: Some(Duration::from_secs(60)),
        ..NetworkOptions::default()
    };
    let network = TestNetwork::new(options).await;
    let (ctx, handle) = RelayContext::with_cancel();

    let (result, ()) = tokio::join!(
        send_relay(&ctx, &network.proxy, &network.consumer, "", BLOCK_NUMBER, "POST"),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        }
    );

    assert!(matches!(result, Err(RelayError::Cancelled)));
    let releases = network.manager.releases();
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].outcome, SessionOutcome::Aborted);
    assert!(network.manager.is_balanced());
    assert_eq!(network.used_compute_units(), 0);
    assert!(!network.manager.inner().is_blocked(&network.providers[0].address()));
}

#[tokio::test]
async fn test_dropped_relay_future_releases_once() {
    let options = NetworkOptions {
        behavior: ProviderBehavior::Slow(Duration::from_secs(30)),
        relay_timeout: Some(Duration::from_secs(60)),
        ..NetworkOptions::default()
    };
    let network = TestNetwork::new(options).await;

    let result = tokio::time::timeout(Duration::from_millis(50), network.relay(BLOCK_NUMBER)).await;
    assert!(result.is_err());

    let releases = network.manager.releases();
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].outcome, SessionOutcome::Aborted);
    assert_eq!(network.used_compute_units(), 0);
}

#[tokio::test]
async fn test_every_outcome_releases_exactly_once() {
    let behaviors = [
        ProviderBehavior::Healthy,
        ProviderBehavior::WrongKey,
        ProviderBehavior::ForeignFinalization,
        ProviderBehavior::Unreachable,
        ProviderBehavior::Slow(Duration::from_secs(2)),
    ];
    for behavior in behaviors {
        let options = NetworkOptions {
            behavior: behavior.clone(),
            relay_timeout: Some(Duration::from_millis(100)),
            ..NetworkOptions::default()
        };
        let network = TestNetwork::new(options).await;
        let _ = network.relay(BLOCK_NUMBER).await;

        assert_eq!(network.manager.lease_count(), 1, "{behavior:?}");
        assert_eq!(network.manager.releases_of(LeaseKind::Primary).len(), 1, "{behavior:?}");
        assert!(network.manager.is_balanced(), "{behavior:?}");
    }
}

#[tokio::test]
async fn test_subscription_streams_replies() {
    let network = TestNetwork::new(NetworkOptions::default()).await;

    let response = network.relay(SUBSCRIBE_HEADS).await.unwrap();
    assert!(response.reply().is_none());
    let RelayResponse::Subscription { provider, mut subscription } = response else {
        panic!("expected a subscription");
    };
    assert_eq!(provider, network.providers[0].address());

    let mut frames = 0;
    while let Some(item) = subscription.next().await {
        assert!(!item.unwrap().data.is_empty());
        frames += 1;
    }
    assert_eq!(frames, 3);

    let releases = network.manager.releases();
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].outcome, SessionOutcome::Success);
}

#[tokio::test]
async fn test_unreachable_subscription_is_transport_error() {
    let options =
        NetworkOptions { behavior: ProviderBehavior::Unreachable, ..NetworkOptions::default() };
    let network = TestNetwork::new(options).await;

    let err = network.relay(SUBSCRIBE_HEADS).await.unwrap_err();
    assert!(matches!(err, RelayError::Transport { .. }));
    assert_eq!(network.manager.releases()[0].outcome, SessionOutcome::Failure);
}

#[tokio::test]
async fn test_request_is_signed_by_consumer() {
    let network = TestNetwork::new(NetworkOptions::default()).await;
    network.relay(&block_by_number(0x10)).await.unwrap();

    let request = network.providers[0].received().pop().unwrap();
    let signer = relay_core::sigs::recover_relay_signer(&request).unwrap();
    assert_eq!(signer, network.consumer.address());
    assert_eq!(request.provider, network.providers[0].address());
    assert_eq!(request.request_block, 0x10);
    assert_eq!(request.block_height, EPOCH as i64);
    assert_eq!(request.cu_sum, 20);
}

#[tokio::test]
async fn test_malformed_pairing_address_is_not_held_against_provider() {
    const BAD_ADDRESS: &str = "0xnot-an-address";
    let network = TestNetwork::new(NetworkOptions::default()).await;
    let client = Arc::clone(&network.providers[0]) as Arc<dyn RelayTransport>;
    let pairing = ConsumerSessionsWithProvider::new(
        BAD_ADDRESS,
        vec![Endpoint::new("mock://provider", client)],
        10_000,
        EPOCH + 1,
    );
    network.proxy.update_all_providers(EPOCH + 1, vec![pairing]).await.unwrap();

    for _ in 0..=MAX_CONSECUTIVE_FAILURES {
        let err = network.relay(BLOCK_NUMBER).await.unwrap_err();
        assert!(
            matches!(
                err,
                RelayError::Verification { source: VerificationError::MalformedAddress { .. }, .. }
            ),
            "got {err:?}"
        );
        assert!(!err.is_retryable());
        assert!(!err.should_penalize_provider());
    }

    let releases = network.manager.releases();
    assert_eq!(releases.len(), (MAX_CONSECUTIVE_FAILURES + 1) as usize);
    assert!(releases.iter().all(|r| r.outcome == SessionOutcome::Aborted));
    assert!(!network.manager.inner().is_blocked(BAD_ADDRESS));
    assert_eq!(network.manager.inner().used_compute_units(BAD_ADDRESS), Some(0));
}
