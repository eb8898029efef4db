//! Integration tests for QoS reporting.
//!
//! A session's QoS report is computed when a reply authenticates and travels to the provider
//! in the session's next request.

use crate::mock_infrastructure::{NetworkOptions, ProviderBehavior, TestNetwork, BLOCK_NUMBER};
use relay_core::relay::RelayError;
use std::time::Duration;

#[tokio::test]
#[allow(clippy::float_cmp)]
async fn test_report_travels_in_next_request() {
    let network = TestNetwork::new(NetworkOptions::default()).await;

    network.relay(BLOCK_NUMBER).await.unwrap();
    network.relay(BLOCK_NUMBER).await.unwrap();

    let received = network.providers[0].received();
    assert_eq!(received.len(), 2);
    assert!(received[0].qos_report.is_none(), "a fresh session has nothing to report");

    let report = received[1].qos_report.expect("second request carries the first report");
    assert_eq!(report.availability, 1.0);
    assert_eq!(report.sync, 1.0);
    assert!((0.0..=1.0).contains(&report.latency));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_lowers_availability() {
    let options = NetworkOptions {
        relay_timeout: Some(Duration::from_secs(1)),
        ..NetworkOptions::default()
    };
    let network = TestNetwork::new(options).await;
    let provider = &network.providers[0];

    network.relay(BLOCK_NUMBER).await.unwrap();
    provider.set_behavior(ProviderBehavior::Slow(Duration::from_secs(5)));
    assert!(matches!(network.relay(BLOCK_NUMBER).await, Err(RelayError::Timeout { .. })));
    provider.set_behavior(ProviderBehavior::Healthy);
    network.relay(BLOCK_NUMBER).await.unwrap();
    network.relay(BLOCK_NUMBER).await.unwrap();

    let received = provider.received();
    let before = received[1].qos_report.unwrap();
    let after = received[3].qos_report.unwrap();
    assert!(
        after.availability < before.availability,
        "availability should drop after a timeout: {} -> {}",
        before.availability,
        after.availability
    );
}

#[tokio::test]
#[allow(clippy::float_cmp)]
async fn test_lagging_provider_loses_sync() {
    let network = TestNetwork::new(NetworkOptions::default()).await;
    network.sentry.set_expected_block_height(2_000, 2);

    network.relay(BLOCK_NUMBER).await.unwrap();
    network.relay(BLOCK_NUMBER).await.unwrap();

    let report = network.providers[0].received()[1].qos_report.unwrap();
    assert_eq!(report.sync, 0.0);
}

#[tokio::test]
async fn test_failed_relay_produces_no_report() {
    let options =
        NetworkOptions { behavior: ProviderBehavior::WrongKey, ..NetworkOptions::default() };
    let network = TestNetwork::new(options).await;

    assert!(network.relay(BLOCK_NUMBER).await.is_err());
    assert!(network.relay(BLOCK_NUMBER).await.is_err());

    let received = network.providers[0].received();
    assert!(received.iter().all(|request| request.qos_report.is_none()));
}
