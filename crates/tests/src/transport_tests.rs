//! Transport tests against a provider served over HTTP and WebSocket.

use crate::mock_infrastructure::{
    MockProvider, MockRelayServer, ProviderBehavior, BLOCK_NUMBER, EPOCH, SUBSCRIBE_HEADS,
};
use alloy::signers::local::PrivateKeySigner;
use relay_core::{
    chainproxy::{get_chain_proxy, ChainProxy},
    relay::{
        send_relay, verify_relay_reply, RelayContext, RelayError, RelayRequestBuilder,
        RelayResponse,
    },
    sentry::{NetworkDirectory, Sentry},
    session::{
        ConsumerSessionManager, ConsumerSessionsWithProvider, Endpoint, SessionManager,
        SingleConsumerSession,
    },
    transport::{HttpRelayTransport, HttpTransportConfig, RelayTransport, TransportError},
    types::RelayRequest,
};
use std::sync::Arc;

fn signed_request(consumer: &PrivateKeySigner, provider: &str) -> RelayRequest {
    let mut session = SingleConsumerSession::new(1);
    session.prepare_relay(10);
    RelayRequestBuilder::new("ETH1", "", "POST", BLOCK_NUMBER)
        .provider(provider)
        .session(&session)
        .block_height(EPOCH as i64)
        .sign(consumer)
        .unwrap()
}

#[tokio::test]
async fn test_http_relay_round_trip_verifies() {
    let consumer = PrivateKeySigner::random();
    let server =
        MockRelayServer::start(MockProvider::new(consumer.address(), ProviderBehavior::Healthy))
            .await
            .unwrap();
    let provider = server.provider().address();

    let transport = HttpRelayTransport::new(&server.url(), HttpTransportConfig::default()).unwrap();
    let request = signed_request(&consumer, &provider);
    let reply = transport.relay(&request).await.unwrap();

    assert_eq!(reply.latest_block, 1_000);
    verify_relay_reply(&reply, &request, &provider, consumer.address(), true).unwrap();
    assert_eq!(server.provider().received(), vec![request]);
}

#[tokio::test]
async fn test_http_error_status_surfaces() {
    let consumer = PrivateKeySigner::random();
    let server = MockRelayServer::start(MockProvider::new(
        consumer.address(),
        ProviderBehavior::Unreachable,
    ))
    .await
    .unwrap();

    let transport = HttpRelayTransport::new(&server.url(), HttpTransportConfig::default()).unwrap();
    let result = transport.relay(&signed_request(&consumer, "0xprovider")).await;
    assert!(matches!(result, Err(TransportError::HttpError(503, _))));
}

#[tokio::test]
async fn test_stopped_server_is_connection_failure() {
    let consumer = PrivateKeySigner::random();
    let server =
        MockRelayServer::start(MockProvider::new(consumer.address(), ProviderBehavior::Healthy))
            .await
            .unwrap();
    let url = server.url();
    server.shutdown();
    drop(server);
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let transport = HttpRelayTransport::new(&url, HttpTransportConfig::default()).unwrap();
    let result = transport.relay(&signed_request(&consumer, "0xprovider")).await;
    assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
}

#[tokio::test]
async fn test_websocket_subscription_streams_signed_frames() {
    let consumer = PrivateKeySigner::random();
    let server =
        MockRelayServer::start(MockProvider::new(consumer.address(), ProviderBehavior::Healthy))
            .await
            .unwrap();
    let provider = server.provider().address();

    let transport = HttpRelayTransport::new(&server.url(), HttpTransportConfig::default()).unwrap();
    let request = signed_request(&consumer, &provider);
    let mut subscription = transport.relay_subscribe(&request).await.unwrap();

    let mut frames = Vec::new();
    while let Some(item) = subscription.next().await {
        frames.push(item.unwrap());
    }
    assert_eq!(frames.len(), 3);
    for reply in &frames {
        verify_relay_reply(reply, &request, &provider, consumer.address(), true).unwrap();
    }
    assert_ne!(frames[0].data, frames[1].data);
    assert_eq!(server.subscriptions(), 1);
}

/// Pairs the consumer with one provider reachable only over the network.
async fn networked_proxy(server: &MockRelayServer) -> ChainProxy {
    let sentry = Arc::new(Sentry::new("ETH1", "jsonrpc", true, 0));
    sentry.set_providers(1);
    let manager = Arc::new(ConsumerSessionManager::new());
    let proxy = get_chain_proxy(
        "http://node.test",
        2,
        sentry as Arc<dyn NetworkDirectory>,
        manager as Arc<dyn SessionManager>,
    )
    .unwrap();

    let client = proxy.connect(&server.url()).unwrap();
    let endpoint = Endpoint::new(server.url(), client);
    let provider = ConsumerSessionsWithProvider::new(
        server.provider().address(),
        vec![endpoint],
        1_000,
        EPOCH,
    );
    proxy.update_all_providers(EPOCH, vec![provider]).await.unwrap();
    proxy
}

#[tokio::test]
async fn test_send_relay_over_http() {
    let consumer = PrivateKeySigner::random();
    let server =
        MockRelayServer::start(MockProvider::new(consumer.address(), ProviderBehavior::Healthy))
            .await
            .unwrap();
    let proxy = networked_proxy(&server).await;

    let response =
        send_relay(&RelayContext::background(), &proxy, &consumer, "", BLOCK_NUMBER, "POST")
            .await
            .unwrap();
    assert_eq!(response.provider(), server.provider().address());
    assert_eq!(response.reply().map(|r| r.latest_block), Some(1_000));
}

#[tokio::test]
async fn test_send_relay_over_http_rejects_wrong_key() {
    let consumer = PrivateKeySigner::random();
    let server =
        MockRelayServer::start(MockProvider::new(consumer.address(), ProviderBehavior::WrongKey))
            .await
            .unwrap();
    let proxy = networked_proxy(&server).await;

    let err = send_relay(&RelayContext::background(), &proxy, &consumer, "", BLOCK_NUMBER, "POST")
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::Verification { .. }));
}

#[tokio::test]
async fn test_send_relay_subscription_over_websocket() {
    let consumer = PrivateKeySigner::random();
    let server =
        MockRelayServer::start(MockProvider::new(consumer.address(), ProviderBehavior::Healthy))
            .await
            .unwrap();
    let proxy = networked_proxy(&server).await;

    let response =
        send_relay(&RelayContext::background(), &proxy, &consumer, "", SUBSCRIBE_HEADS, "POST")
            .await
            .unwrap();
    let RelayResponse::Subscription { mut subscription, .. } = response else {
        panic!("expected a subscription");
    };

    let mut frames = 0;
    while let Some(item) = subscription.next().await {
        item.unwrap();
        frames += 1;
    }
    assert_eq!(frames, 3);
}
