//! Mock provider relay server
//!
//! Serves a [`MockProvider`] over the provider wire protocol so the HTTP and WebSocket
//! transports can be exercised end to end.

use super::provider_mock::{MockProvider, ProviderBehavior};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use relay_core::types::RelayRequest;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::{net::TcpListener, task::JoinHandle};

#[derive(Clone)]
struct ServerState {
    provider: Arc<MockProvider>,
    subscriptions: Arc<AtomicUsize>,
}

/// A provider endpoint on a random local port.
pub struct MockRelayServer {
    addr: SocketAddr,
    provider: Arc<MockProvider>,
    subscriptions: Arc<AtomicUsize>,
    server_handle: JoinHandle<()>,
}

impl MockRelayServer {
    /// Starts serving `provider` on `127.0.0.1:0`.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind.
    pub async fn start(provider: Arc<MockProvider>) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let subscriptions = Arc::new(AtomicUsize::new(0));

        let state =
            ServerState { provider: Arc::clone(&provider), subscriptions: Arc::clone(&subscriptions) };
        let router = Router::new()
            .route("/relay", post(handle_relay))
            .route("/relay/subscribe", get(handle_subscribe))
            .with_state(state);

        let server_handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Ok(Self { addr, provider, subscriptions, server_handle })
    }

    /// Base URL a transport should be pointed at.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<MockProvider> {
        &self.provider
    }

    /// Number of subscription requests the server accepted.
    #[must_use]
    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::Acquire)
    }

    pub fn shutdown(&self) {
        self.server_handle.abort();
    }
}

impl Drop for MockRelayServer {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

async fn handle_relay(State(state): State<ServerState>, Json(request): Json<RelayRequest>) -> Response {
    use relay_core::transport::RelayTransport;

    if state.provider.behavior() == ProviderBehavior::Unreachable {
        return (StatusCode::SERVICE_UNAVAILABLE, "provider unavailable").into_response();
    }
    match state.provider.relay(&request).await {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn handle_subscribe(State(state): State<ServerState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| stream_replies(socket, state))
}

async fn stream_replies(mut socket: WebSocket, state: ServerState) {
    let request = loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<RelayRequest>(text.as_str()) {
                Ok(request) => break request,
                Err(_) => return,
            },
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return,
        }
    };
    state.subscriptions.fetch_add(1, Ordering::AcqRel);

    for sequence in 1..=3 {
        let Ok(reply) = state.provider.sign_reply(&request, sequence) else {
            break;
        };
        let Ok(frame) = serde_json::to_string(&reply) else {
            break;
        };
        if socket.send(Message::Text(frame.into())).await.is_err() {
            return;
        }
    }
    let _ = socket.send(Message::Close(None)).await;
}
