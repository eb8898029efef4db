use crate::middleware;
use alloy::signers::local::PrivateKeySigner;
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header::CONTENT_TYPE, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use relay_core::{
    chainproxy::ChainProxy,
    config::PortalConfig,
    metrics::MetricsCollector,
    relay::{send_relay, RelayContext, RelayError, RelayResponse},
    transport::RelaySubscription,
};
use serde_json::{json, Value};
use std::{collections::VecDeque, sync::Arc};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{debug, warn};

/// Largest client request body the portal accepts.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared state of the portal's handlers.
#[derive(Clone)]
pub struct PortalState {
    pub chain_proxy: Arc<ChainProxy>,
    pub signer: Arc<PrivateKeySigner>,
    /// `None` when metrics are disabled.
    pub metrics: Option<MetricsCollector>,
}

/// Builds the portal's routes.
///
/// `POST /` relays a JSON-RPC or Tendermint body, `GET|POST /{*path}` relays a REST or
/// Tendermint URI request, and `GET /ws` serves relays and subscriptions over a WebSocket.
pub fn create_router(state: PortalState, config: &PortalConfig) -> Router {
    let (set_request_id, propagate_request_id) = middleware::request_id_layers();

    let public = Router::new()
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .route("/ws", get(handle_ws));

    let relay = Router::new()
        .route("/", post(handle_rpc))
        .route("/{*path}", get(handle_path).post(handle_path))
        .layer(ConcurrencyLimitLayer::new(config.max_concurrent_requests))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES));

    public
        .merge(relay)
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(middleware::make_request_span))
        .layer(propagate_request_id)
        .layer(set_request_id)
}

/// HTTP status for a failed relay.
#[must_use]
pub fn status_for(err: &RelayError) -> StatusCode {
    match err {
        RelayError::Parse(_) => StatusCode::BAD_REQUEST,
        RelayError::NoAvailableSession(_) | RelayError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        RelayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        RelayError::Transport { .. } | RelayError::Verification { .. } => StatusCode::BAD_GATEWAY,
        RelayError::Signing(_) | RelayError::UnsupportedInterface(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_body(err: &RelayError) -> Value {
    json!({
        "error": {
            "kind": err.as_str(),
            "message": err.to_string(),
            "provider": err.provider(),
        }
    })
}

fn error_response(err: &RelayError) -> Response {
    (status_for(err), Json(error_body(err))).into_response()
}

fn reply_response(response: RelayResponse) -> Response {
    match response {
        RelayResponse::Reply { provider, reply, reliability } => {
            let mut response =
                (StatusCode::OK, [(CONTENT_TYPE, "application/json")], reply.data).into_response();
            let headers = response.headers_mut();
            if let Ok(value) = HeaderValue::from_str(&provider) {
                headers.insert("x-relay-provider", value);
            }
            headers.insert("x-data-reliability", HeaderValue::from_static(reliability.as_str()));
            response
        }
        // dropping the subscription closes it
        RelayResponse::Subscription { .. } => subscription_requires_websocket(),
    }
}

fn subscription_requires_websocket() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": {
                "kind": "subscription_requires_websocket",
                "message": "subscriptions are only served on /ws",
            }
        })),
    )
        .into_response()
}

async fn relay(state: &PortalState, url: &str, body: &[u8], connection_type: &str) -> Response {
    // Refused before dispatch so no session is leased for a stream nobody reads.
    // Parse errors are left to send_relay, which reports them.
    if state
        .chain_proxy
        .parse_msg(url, body, connection_type)
        .is_ok_and(|message| message.is_subscription())
    {
        return subscription_requires_websocket();
    }

    let ctx = RelayContext::background();
    match send_relay(&ctx, &state.chain_proxy, &state.signer, url, body, connection_type).await {
        Ok(response) => reply_response(response),
        Err(err) => error_response(&err),
    }
}

pub async fn handle_rpc(State(state): State<PortalState>, body: Bytes) -> Response {
    relay(&state, "", &body, Method::POST.as_str()).await
}

pub async fn handle_path(
    State(state): State<PortalState>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let url = uri.path_and_query().map_or_else(|| uri.path(), |pq| pq.as_str());
    relay(&state, url, &body, method.as_str()).await
}

pub async fn handle_ws(State(state): State<PortalState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

enum Frame {
    Data(Vec<u8>),
    Skip,
    Close,
}

fn frame(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Data(text.as_str().as_bytes().to_vec()),
        Message::Binary(bytes) => Frame::Data(bytes.to_vec()),
        Message::Close(_) => Frame::Close,
        Message::Ping(_) | Message::Pong(_) => Frame::Skip,
    }
}

fn text_frame(data: &[u8]) -> Message {
    Message::Text(String::from_utf8_lossy(data).into_owned().into())
}

/// Relays each client frame in order. A client that goes away cancels the relay in flight.
async fn serve_socket(mut socket: WebSocket, state: PortalState) {
    let (ctx, cancel) = RelayContext::with_cancel();
    let mut queued: VecDeque<Vec<u8>> = VecDeque::new();

    loop {
        let data = match queued.pop_front() {
            Some(data) => data,
            None => match socket.recv().await.map(|m| m.map(frame)) {
                Some(Ok(Frame::Data(data))) => data,
                Some(Ok(Frame::Skip)) => continue,
                _ => break,
            },
        };

        let relay = send_relay(&ctx, &state.chain_proxy, &state.signer, "", &data, "POST");
        tokio::pin!(relay);
        let result = loop {
            tokio::select! {
                result = &mut relay => break result,
                incoming = socket.recv(), if !ctx.is_cancelled() => {
                    match incoming.map(|m| m.map(frame)) {
                        Some(Ok(Frame::Data(next))) => queued.push_back(next),
                        Some(Ok(Frame::Skip)) => {}
                        _ => cancel.cancel(),
                    }
                }
            }
        };
        if ctx.is_cancelled() {
            break;
        }

        let open = match result {
            Ok(RelayResponse::Subscription { provider, subscription }) => {
                forward_subscription(&mut socket, &provider, subscription).await
            }
            Ok(RelayResponse::Reply { reply, .. }) => socket.send(text_frame(&reply.data)).await.is_ok(),
            Err(err) => socket.send(Message::Text(error_body(&err).to_string().into())).await.is_ok(),
        };
        if !open {
            break;
        }
    }
    debug!("websocket client disconnected");
}

/// Streams subscription replies to the client. Returns `false` once the client is gone.
async fn forward_subscription(
    socket: &mut WebSocket,
    provider: &str,
    mut subscription: RelaySubscription,
) -> bool {
    debug!(provider = provider, "subscription opened");
    loop {
        tokio::select! {
            reply = subscription.next() => match reply {
                Some(Ok(reply)) => {
                    if socket.send(text_frame(&reply.data)).await.is_err() {
                        return false;
                    }
                }
                Some(Err(err)) => {
                    warn!(provider = provider, error = %err, "subscription failed");
                    let body = json!({ "error": { "kind": "subscription_error", "message": err.to_string() } });
                    return socket.send(Message::Text(body.to_string().into())).await.is_ok();
                }
                None => return true,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => return false,
                // client frames are ignored while subscribed
                Some(Ok(_)) => {}
            },
        }
    }
}

pub async fn handle_metrics(State(state): State<PortalState>) -> Response {
    match &state.metrics {
        Some(collector) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            collector.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn handle_health(State(state): State<PortalState>) -> Response {
    let sentry = state.chain_proxy.sentry();
    let providers = sentry.providers_count();
    let (expected_block_height, providers_with_height) = sentry.expected_block_height();

    let status = if providers > 0 { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    let body = json!({
        "status": if providers > 0 { "healthy" } else { "unhealthy" },
        "chain_id": sentry.chain_id(),
        "interface": state.chain_proxy.interface().as_str(),
        "consumer": state.signer.address().to_string(),
        "providers": {
            "total": providers,
            "expected_block_height": expected_block_height,
            "at_expected_height": providers_with_height,
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status, Json(body)).into_response()
}
