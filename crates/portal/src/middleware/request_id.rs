//! Request IDs and per-request spans, so a client request can be followed through the relay
//! logs.

use axum::{
    body::Body,
    http::{header::HeaderValue, HeaderName, Request},
};
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tracing::Span;
use uuid::Uuid;

pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Generates UUID v4 request IDs for requests that arrive without one.
#[derive(Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string()).ok().map(RequestId::new)
    }
}

/// Layers that set `x-request-id` when missing and copy it onto the response.
///
/// Apply the propagate layer first so it runs after the set layer.
pub fn request_id_layers() -> (SetRequestIdLayer<UuidRequestId>, PropagateRequestIdLayer) {
    (
        SetRequestIdLayer::new(X_REQUEST_ID.clone(), UuidRequestId),
        PropagateRequestIdLayer::new(X_REQUEST_ID.clone()),
    )
}

/// Span wrapping one client request, tagged with its request ID.
pub fn make_request_span(request: &Request<Body>) -> Span {
    let request_id =
        request.headers().get(&X_REQUEST_ID).and_then(|v| v.to_str().ok()).unwrap_or("-");
    tracing::info_span!(
        "client_request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id,
    )
}
