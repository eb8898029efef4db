//! WebSocket subscription relays.
//!
//! The signed request is sent as the first text frame. Every following text frame from the
//! provider is one [`RelayReply`].

use super::{RelaySubscription, TransportError, SUBSCRIPTION_BUFFER};
use crate::types::{RelayReply, RelayRequest};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Maps an http(s) base URL onto its ws(s) counterpart. Other schemes pass through.
#[must_use]
pub fn to_ws_url(base: &str) -> String {
    if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    }
}

/// Opens a subscription relay at `ws_url`.
///
/// # Errors
///
/// Returns [`TransportError::ConnectionFailed`] if the URL is not a WebSocket URL, the
/// handshake fails, or the request frame cannot be sent.
pub async fn subscribe(
    ws_url: &str,
    request: &RelayRequest,
) -> Result<RelaySubscription, TransportError> {
    if !ws_url.starts_with("ws://") && !ws_url.starts_with("wss://") {
        return Err(TransportError::ConnectionFailed(format!(
            "invalid WebSocket URL format: {ws_url}"
        )));
    }

    let payload = serde_json::to_string(request)
        .map_err(|e| TransportError::InvalidResponse(format!("unencodable request: {e}")))?;

    let (ws_stream, response) = tokio_tungstenite::connect_async(ws_url).await.map_err(|e| {
        tracing::warn!(ws_url = ws_url, error = %e, "subscription connect failed");
        TransportError::ConnectionFailed(format!("WebSocket connect error: {e}"))
    })?;
    tracing::debug!(
        ws_url = ws_url,
        status = response.status().as_u16(),
        "subscription connected"
    );

    let (mut write, mut read) = ws_stream.split();
    write
        .send(Message::Text(payload.into()))
        .await
        .map_err(|e| TransportError::ConnectionFailed(format!("WebSocket send error: {e}")))?;

    let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
    let url = ws_url.to_string();
    let reader = tokio::spawn(async move {
        while let Some(frame) = read.next().await {
            let item = match frame {
                Ok(Message::Text(text)) => serde_json::from_str::<RelayReply>(&text).map_err(|e| {
                    TransportError::InvalidResponse(format!("malformed subscription reply: {e}"))
                }),
                Ok(Message::Close(_)) => {
                    tracing::debug!(ws_url = %url, "subscription closed by provider");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(ws_url = %url, error = %e, "subscription stream error");
                    let _ = tx.send(Err(TransportError::ConnectionFailed(e.to_string()))).await;
                    break;
                }
            };
            if tx.send(item).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    Ok(RelaySubscription::new(rx, Some(reader)))
}
