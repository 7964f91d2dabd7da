//! Progress WebSocket route handler.
//!
//! Every connection becomes a subscriber of the progress broadcaster and is
//! pushed each progress event as a JSON text frame. Clients never need to
//! send anything.
//!
//! Browsers do not apply CORS to websocket handshakes, so the `Origin`
//! header is checked here against the same allow-list as the REST API.

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::completion::{ProgressEvent, SubscriberId};
use crate::server::state::GuardedProgressBroadcaster;
use crate::server::ServerConfig;

/// Route handler for `GET /ws/progress`.
pub async fn progress_ws_handler(
    State(config): State<ServerConfig>,
    State(broadcaster): State<GuardedProgressBroadcaster>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if !origin_allowed(&headers, &config.cors_allowed_origins) {
        warn!(
            "Rejecting progress WebSocket from origin {:?}",
            headers.get(header::ORIGIN)
        );
        return StatusCode::FORBIDDEN.into_response();
    }

    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| handle_socket(socket, broadcaster)),
        Err(rejection) => rejection.into_response(),
    }
}

/// Clients that send no `Origin` (CLIs, other services) are not browsers and
/// are let through.
fn origin_allowed(headers: &HeaderMap, allowed_origins: &[String]) -> bool {
    match headers.get(header::ORIGIN) {
        None => true,
        Some(origin) => allowed_origins
            .iter()
            .any(|allowed| origin.as_bytes() == allowed.as_bytes()),
    }
}

async fn handle_socket(socket: WebSocket, broadcaster: GuardedProgressBroadcaster) {
    let (subscriber_id, outgoing_rx) = broadcaster.register().await;
    debug!("Progress WebSocket connected: subscriber {}", subscriber_id);

    let (ws_sink, ws_stream) = socket.split();

    let mut outgoing_handle = tokio::spawn(forward_outgoing(ws_sink, outgoing_rx));

    tokio::select! {
        _ = process_incoming(ws_stream, subscriber_id) => {}
        _ = &mut outgoing_handle => {
            debug!("Progress subscriber {} stopped receiving events", subscriber_id);
        }
    }

    outgoing_handle.abort();
    broadcaster.unregister(subscriber_id).await;
    debug!("Progress WebSocket disconnected: subscriber {}", subscriber_id);
}

/// Forward events to the socket until the broadcaster drops this subscriber
/// or the socket fails.
async fn forward_outgoing(
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut outgoing_rx: mpsc::Receiver<ProgressEvent>,
) {
    while let Some(event) = outgoing_rx.recv().await {
        match serde_json::to_string(&event) {
            Ok(json) => {
                if ws_sink.send(Message::Text(json.into())).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                error!("Failed to serialize progress event: {}", e);
            }
        }
    }

    let _ = ws_sink.send(Message::Close(None)).await;
}

/// Drain client frames until the client goes away.
async fn process_incoming(
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    subscriber_id: SubscriberId,
) {
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Close(_)) => {
                debug!("Received close frame from subscriber {}", subscriber_id);
                break;
            }
            Ok(Message::Text(text)) => {
                debug!("Ignoring message from subscriber {}: {}", subscriber_id, text.as_str());
            }
            Ok(_) => {}
            Err(e) => {
                debug!("WebSocket error for subscriber {}: {}", subscriber_id, e);
                break;
            }
        }
    }
}
