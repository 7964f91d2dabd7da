//! Progress websocket helpers

use super::constants::*;
use futures::StreamExt;
use serde_json::Value;
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{
    self, client::IntoClientRequest, http::HeaderValue, Message,
};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type ProgressSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Opens `/ws/progress` on the test server.
pub async fn connect_progress_ws(base_url: &str) -> ProgressSocket {
    let ws_url = base_url.replace("http://", "ws://") + "/ws/progress";
    let (ws_stream, _) = connect_async(ws_url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

/// Opens `/ws/progress` the way a browser page served from `origin` would.
pub async fn try_connect_progress_ws_from(
    base_url: &str,
    origin: &str,
) -> Result<ProgressSocket, tungstenite::Error> {
    let ws_url = base_url.replace("http://", "ws://") + "/ws/progress";
    let mut request = ws_url.into_client_request()?;
    request.headers_mut().insert(
        "Origin",
        HeaderValue::from_str(origin).expect("Invalid origin header"),
    );
    let (ws_stream, _) = connect_async(request).await?;
    Ok(ws_stream)
}

/// Next progress frame as JSON, or None on timeout or close.
pub async fn next_progress_event(ws: &mut ProgressSocket) -> Option<Value> {
    let result = timeout(Duration::from_secs(WS_MESSAGE_TIMEOUT_SECS), async {
        while let Some(Ok(msg)) = ws.next().await {
            match msg {
                Message::Text(text) => {
                    if let Ok(json) = serde_json::from_str::<Value>(&text) {
                        return Some(json);
                    }
                }
                Message::Close(_) => return None,
                _ => {}
            }
        }
        None
    })
    .await;

    result.ok().flatten()
}
