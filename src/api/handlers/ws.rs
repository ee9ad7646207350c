//! Echo channel. Every text or binary message is sent straight back with the
//! same frame type until the client closes.

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::Response,
};
use tracing::debug;

pub async fn ws(upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(echo)
}

async fn echo(mut socket: WebSocket) {
    while let Some(message) = socket.recv().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                debug!("WebSocket receive failed: {err}");
                break;
            }
        };

        match message {
            Message::Text(_) | Message::Binary(_) => {
                if let Err(err) = socket.send(message).await {
                    debug!("WebSocket send failed: {err}");
                    break;
                }
            }
            Message::Close(_) => break,
            // Pongs are queued by the protocol layer.
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
    debug!("WebSocket closed");
}
