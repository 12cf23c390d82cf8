//! Subscriber WebSocket endpoint
//!
//! Each connected client gets every relayed game event in upstream order.
//! Anything the client sends is passed through to the game verbatim,
//! outside the request/response protocol.

use crate::AppState;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

pub async fn handle_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| subscriber_session(socket, state))
}

async fn subscriber_session(mut socket: WebSocket, state: Arc<AppState>) {
    let mut events = state.bridge.subscribe();
    info!("Subscriber connected");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let payload = event.to_string();
                    // A failed send means the client is gone; drop it
                    if socket.send(Message::Text(payload.into())).await.is_err() {
                        debug!("Subscriber send failed, dropping client");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Slow subscriber skipped {} event(s)", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            frame = socket.recv() => match frame {
                Some(Ok(Message::Text(text))) => {
                    state.bridge.handle_forward(text.as_str()).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Subscriber receive error: {}", e);
                    break;
                }
            },
        }
    }

    info!("Subscriber disconnected");
}
