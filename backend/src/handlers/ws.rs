use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::{
    models::broadcast::BroadcastMessage, services::broadcaster::Broadcaster, state::AppState,
};

pub async fn trains_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let broadcaster = state.broadcaster.clone();
    ws.on_upgrade(move |socket| observe(socket, broadcaster))
}

/// Drives one observer connection. Outbound messages go through a writer
/// task fed by the broadcaster; the read loop only answers pings and waits
/// for the close.
async fn observe(socket: WebSocket, broadcaster: Arc<Broadcaster>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let id = match broadcaster.connect(tx).await {
        Ok(id) => id,
        Err(err) => {
            tracing::warn!(error = %err, "Failed to register observer");
            writer.abort();
            return;
        }
    };

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<BroadcastMessage>(&text) {
                Ok(BroadcastMessage::Ping) => {
                    broadcaster.send_to(id, &BroadcastMessage::Pong);
                }
                Ok(other) => {
                    tracing::debug!(observer_id = %id, message = ?other, "Ignoring observer message");
                }
                Err(err) => {
                    tracing::debug!(observer_id = %id, error = %err, "Unparseable observer message");
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(observer_id = %id, error = %err, "Observer socket error");
                break;
            }
        }
    }

    broadcaster.disconnect(id);
    let _ = writer.await;
}
