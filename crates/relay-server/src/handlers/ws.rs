//! WebSocket channel
//!
//! Each socket is one channel. A reader loop feeds inbound frames to the
//! session lifecycle one at a time; a writer task drains the channel's
//! outbound queue into the socket.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::config::AppState;
use crate::protocol::{InboundEvent, OutboundEvent};

/// GET /ws
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_channel(socket, state))
}

async fn run_channel(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (mut session, mut outbound) = state.lifecycle.open();
    let channel_id = session.handle().id();
    info!(channel_id, "channel connected");

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let frame = match serde_json::to_string(&event) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(channel_id, event = event.name(), error = %e, "failed to serialize event");
                    continue;
                }
            };
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match InboundEvent::parse(text.as_str()) {
                Ok(event) => state.lifecycle.dispatch(&mut session, event).await,
                Err(e) => {
                    debug!(channel_id, error = %e, "unparseable frame");
                    session
                        .handle()
                        .push(OutboundEvent::error(format!("Malformed event: {}", e)));
                }
            },
            Ok(Message::Close(_)) => break,
            // Ping/pong are answered by the socket layer; binary is not part
            // of the vocabulary.
            Ok(_) => {}
            Err(e) => {
                debug!(channel_id, error = %e, "socket error");
                break;
            }
        }
    }

    state.lifecycle.close(&mut session).await;
    writer.abort();
    info!(channel_id, "channel disconnected");
}
