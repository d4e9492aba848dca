//! `GET /v1/ws` — bidirectional turn streaming.
//!
//! Protocol:
//! - Client → Server: `{ "type": "message", "session_id"?: "...", "content": "..." }`
//!   or `{ "type": "cancel", "session_id": "..." }`
//! - Server → Client: `{ "type": "ack", "session_id": "..." }` when a turn
//!   starts, then that turn's `StreamEvent` frames, ending with its terminal
//!   event. A cancel frame is answered with
//!   `{ "type": "ack", "session_id": "...", "cancelled": bool }`, where
//!   `cancelled` is false when the session had no active turn. Rejected
//!   requests come back as `error` frames.
//!
//! Several sessions may stream over one connection at once; frames carry no
//! session id, so clients that multiplex should keep one socket per session.
//! Turns started over a socket are cancelled when it closes.

use std::collections::HashSet;

use axum::{
    extract::State,
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use taskrag_agent::{Pacing, StreamBroadcaster};
use taskrag_core::event::StreamEvent;
use taskrag_core::session::SessionId;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::state::SharedState;

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Frame sent by the client.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Message {
        #[serde(default)]
        session_id: Option<String>,
        content: String,
    },
    Cancel {
        session_id: String,
    },
}

fn error_frame(kind: &str, message: impl Into<String>) -> String {
    serde_json::to_string(&StreamEvent::error(kind, message)).unwrap_or_default()
}

/// Per-socket state: where frames go, and which sessions this socket started.
struct Connection {
    state: SharedState,
    outbound: mpsc::UnboundedSender<String>,
    started: HashSet<SessionId>,
}

impl Connection {
    fn new(state: SharedState, outbound: mpsc::UnboundedSender<String>) -> Self {
        Self {
            state,
            outbound,
            started: HashSet::new(),
        }
    }

    fn send(&self, frame: String) {
        let _ = self.outbound.send(frame);
    }

    fn handle_text(&mut self, text: &str) {
        let frame: ClientFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                self.send(error_frame("ValidationError", format!("Invalid frame: {e}")));
                return;
            }
        };

        match frame {
            ClientFrame::Message {
                session_id,
                content,
            } => self.start_turn(session_id, content),
            ClientFrame::Cancel { session_id } => {
                let session_id = SessionId::from(session_id);
                let cancelled = self.state.sessions.cancel(&session_id);
                debug!(%session_id, cancelled, "Cancel frame");
                let ack = serde_json::json!({
                    "type": "ack",
                    "session_id": session_id,
                    "cancelled": cancelled,
                });
                self.send(ack.to_string());
            }
        }
    }

    fn start_turn(&mut self, session_id: Option<String>, content: String) {
        if content.trim().is_empty() {
            self.send(error_frame("ValidationError", "content must not be empty"));
            return;
        }
        let session_id = session_id.map(SessionId::from).unwrap_or_default();
        match self.state.sessions.start_turn(session_id.clone(), content) {
            Ok(handle) => {
                let ack = serde_json::json!({ "type": "ack", "session_id": session_id });
                self.send(ack.to_string());
                self.started.insert(session_id);

                let mut subscription = StreamBroadcaster::attach(handle.events, Pacing::Immediate);
                let relay = self.outbound.clone();
                tokio::spawn(async move {
                    while let Some(event) = subscription.next().await {
                        let json = serde_json::to_string(&event).unwrap_or_default();
                        if relay.send(json).is_err() {
                            break;
                        }
                    }
                });
            }
            Err(e) => {
                warn!(%session_id, error = %e, "Turn rejected");
                self.send(error_frame(e.kind(), e.to_string()));
            }
        }
    }

    /// Cancel every turn this socket started that is still running.
    /// Returns how many were cancelled.
    fn close(self) -> usize {
        let cancelled = self
            .started
            .iter()
            .filter(|id| self.state.sessions.cancel(id))
            .count();
        if cancelled > 0 {
            info!(cancelled, "Cancelled turns of closed WebSocket");
        }
        cancelled
    }
}

async fn handle_ws_connection(socket: WebSocket, state: SharedState) {
    info!("WebSocket connection established");
    let (mut sink, mut incoming) = socket.split();
    let (outbound, mut frames) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if sink.send(WsMessage::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let mut connection = Connection::new(state, outbound);
    while let Some(msg) = incoming.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => connection.handle_text(text.as_str()),
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    connection.close();
    // Relays still hold sender clones; they stop at their next send.
    writer.abort();
    info!("WebSocket connection closed");
}
