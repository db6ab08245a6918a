//! WebSocket endpoint peers connect to

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use super::ApiState;
use crate::Error;
use crate::host::{ChannelTransport, Outbound, PeerTransport};
use crate::network::{Handshake, JoinAction};

/// Close code sent when the requested room does not exist
pub const ROOM_NOT_FOUND_CLOSE_CODE: u16 = 4004;

/// Close code sent when the handshake is rejected for another reason
pub const HANDSHAKE_REJECTED_CLOSE_CODE: u16 = 4400;

const INTERNAL_CLOSE_CODE: u16 = 1011;

const OUTBOUND_CAPACITY: usize = 64;

/// Handshake carried in the upgrade URL
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeQuery {
    pub peer_id: String,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    #[serde(default)]
    pub action: JoinAction,
}

/// Build WebSocket router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/rooms/{room_id}/ws", get(ws_upgrade))
        .with_state(state)
}

/// Handle WebSocket upgrade request
async fn ws_upgrade(
    State(state): State<Arc<ApiState>>,
    Path(room_id): Path<String>,
    Query(query): Query<HandshakeQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, room_id, query))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<ApiState>, room_id: String, query: HandshakeQuery) {
    let (mut sender, mut receiver) = socket.split();

    let room = match state.rooms.open(&room_id, query.action).await {
        Ok(room) => room,
        Err(e) => {
            let code = match e {
                Error::RoomNotFound(_) => ROOM_NOT_FOUND_CLOSE_CODE,
                Error::Handshake(_) => HANDSHAKE_REJECTED_CLOSE_CODE,
                _ => INTERNAL_CLOSE_CODE,
            };
            tracing::warn!(room_id = %room_id, peer_id = %query.peer_id, error = %e, "rejecting connection");
            let _ = sender.send(close_message(code, &e.to_string())).await;
            return;
        }
    };

    let (transport, mut outbound) = ChannelTransport::new(OUTBOUND_CAPACITY);
    let transport: Arc<dyn PeerTransport> = Arc::new(transport);
    let transport_id = transport.id();

    let handshake = Handshake {
        session_id: room_id.clone(),
        device_name: query.device_name.unwrap_or_else(|| query.peer_id.clone()),
        peer_id: query.peer_id,
        device_id: query.device_id,
        action: query.action,
    };

    let peer = match room
        .network
        .add_connection(Arc::clone(&transport), handshake)
        .await
    {
        Ok(peer) => peer,
        Err(e) => {
            tracing::warn!(room_id = %room_id, error = %e, "handshake rejected");
            let _ = sender
                .send(close_message(HANDSHAKE_REJECTED_CLOSE_CODE, &e.message))
                .await;
            return;
        }
    };

    tracing::info!(room_id = %room_id, peer_id = %peer.peer_id, transport_id = %transport_id, "WebSocket connected");

    // Forward frames queued on the transport to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            match frame {
                Outbound::Text(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close { code, reason } => {
                    let _ = sender.send(close_message(code, &reason)).await;
                    break;
                }
            }
        }
    });

    // Each frame gets its own task so a resolver calling back into this peer
    // cannot stall the read loop
    let dispatcher = room.dispatcher.clone();
    let recv_transport = Arc::clone(&transport);
    let peer_id = peer.peer_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let dispatcher = dispatcher.clone();
                    let transport = Arc::clone(&recv_transport);
                    tokio::spawn(async move {
                        dispatcher.handle_message(&transport, text.as_str()).await;
                    });
                }
                Message::Close(_) => {
                    tracing::info!(peer_id = %peer_id, "WebSocket closed by peer");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    if let Some(peer_id) = room.network.handle_transport_closed(transport_id).await {
        tracing::info!(room_id = %room_id, peer_id = %peer_id, "WebSocket disconnected");
    }
}

fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }))
}
