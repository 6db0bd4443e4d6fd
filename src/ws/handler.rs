//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::protocol::PeerId;
use crate::relay::{passphrase_tag, LobbyRegistry, PeerSender, RelayError, Route};
use crate::util::rate_limit::PeerRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let peer_id = PeerId::random();
    info!(peer_id = %peer_id, "New WebSocket connection");

    let (mut ws_sink, mut ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        peer_id,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(peer_id = %peer_id, error = %e, "Failed to send welcome");
        return;
    }

    // First message must be a join
    let Some(passphrase) = await_join(peer_id, &mut ws_sink, &mut ws_stream).await else {
        info!(peer_id = %peer_id, "Connection closed before joining a lobby");
        return;
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let joined = match state.lobbies.join(&passphrase, peer_id, tx.clone()) {
        Ok(joined) => joined,
        Err(e) => {
            warn!(peer_id = %peer_id, error = %e, "Join rejected");
            let _ = send_msg(&mut ws_sink, &ServerMsg::error(e.code(), e.to_string())).await;
            return;
        }
    };

    let _ = tx.send(ServerMsg::Joined {
        peer_id,
        host: joined.host,
        peers: joined.peers,
    });

    run_session(peer_id, &joined.key, &state.lobbies, ws_sink, ws_stream, tx, rx).await;

    state.lobbies.leave(&joined.key, peer_id);
    info!(peer_id = %peer_id, lobby = %passphrase_tag(&joined.key), "WebSocket connection closed");
}

/// Read until a `Join` arrives. Anything else is answered with an error
/// and ends the connection.
async fn await_join(
    peer_id: PeerId,
    ws_sink: &mut SplitSink<WebSocket, Message>,
    ws_stream: &mut SplitStream<WebSocket>,
) -> Option<String> {
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                return match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(ClientMsg::Join { passphrase }) => Some(passphrase),
                    Ok(_) | Err(_) => {
                        warn!(peer_id = %peer_id, "First message was not a join");
                        let reply = ServerMsg::error("join_required", "First message must be join");
                        let _ = send_msg(ws_sink, &reply).await;
                        None
                    }
                };
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Binary(_)) => {
                warn!(peer_id = %peer_id, "Received binary message, ignoring");
            }
            Ok(Message::Close(_)) => return None,
            Err(e) => {
                error!(peer_id = %peer_id, error = %e, "WebSocket error");
                return None;
            }
        }
    }
    None
}

/// Relay loop for a peer that has joined a lobby
async fn run_session(
    peer_id: PeerId,
    lobby_key: &str,
    lobbies: &LobbyRegistry,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    tx: PeerSender,
    mut rx: mpsc::UnboundedReceiver<ServerMsg>,
) {
    let rate_limiter = PeerRateLimiter::new();

    // Spawn writer task: lobby traffic -> WebSocket
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(peer_id = %peer_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    // Reader loop: WebSocket -> lobby
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let flow = handle_client_text(peer_id, lobby_key, lobbies, &rate_limiter, &tx, &text);
                if flow == Flow::Leave {
                    break;
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(peer_id = %peer_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) => {
                debug!(peer_id = %peer_id, "Received ping");
            }
            Ok(Message::Pong(_)) => {
                debug!(peer_id = %peer_id, "Received pong");
            }
            Ok(Message::Close(_)) => {
                info!(peer_id = %peer_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(peer_id = %peer_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// What the reader loop does after a client frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Leave,
}

/// Handle one text frame from a peer that has joined `lobby_key`.
/// Every rejected frame is answered with an `Error` so the client can
/// resend it.
fn handle_client_text(
    peer_id: PeerId,
    lobby_key: &str,
    lobbies: &LobbyRegistry,
    rate_limiter: &PeerRateLimiter,
    tx: &PeerSender,
    text: &str,
) -> Flow {
    if !rate_limiter.check_message() {
        warn!(peer_id = %peer_id, "Rate limited relay message");
        let err = RelayError::RateLimited;
        let _ = tx.send(ServerMsg::error(err.code(), err.to_string()));
        return Flow::Continue;
    }

    let client_msg = match serde_json::from_str::<ClientMsg>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(peer_id = %peer_id, error = %e, "Failed to parse client message");
            let _ = tx.send(ServerMsg::error("bad_message", e.to_string()));
            return Flow::Continue;
        }
    };

    let (route, envelope) = match client_msg {
        ClientMsg::Broadcast { envelope } => (Route::AllOthers, envelope),
        ClientMsg::Direct { to, envelope } => (Route::To(to), envelope),
        ClientMsg::Ping { t } => {
            let _ = tx.send(ServerMsg::Pong { t });
            return Flow::Continue;
        }
        ClientMsg::Leave => {
            info!(peer_id = %peer_id, "Client left lobby");
            return Flow::Leave;
        }
        ClientMsg::Join { .. } => {
            let _ = tx.send(ServerMsg::error("already_joined", "Already in a lobby"));
            return Flow::Continue;
        }
    };

    // Peers may only relay their own envelopes
    if envelope.sender != peer_id {
        warn!(peer_id = %peer_id, claimed = %envelope.sender, "Envelope sender mismatch");
        let _ = tx.send(ServerMsg::error("sender_mismatch", "Envelope sender must be your peer id"));
        return Flow::Continue;
    }

    if let Err(e) = lobbies.route(lobby_key, peer_id, route, envelope) {
        debug!(peer_id = %peer_id, error = %e, "Relay failed");
        let _ = tx.send(ServerMsg::error(e.code(), e.to_string()));
    }
    Flow::Continue
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
