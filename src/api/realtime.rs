use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};

use crate::api::state::AppState;
use crate::services::relay::{ClientFrame, ConnectionId, Push, Relay};

/// Upgrade to a relay connection
async fn ws_handler(ws: WebSocketUpgrade, State(relay): State<Relay>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, relay))
}

async fn serve_socket(mut socket: WebSocket, relay: Relay) {
    let (id, mut pushes) = relay.connect();
    tracing::info!(connection = %id, "Realtime client connected");

    loop {
        tokio::select! {
            push = pushes.recv() => {
                let Some(push) = push else { break };
                if send_push(&mut socket, &push).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let reply = handle_frame(&relay, id, &text);
                    if send_push(&mut socket, &reply).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(connection = %id, error = %e, "Realtime socket error");
                    break;
                }
            },
        }
    }

    relay.disconnect(id);
    tracing::info!(connection = %id, "Realtime client disconnected");
}

/// Applies one client frame and returns the acknowledgement to send back
fn handle_frame(relay: &Relay, id: ConnectionId, text: &str) -> Push {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Subscribe { scope }) => {
            relay.subscribe(id, scope.clone());
            Push::Subscribed { scope }
        }
        Ok(ClientFrame::Unsubscribe { scope }) => {
            relay.unsubscribe(id, &scope);
            Push::Unsubscribed { scope }
        }
        Err(e) => {
            tracing::debug!(connection = %id, error = %e, "Malformed client frame");
            Push::Error {
                message: format!("Malformed frame: {}", e),
            }
        }
    }
}

async fn send_push(socket: &mut WebSocket, push: &Push) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(push) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode push");
            return Ok(());
        }
    };
    socket.send(Message::Text(text)).await
}

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}
