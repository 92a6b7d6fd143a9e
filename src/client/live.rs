use futures_util::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use std::collections::HashSet;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::{BackendError, ClientError, RosterClient};
use crate::models::Scope;
use crate::services::relay::{ClientFrame, Push};

fn unreachable(err: impl std::fmt::Display) -> ClientError {
    ClientError::Backend(BackendError::Unreachable(err.to_string()))
}

/// `http://host/` → `ws://host/ws`
fn socket_url(base_url: &Url) -> Result<Url, ClientError> {
    let mut url = base_url
        .join("ws")
        .map_err(|e| unreachable(format!("Invalid backend URL: {}", e)))?;
    let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|_| unreachable(format!("Cannot derive websocket URL from {}", base_url)))?;
    Ok(url)
}

impl RosterClient {
    /// Subscribes to the given scopes on the relay and merges every pushed
    /// attendance event into the cache.
    ///
    /// Returns once the server has acknowledged all scopes; the returned task
    /// runs until the connection closes.
    #[tracing::instrument(skip(self, scopes), fields(scopes = scopes.len()))]
    pub async fn follow(&self, scopes: Vec<Scope>) -> Result<JoinHandle<()>, ClientError> {
        let url = socket_url(&self.config().base_url)?;

        let mut request = url.as_str().into_client_request().map_err(unreachable)?;
        if let Some(token) = &self.config().api_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                .map_err(unreachable)?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (mut socket, _) = tokio::time::timeout(
            self.config().request_timeout,
            tokio_tungstenite::connect_async(request),
        )
        .await
        .map_err(|_| unreachable("websocket handshake timed out"))?
        .map_err(unreachable)?;

        let mut pending: HashSet<Scope> = scopes.iter().cloned().collect();
        for scope in scopes {
            let frame = serde_json::to_string(&ClientFrame::Subscribe { scope })
                .map_err(unreachable)?;
            socket
                .send(Message::Text(frame))
                .await
                .map_err(unreachable)?;
        }

        let acknowledged = async {
            while !pending.is_empty() {
                match socket.next().await {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<Push>(&text) {
                        Ok(Push::Subscribed { scope }) => {
                            pending.remove(&scope);
                        }
                        Ok(Push::Attendance { event }) => {
                            self.apply_event(&event);
                        }
                        Ok(Push::Error { message }) => {
                            return Err(unreachable(format!("subscription refused: {}", message)));
                        }
                        Ok(_) | Err(_) => {}
                    },
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(unreachable(e)),
                    None => return Err(unreachable("connection closed during handshake")),
                }
            }
            Ok(())
        };
        tokio::time::timeout(self.config().request_timeout, acknowledged)
            .await
            .map_err(|_| unreachable("subscription was not acknowledged"))??;

        tracing::info!(url = %url, "Following attendance updates");

        let client = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(message) = socket.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<Push>(&text) {
                        Ok(Push::Attendance { event }) => {
                            let merged = client.apply_event(&event);
                            tracing::debug!(child_id = %event.child_id, status = %event.status, merged, "Merged pushed event");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "Ignoring malformed push"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Realtime connection lost");
                        break;
                    }
                }
            }
            tracing::info!("Stopped following attendance updates");
        });

        Ok(handle)
    }
}
