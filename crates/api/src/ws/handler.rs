use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use waypoint_core::error::CoreError;

use crate::error::AppError;
use crate::gateway::ClientConnection;
use crate::state::AppState;
use crate::store::EnvironmentRecord;

/// Query parameters of the SDK socket URL.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    /// Environment SDK token.
    pub token: Option<String>,
    /// Stable browser id. A fresh one is assigned when absent.
    pub client_id: Option<String>,
}

/// HTTP handler that authenticates the SDK token and upgrades the
/// connection to WebSocket.
///
/// The token is checked before the upgrade so an unauthenticated client gets
/// a plain 401 instead of a socket that closes immediately.
pub async fn ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let token = params
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CoreError::Unauthorized("missing SDK token".into()))?;
    let environment = state
        .stores
        .content
        .find_environment_by_token(&token)
        .await?
        .ok_or_else(|| CoreError::Unauthorized("invalid SDK token".into()))?;

    let ws = ws.map_err(|e| AppError::BadRequest(e.to_string()))?;
    let client_id = params
        .client_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, environment, client_id)))
}

/// Drive a single SDK connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Loads or creates the client's data and registers with `WsManager`.
///   2. Spawns a sender task that forwards frames from the manager channel.
///   3. Feeds inbound frames and sibling signals to the connection.
///   4. Cleans up on disconnect.
async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    environment: EnvironmentRecord,
    client_id: String,
) {
    let mut conn = ClientConnection::new(state, environment, client_id);
    let conn_id = conn.conn_id().to_string();

    let (mut sink, mut stream) = socket.split();

    let receivers = match conn.connect().await {
        Ok(receivers) => receivers,
        Err(e) => {
            tracing::error!(conn_id = %conn_id, error = %e, "Failed to set up SDK connection");
            let _ = sink.send(Message::Close(None)).await;
            conn.disconnect().await;
            return;
        }
    };
    let mut rx = receivers.messages;
    let mut peer = receivers.peer;

    // Sender task: forward channel messages to the WebSocket sink.
    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
        }
    });

    loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = conn.handle_text(text.as_str()).await {
                        tracing::error!(conn_id = %conn_id, error = %e, "Failed to handle SDK message");
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Pong(_))) => {
                    tracing::trace!(conn_id = %conn_id, "Pong received");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                    break;
                }
            },
            Some(signal) = peer.recv() => {
                if let Err(e) = conn.handle_peer(signal).await {
                    tracing::error!(conn_id = %conn_id, error = %e, "Failed to handle peer signal");
                }
            }
        }
    }

    conn.disconnect().await;
    send_task.abort();
}
