use std::collections::{HashMap, HashSet};

use axum::body::Bytes;
use axum::extract::ws::Message;
use tokio::sync::{mpsc, RwLock};
use waypoint_core::types::{EnvironmentId, Timestamp};

use crate::gateway::PeerSignal;

/// Channel sender half for pushing frames to a WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// Channel sender half for signals from sibling connections.
pub type PeerSender = mpsc::UnboundedSender<PeerSignal>;

/// Room every connection of an environment is in.
pub fn environment_room(environment_id: &str) -> String {
    format!("environment:{environment_id}")
}

/// Room shared by every connection identified as the same end user.
pub fn user_room(environment_id: &str, external_user_id: &str) -> String {
    format!("user:{environment_id}:{external_user_id}")
}

/// Metadata for a single WebSocket connection.
pub struct WsConnection {
    pub environment_id: EnvironmentId,
    pub sender: WsSender,
    pub peer: PeerSender,
    pub rooms: HashSet<String>,
    pub connected_at: Timestamp,
}

/// Receiving halves handed to the connection task.
pub struct WsReceivers {
    /// Frames to write to the socket.
    pub messages: mpsc::UnboundedReceiver<Message>,
    /// Signals from other connections in a shared room.
    pub peer: mpsc::UnboundedReceiver<PeerSignal>,
}

/// Manages all active SDK connections and their room membership.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared across the application.
pub struct WsManager {
    connections: RwLock<HashMap<String, WsConnection>>,
}

impl WsManager {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new connection and put it in its environment room.
    pub async fn add(&self, conn_id: String, environment_id: &str) -> WsReceivers {
        let (tx, messages) = mpsc::unbounded_channel();
        let (peer_tx, peer) = mpsc::unbounded_channel();
        let conn = WsConnection {
            environment_id: environment_id.to_string(),
            sender: tx,
            peer: peer_tx,
            rooms: HashSet::from([environment_room(environment_id)]),
            connected_at: chrono::Utc::now(),
        };
        self.connections.write().await.insert(conn_id, conn);
        WsReceivers { messages, peer }
    }

    /// Remove a connection by its ID. It leaves every room it was in.
    pub async fn remove(&self, conn_id: &str) {
        self.connections.write().await.remove(conn_id);
    }

    /// Add a connection to `room`. Returns `false` for unknown connections.
    pub async fn join(&self, conn_id: &str, room: &str) -> bool {
        match self.connections.write().await.get_mut(conn_id) {
            Some(conn) => {
                conn.rooms.insert(room.to_string());
                true
            }
            None => false,
        }
    }

    pub async fn leave(&self, conn_id: &str, room: &str) {
        if let Some(conn) = self.connections.write().await.get_mut(conn_id) {
            conn.rooms.remove(room);
        }
    }

    /// IDs of the connections currently in `room`.
    pub async fn room_members(&self, room: &str) -> Vec<String> {
        self.connections
            .read()
            .await
            .iter()
            .filter(|(_, conn)| conn.rooms.contains(room))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Send a frame to one connection. Returns `false` if it is gone.
    pub async fn send(&self, conn_id: &str, message: Message) -> bool {
        match self.connections.read().await.get(conn_id) {
            Some(conn) => conn.sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Deliver a peer signal to every connection in `room` except `except`.
    pub async fn signal_room(&self, room: &str, signal: PeerSignal, except: Option<&str>) -> usize {
        let conns = self.connections.read().await;
        let mut count = 0;
        for (id, conn) in conns.iter() {
            if conn.rooms.contains(room) && Some(id.as_str()) != except {
                let _ = conn.peer.send(signal.clone());
                count += 1;
            }
        }
        count
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a Close frame to every connection, then clear the map.
    ///
    /// Used during graceful shutdown to notify all clients before the
    /// server stops accepting new connections.
    pub async fn shutdown_all(&self) {
        let mut conns = self.connections.write().await;
        let count = conns.len();
        for conn in conns.values() {
            let _ = conn.sender.send(Message::Close(None));
        }
        conns.clear();
        tracing::info!(count, "Closed all WebSocket connections");
    }

    /// Send a Ping frame to every connected client.
    pub async fn ping_all(&self) {
        let conns = self.connections.read().await;
        for conn in conns.values() {
            let _ = conn.sender.send(Message::Ping(Bytes::new()));
        }
    }
}

impl Default for WsManager {
    fn default() -> Self {
        Self::new()
    }
}
