use axum::extract::ws::Message;
use waypoint_core::client_data::SocketClientData;
use waypoint_core::protocol::{decode_client_frame, ClientMessage, Frame};

use super::batch::BatchBuffer;
use super::synchronizer::{Effects, SyncError, Synchronizer};
use super::{ConnectionState, PeerSignal};
use crate::error::AppResult;
use crate::state::AppState;
use crate::store::EnvironmentRecord;
use crate::ws::WsReceivers;

/// One SDK socket after authentication.
///
/// The connection holds the committed [`SocketClientData`] for its client.
/// Each inbound message (or closed batch) is applied to a draft copy while
/// end-user writes are staged alongside it. On success the staged writes
/// and the draft are persisted, and only then does the draft become the
/// committed state and have its effects dispatched. A storage failure
/// while applying leaves the stores, the committed state and the browser
/// untouched.
pub struct ClientConnection {
    app: AppState,
    environment: EnvironmentRecord,
    conn_id: String,
    state: ConnectionState,
    data: SocketClientData,
    batch: BatchBuffer,
}

impl ClientConnection {
    /// `client_id` is the browser's stable id; it keys the durable client
    /// data so a reconnect resumes where the last socket stopped.
    pub fn new(app: AppState, environment: EnvironmentRecord, client_id: String) -> Self {
        let data = SocketClientData::new(client_id, environment.id.clone());
        Self {
            app,
            environment,
            conn_id: uuid::Uuid::new_v4().to_string(),
            state: ConnectionState::Authenticated,
            data,
            batch: BatchBuffer::new(),
        }
    }

    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    pub fn phase(&self) -> ConnectionState {
        self.state
    }

    pub fn data(&self) -> &SocketClientData {
        &self.data
    }

    fn synchronizer(&self) -> Synchronizer<'_> {
        Synchronizer::new(&self.app.stores, &self.environment, self.app.config.lock_ttl_secs)
    }

    /// Register with the socket manager and load (or create) client data.
    pub async fn connect(&mut self) -> AppResult<WsReceivers> {
        let receivers = self
            .app
            .ws_manager
            .add(self.conn_id.clone(), &self.environment.id)
            .await;

        let stored = self.app.stores.client_data.get(&self.data.socket_id).await?;
        let mut effects = Effects::default();
        match stored {
            Some(data) if data.environment_id == self.environment.id => {
                tracing::info!(
                    conn_id = %self.conn_id,
                    socket_id = %data.socket_id,
                    sessions = data.active_sessions().count(),
                    "Resuming client data",
                );
                self.data = data;
                self.synchronizer().resume(&self.data, &mut effects);
            }
            Some(_) => {
                tracing::warn!(
                    conn_id = %self.conn_id,
                    socket_id = %self.data.socket_id,
                    "Stored client data belongs to another environment, starting fresh",
                );
            }
            None => {}
        }

        self.app
            .stores
            .client_data
            .set(&self.data, self.app.config.client_data_ttl_secs)
            .await?;
        self.dispatch(effects).await;
        self.state = ConnectionState::Active;
        tracing::info!(conn_id = %self.conn_id, environment_id = %self.environment.id, "SDK connected");
        Ok(receivers)
    }

    /// Decode and handle one text frame. Frames that fail to decode are
    /// logged and dropped.
    pub async fn handle_text(&mut self, text: &str) -> AppResult<()> {
        match decode_client_frame(text) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => {
                tracing::warn!(conn_id = %self.conn_id, error = %e, "Dropping undecodable frame");
                Ok(())
            }
        }
    }

    pub async fn handle_message(&mut self, message: ClientMessage) -> AppResult<()> {
        match message {
            ClientMessage::BeginBatch => {
                self.batch.begin();
                Ok(())
            }
            ClientMessage::EndBatch => match self.batch.end() {
                Some(messages) => self.apply(messages).await,
                None => {
                    tracing::debug!(conn_id = %self.conn_id, "EndBatch without an open batch");
                    Ok(())
                }
            },
            message if self.batch.is_open() => {
                self.batch.push(message);
                Ok(())
            }
            message => self.apply(vec![message]).await,
        }
    }

    /// Apply `messages` as one transition.
    async fn apply(&mut self, messages: Vec<ClientMessage>) -> AppResult<()> {
        let mut draft = self.data.clone();
        let mut effects = Effects::default();
        if let Err(e) = self.stage(&mut draft, messages, &mut effects).await {
            self.release_locks(std::mem::take(&mut effects.held_locks)).await;
            return Err(e);
        }
        self.commit(draft, effects).await
    }

    /// Run `messages` and the follow-up refresh against `draft`, one step
    /// at a time. A rejected step is dropped whole; a storage failure
    /// abandons the transition.
    async fn stage(
        &self,
        draft: &mut SocketClientData,
        messages: Vec<ClientMessage>,
        effects: &mut Effects,
    ) -> AppResult<()> {
        let sync = self.synchronizer();
        for message in messages {
            let kind = message.kind();
            let mut attempt = draft.clone();
            let mut step = effects.fork();
            match sync.apply(&mut attempt, message, &mut step).await {
                Ok(()) => {
                    *draft = attempt;
                    effects.absorb(step);
                }
                Err(SyncError::Rejected(e)) => {
                    tracing::warn!(conn_id = %self.conn_id, kind, error = %e, "Message rejected");
                    self.discard_step(effects, step).await;
                }
                Err(SyncError::Store(e)) => {
                    self.discard_step(effects, step).await;
                    return Err(e.into());
                }
            }
        }
        if effects.needs_refresh {
            let mut refreshed = draft.clone();
            let mut step = effects.fork();
            match sync.refresh(&mut refreshed, &mut step).await {
                Ok(()) => {
                    *draft = refreshed;
                    effects.absorb(step);
                }
                Err(SyncError::Rejected(e)) => {
                    tracing::warn!(conn_id = %self.conn_id, error = %e, "Refresh rejected");
                    self.discard_step(effects, step).await;
                }
                Err(SyncError::Store(e)) => {
                    self.discard_step(effects, step).await;
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// Release the locks a dropped step took on top of `effects`.
    async fn discard_step(&self, effects: &Effects, step: Effects) {
        let taken = step
            .held_locks
            .into_iter()
            .filter(|lock| !effects.held_locks.contains(lock))
            .collect();
        self.release_locks(taken).await;
    }

    async fn release_locks(&self, locks: Vec<(String, String)>) {
        for (key, token) in locks {
            match self.app.stores.locks.release(&key, &token).await {
                Ok(true) => {}
                Ok(false) => tracing::warn!(lock_key = %key, "Lock expired before release"),
                Err(e) => tracing::warn!(lock_key = %key, error = %e, "Failed to release lock"),
            }
        }
    }

    /// Handle a signal from a sibling connection.
    pub async fn handle_peer(&mut self, signal: PeerSignal) -> AppResult<()> {
        let mut draft = self.data.clone();
        let mut effects = Effects::default();
        match self.synchronizer().handle_peer(&mut draft, signal, &mut effects) {
            Ok(()) => self.commit(draft, effects).await,
            Err(SyncError::Rejected(e)) => {
                tracing::debug!(conn_id = %self.conn_id, error = %e, "Ignoring peer signal");
                Ok(())
            }
            Err(SyncError::Store(e)) => Err(e.into()),
        }
    }

    /// Flush staged end-user writes and the client data, then dispatch.
    /// Locks held by the transition are released either way.
    async fn commit(&mut self, draft: SocketClientData, mut effects: Effects) -> AppResult<()> {
        let locks = std::mem::take(&mut effects.held_locks);
        let persisted = self.persist(draft, &effects).await;
        self.release_locks(locks).await;
        persisted?;
        self.dispatch(effects).await;
        Ok(())
    }

    async fn persist(&mut self, draft: SocketClientData, effects: &Effects) -> AppResult<()> {
        if !effects.writes.is_empty() {
            effects
                .writes
                .flush(&self.app.stores, &self.environment.id)
                .await?;
        }
        if draft != self.data {
            self.app
                .stores
                .client_data
                .set(&draft, self.app.config.client_data_ttl_secs)
                .await?;
            self.data = draft;
        }
        Ok(())
    }

    async fn dispatch(&self, effects: Effects) {
        let ws = &self.app.ws_manager;
        for room in &effects.rooms_to_leave {
            ws.leave(&self.conn_id, room).await;
        }
        for room in &effects.rooms_to_join {
            ws.join(&self.conn_id, room).await;
        }

        for message in effects.messages {
            let kind = message.kind();
            match Frame::Server(message).encode() {
                Ok(text) => {
                    if !ws.send(&self.conn_id, Message::Text(text.into())).await {
                        tracing::debug!(conn_id = %self.conn_id, kind, "Connection gone, frame dropped");
                    }
                }
                Err(e) => tracing::error!(conn_id = %self.conn_id, kind, error = %e, "Failed to encode frame"),
            }
        }

        for (room, signal) in effects.peer_signals {
            let delivered = ws.signal_room(&room, signal, Some(&self.conn_id)).await;
            tracing::trace!(room = %room, delivered, "Peer signal sent");
        }

        for event in effects.events {
            self.app.event_bus.publish(event);
        }
    }

    /// Tear down after the socket closed. Client data stays in the store
    /// until its TTL runs out.
    pub async fn disconnect(&mut self) {
        let dropped = self.batch.discard();
        if dropped > 0 {
            tracing::info!(conn_id = %self.conn_id, dropped, "Discarded unfinished batch");
        }
        self.app.ws_manager.remove(&self.conn_id).await;
        self.state = ConnectionState::Disconnected;
        tracing::info!(conn_id = %self.conn_id, "SDK disconnected");
    }
}
