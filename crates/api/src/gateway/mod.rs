//! Per-connection gateway: the SDK protocol state machine.
//!
//! A [`connection::ClientConnection`] owns one socket's durable
//! [`SocketClientData`](waypoint_core::client_data::SocketClientData) and
//! turns inbound client messages into state transitions via the
//! [`synchronizer::Synchronizer`]. Each transition is computed on a draft
//! copy together with the end-user writes it stages, persisted as a whole,
//! and only then pushed to the browser.

pub mod batch;
pub mod connection;
pub mod staged;
pub mod synchronizer;

pub use batch::BatchBuffer;
pub use connection::ClientConnection;
pub use staged::StagedWrites;
pub use synchronizer::{Effects, SyncError, Synchronizer};

/// Lifecycle of one SDK connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    /// The token resolved to an environment.
    Authenticated,
    /// Client data is loaded and messages are accepted.
    Active,
    Disconnected,
}

/// A fact one connection shares with its siblings in a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerSignal {
    /// Another tab of the same user moved a session of `content_id` to
    /// `step_cvid`.
    StepChanged { content_id: String, step_cvid: String },
}
