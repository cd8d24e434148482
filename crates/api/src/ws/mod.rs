//! WebSocket infrastructure for the SDK gateway.
//!
//! Provides connection management with rooms, heartbeat monitoring, and the
//! authenticated HTTP upgrade handler mounted under the protocol namespace.

mod handler;
mod heartbeat;
pub mod manager;

pub use handler::{ws_handler, ConnectParams};
pub use heartbeat::start_heartbeat;
pub use manager::{environment_room, user_room, WsManager, WsReceivers};
