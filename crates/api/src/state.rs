use std::sync::Arc;

use crate::config::ServerConfig;
use crate::store::Stores;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool. `None` with the in-memory store backend.
    pub pool: Option<waypoint_db::DbPool>,
    pub config: Arc<ServerConfig>,
    /// SDK socket connections and their rooms.
    pub ws_manager: Arc<WsManager>,
    /// Analytics events produced by the gateway.
    pub event_bus: Arc<waypoint_events::EventBus>,
    pub stores: Stores,
}
