pub mod health;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the SDK route tree, nested under the protocol namespace.
///
/// ```text
/// /ws?token=..&clientId=..                         SDK WebSocket
/// ```
pub fn sdk_routes() -> Router<AppState> {
    Router::new().route("/ws", get(ws::ws_handler))
}
