use sqlx::FromRow;
use waypoint_core::types::{EnvironmentId, Timestamp};

/// A row from the `socket_client_data` table. `data` holds the serialized
/// `SocketClientData`.
#[derive(Debug, Clone, FromRow)]
pub struct SocketClientDataRow {
    pub socket_id: String,
    pub environment_id: EnvironmentId,
    pub data: serde_json::Value,
    pub expires_at: Timestamp,
    pub updated_at: Timestamp,
}
