use serde::Serialize;
use sqlx::FromRow;
use waypoint_core::types::{EnvironmentId, Timestamp};

/// A row from the `environments` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Environment {
    pub id: EnvironmentId,
    pub project_id: String,
    pub name: String,
    #[serde(skip)]
    pub token_hash: String,
    pub created_at: Timestamp,
}
