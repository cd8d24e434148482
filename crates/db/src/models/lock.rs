use sqlx::FromRow;
use waypoint_core::types::Timestamp;

/// A row from the `distributed_locks` table.
#[derive(Debug, Clone, FromRow)]
pub struct DistributedLock {
    pub lock_key: String,
    pub token: String,
    pub expires_at: Timestamp,
}
