use serde::Serialize;
use sqlx::FromRow;
use waypoint_core::types::{ContentId, EnvironmentId, SessionId, Timestamp};

/// A row from the `biz_events` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BizEvent {
    pub id: i64,
    pub environment_id: EnvironmentId,
    pub external_user_id: Option<String>,
    pub session_id: Option<SessionId>,
    pub content_id: Option<ContentId>,
    pub code: String,
    pub payload: serde_json::Value,
    pub created_at: Timestamp,
}

/// DTO for inserting a new event.
#[derive(Debug, Clone)]
pub struct CreateBizEvent<'a> {
    pub environment_id: &'a str,
    pub external_user_id: Option<&'a str>,
    pub session_id: Option<&'a str>,
    pub content_id: Option<&'a str>,
    pub code: &'a str,
    pub payload: &'a serde_json::Value,
    pub created_at: Timestamp,
}
