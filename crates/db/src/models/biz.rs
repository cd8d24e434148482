//! End-user ("biz") rows: users, companies, memberships, segments and
//! per-content history.

use serde::Serialize;
use sqlx::FromRow;
use waypoint_core::types::{ContentId, EnvironmentId, Timestamp};

/// A row from `biz_users` or `biz_companies`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BizEntity {
    pub environment_id: EnvironmentId,
    pub external_id: String,
    pub attributes: serde_json::Value,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A row from `biz_memberships`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BizMembership {
    pub environment_id: EnvironmentId,
    pub external_user_id: String,
    pub external_company_id: String,
    pub attributes: serde_json::Value,
    pub updated_at: Timestamp,
}

/// A row from `biz_content_states`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BizContentState {
    pub content_id: ContentId,
    pub actived: bool,
    pub seen: bool,
    pub completed: bool,
}
