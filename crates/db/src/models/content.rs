//! Published content rows.

use serde::Serialize;
use sqlx::FromRow;
use waypoint_core::types::{ContentId, EnvironmentId, Timestamp, VersionId};

/// A row from the `published_contents` table. `version` holds the
/// serialized `ContentVersion`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PublishedContent {
    pub content_id: ContentId,
    pub environment_id: EnvironmentId,
    pub content_type: String,
    pub name: Option<String>,
    pub version_id: VersionId,
    pub version: serde_json::Value,
    pub published_at: Timestamp,
}

/// A row from the `attribute_definitions` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AttributeDefinitionRow {
    pub environment_id: EnvironmentId,
    pub biz_type: String,
    pub code_name: String,
    pub data_type: String,
}
