//! Postgres implementation of the store traits, delegating to the
//! repositories in `waypoint_db`.
//!
//! Rows that no longer deserialize (a content version written by a newer
//! schema, an unknown attribute type) are skipped with a warning rather than
//! failing the whole read.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use waypoint_core::attributes::{AttributeDefinition, Attributes};
use waypoint_core::client_data::SocketClientData;
use waypoint_core::conditions::{ContentState, EventOccurrence};
use waypoint_core::types::{ContentId, Timestamp};
use waypoint_db::models::content::{AttributeDefinitionRow, PublishedContent};
use waypoint_db::models::event::CreateBizEvent;
use waypoint_db::repositories::{
    BizEventRepo, BizRepo, ClientDataRepo, ContentRepo, EnvironmentRepo, LockRepo,
};
use waypoint_db::DbPool;
use waypoint_events::GatewayEvent;

use super::{
    BizStore, ClientDataStore, ContentStatePatch, ContentStore, EnvironmentRecord, LockStore,
    PublishedContentRecord, StoreResult,
};

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Parse a lowercase enum name stored as TEXT.
fn parse_name<T: DeserializeOwned>(name: &str) -> Option<T> {
    serde_json::from_value(Value::String(name.to_string())).ok()
}

fn name_of<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(Value::String(s)) => s,
        _ => String::new(),
    }
}

fn into_attributes(value: Value) -> Attributes {
    match value {
        Value::Object(map) => map,
        _ => Attributes::new(),
    }
}

fn published_record(row: PublishedContent) -> Option<PublishedContentRecord> {
    let Some(content_type) = parse_name(&row.content_type) else {
        tracing::warn!(
            content_id = %row.content_id,
            content_type = %row.content_type,
            "Skipping published content with unknown type",
        );
        return None;
    };
    match serde_json::from_value(row.version) {
        Ok(version) => Some(PublishedContentRecord {
            content_id: row.content_id,
            content_type,
            name: row.name,
            version,
        }),
        Err(e) => {
            tracing::warn!(
                content_id = %row.content_id,
                version_id = %row.version_id,
                error = %e,
                "Skipping unreadable content version",
            );
            None
        }
    }
}

fn definition(row: AttributeDefinitionRow) -> Option<AttributeDefinition> {
    let parsed = parse_name(&row.biz_type).zip(parse_name(&row.data_type));
    if parsed.is_none() {
        tracing::warn!(code_name = %row.code_name, "Skipping malformed attribute definition");
    }
    parsed.map(|(biz_type, data_type)| AttributeDefinition {
        code_name: row.code_name,
        biz_type,
        data_type,
    })
}

fn ttl_to_i64(ttl_secs: u64) -> i64 {
    i64::try_from(ttl_secs).unwrap_or(i64::MAX)
}

#[async_trait]
impl ContentStore for PgStore {
    async fn find_environment_by_token(&self, token: &str) -> StoreResult<Option<EnvironmentRecord>> {
        Ok(EnvironmentRepo::find_by_token(&self.pool, token)
            .await?
            .map(|e| EnvironmentRecord {
                id: e.id,
                project_id: e.project_id,
                name: e.name,
            }))
    }

    async fn list_published(&self, environment_id: &str) -> StoreResult<Vec<PublishedContentRecord>> {
        let rows = ContentRepo::list_published(&self.pool, environment_id).await?;
        Ok(rows.into_iter().filter_map(published_record).collect())
    }

    async fn find_published(
        &self,
        environment_id: &str,
        content_id: &str,
    ) -> StoreResult<Option<PublishedContentRecord>> {
        let row = ContentRepo::find_published(&self.pool, environment_id, content_id).await?;
        Ok(row.and_then(published_record))
    }

    async fn attribute_definitions(&self, environment_id: &str) -> StoreResult<Vec<AttributeDefinition>> {
        let rows = ContentRepo::list_attribute_definitions(&self.pool, environment_id).await?;
        Ok(rows.into_iter().filter_map(definition).collect())
    }

    async fn register_definitions(
        &self,
        environment_id: &str,
        definitions: &[AttributeDefinition],
    ) -> StoreResult<()> {
        let rows: Vec<(String, String, String)> = definitions
            .iter()
            .map(|d| (name_of(&d.biz_type), d.code_name.clone(), name_of(&d.data_type)))
            .collect();
        let inserted = ContentRepo::insert_missing_definitions(&self.pool, environment_id, &rows).await?;
        if inserted > 0 {
            tracing::debug!(environment_id, inserted, "Registered attribute definitions");
        }
        Ok(())
    }
}

#[async_trait]
impl BizStore for PgStore {
    async fn user_attributes(&self, environment_id: &str, external_user_id: &str) -> StoreResult<Attributes> {
        let user = BizRepo::find_user(&self.pool, environment_id, external_user_id).await?;
        Ok(user.map(|u| into_attributes(u.attributes)).unwrap_or_default())
    }

    async fn save_user(
        &self,
        environment_id: &str,
        external_user_id: &str,
        attributes: &Attributes,
    ) -> StoreResult<()> {
        let value = Value::Object(attributes.clone());
        BizRepo::upsert_user(&self.pool, environment_id, external_user_id, &value).await?;
        Ok(())
    }

    async fn company_attributes(
        &self,
        environment_id: &str,
        external_company_id: &str,
    ) -> StoreResult<Attributes> {
        let company = BizRepo::find_company(&self.pool, environment_id, external_company_id).await?;
        Ok(company.map(|c| into_attributes(c.attributes)).unwrap_or_default())
    }

    async fn save_company(
        &self,
        environment_id: &str,
        external_company_id: &str,
        attributes: &Attributes,
    ) -> StoreResult<()> {
        let value = Value::Object(attributes.clone());
        BizRepo::upsert_company(&self.pool, environment_id, external_company_id, &value).await?;
        Ok(())
    }

    async fn membership_attributes(
        &self,
        environment_id: &str,
        external_user_id: &str,
        external_company_id: &str,
    ) -> StoreResult<Attributes> {
        let membership =
            BizRepo::find_membership(&self.pool, environment_id, external_user_id, external_company_id)
                .await?;
        Ok(membership.map(|m| into_attributes(m.attributes)).unwrap_or_default())
    }

    async fn save_membership(
        &self,
        environment_id: &str,
        external_user_id: &str,
        external_company_id: &str,
        attributes: &Attributes,
    ) -> StoreResult<()> {
        let value = Value::Object(attributes.clone());
        BizRepo::upsert_membership(
            &self.pool,
            environment_id,
            external_user_id,
            external_company_id,
            &value,
        )
        .await?;
        Ok(())
    }

    async fn segments(&self, environment_id: &str, external_user_id: &str) -> StoreResult<HashSet<String>> {
        let segments = BizRepo::list_segments(&self.pool, environment_id, external_user_id).await?;
        Ok(segments.into_iter().collect())
    }

    async fn content_states(
        &self,
        environment_id: &str,
        external_user_id: &str,
    ) -> StoreResult<HashMap<ContentId, ContentState>> {
        let rows = BizRepo::list_content_states(&self.pool, environment_id, external_user_id).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    row.content_id,
                    ContentState {
                        actived: row.actived,
                        seen: row.seen,
                        completed: row.completed,
                    },
                )
            })
            .collect())
    }

    async fn update_content_state(
        &self,
        environment_id: &str,
        external_user_id: &str,
        content_id: &str,
        patch: ContentStatePatch,
    ) -> StoreResult<()> {
        BizRepo::upsert_content_state(
            &self.pool,
            environment_id,
            external_user_id,
            content_id,
            patch.actived,
            patch.seen,
            patch.completed,
        )
        .await?;
        Ok(())
    }

    async fn record_event(&self, event: &GatewayEvent) -> StoreResult<()> {
        let input = CreateBizEvent {
            environment_id: &event.environment_id,
            external_user_id: event.external_user_id.as_deref(),
            session_id: event.session_id.as_deref(),
            content_id: event.content_id.as_deref(),
            code: event.code(),
            payload: &event.payload,
            created_at: event.timestamp,
        };
        BizEventRepo::insert(&self.pool, &input).await?;
        Ok(())
    }

    async fn events(
        &self,
        environment_id: &str,
        external_user_id: &str,
        since: Option<Timestamp>,
    ) -> StoreResult<Vec<EventOccurrence>> {
        let rows = BizEventRepo::list_for_user(&self.pool, environment_id, external_user_id, since).await?;
        Ok(rows
            .into_iter()
            .map(|row| EventOccurrence {
                code: row.code,
                occurred_at: row.created_at,
            })
            .collect())
    }
}

#[async_trait]
impl ClientDataStore for PgStore {
    async fn get(&self, socket_id: &str) -> StoreResult<Option<SocketClientData>> {
        let Some(row) = ClientDataRepo::find(&self.pool, socket_id).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(row.data)?))
    }

    async fn set(&self, data: &SocketClientData, ttl_secs: u64) -> StoreResult<()> {
        let value = serde_json::to_value(data)?;
        ClientDataRepo::upsert(
            &self.pool,
            &data.socket_id,
            &data.environment_id,
            &value,
            ttl_to_i64(ttl_secs),
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, socket_id: &str) -> StoreResult<()> {
        ClientDataRepo::delete(&self.pool, socket_id).await?;
        Ok(())
    }

    async fn purge_expired(&self) -> StoreResult<u64> {
        Ok(ClientDataRepo::purge_expired(&self.pool).await?)
    }
}

#[async_trait]
impl LockStore for PgStore {
    async fn try_acquire(&self, key: &str, token: &str, ttl_secs: u64) -> StoreResult<bool> {
        Ok(LockRepo::try_acquire(&self.pool, key, token, ttl_to_i64(ttl_secs)).await?)
    }

    async fn release(&self, key: &str, token: &str) -> StoreResult<bool> {
        Ok(LockRepo::release(&self.pool, key, token).await?)
    }
}
