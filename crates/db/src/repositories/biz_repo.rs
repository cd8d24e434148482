//! Repository for end users, companies, memberships, segments and
//! per-content history.

use sqlx::PgPool;

use crate::models::biz::{BizContentState, BizEntity, BizMembership};

const ENTITY_COLUMNS: &str = "environment_id, external_id, attributes, created_at, updated_at";

pub struct BizRepo;

impl BizRepo {
    async fn upsert_entity(
        pool: &PgPool,
        table: &str,
        environment_id: &str,
        external_id: &str,
        attributes: &serde_json::Value,
    ) -> Result<BizEntity, sqlx::Error> {
        let query = format!(
            "INSERT INTO {table} (environment_id, external_id, attributes) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (environment_id, external_id) \
             DO UPDATE SET attributes = EXCLUDED.attributes, updated_at = now() \
             RETURNING {ENTITY_COLUMNS}"
        );
        sqlx::query_as::<_, BizEntity>(&query)
            .bind(environment_id)
            .bind(external_id)
            .bind(attributes)
            .fetch_one(pool)
            .await
    }

    async fn find_entity(
        pool: &PgPool,
        table: &str,
        environment_id: &str,
        external_id: &str,
    ) -> Result<Option<BizEntity>, sqlx::Error> {
        let query = format!(
            "SELECT {ENTITY_COLUMNS} FROM {table} WHERE environment_id = $1 AND external_id = $2"
        );
        sqlx::query_as::<_, BizEntity>(&query)
            .bind(environment_id)
            .bind(external_id)
            .fetch_optional(pool)
            .await
    }

    /// Replace a user's attribute snapshot, creating the user if needed.
    pub async fn upsert_user(
        pool: &PgPool,
        environment_id: &str,
        external_id: &str,
        attributes: &serde_json::Value,
    ) -> Result<BizEntity, sqlx::Error> {
        Self::upsert_entity(pool, "biz_users", environment_id, external_id, attributes).await
    }

    pub async fn find_user(
        pool: &PgPool,
        environment_id: &str,
        external_id: &str,
    ) -> Result<Option<BizEntity>, sqlx::Error> {
        Self::find_entity(pool, "biz_users", environment_id, external_id).await
    }

    pub async fn upsert_company(
        pool: &PgPool,
        environment_id: &str,
        external_id: &str,
        attributes: &serde_json::Value,
    ) -> Result<BizEntity, sqlx::Error> {
        Self::upsert_entity(pool, "biz_companies", environment_id, external_id, attributes).await
    }

    pub async fn find_company(
        pool: &PgPool,
        environment_id: &str,
        external_id: &str,
    ) -> Result<Option<BizEntity>, sqlx::Error> {
        Self::find_entity(pool, "biz_companies", environment_id, external_id).await
    }

    pub async fn upsert_membership(
        pool: &PgPool,
        environment_id: &str,
        external_user_id: &str,
        external_company_id: &str,
        attributes: &serde_json::Value,
    ) -> Result<BizMembership, sqlx::Error> {
        sqlx::query_as::<_, BizMembership>(
            "INSERT INTO biz_memberships \
                (environment_id, external_user_id, external_company_id, attributes) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (environment_id, external_user_id, external_company_id) \
             DO UPDATE SET attributes = EXCLUDED.attributes, updated_at = now() \
             RETURNING environment_id, external_user_id, external_company_id, attributes, updated_at",
        )
        .bind(environment_id)
        .bind(external_user_id)
        .bind(external_company_id)
        .bind(attributes)
        .fetch_one(pool)
        .await
    }

    pub async fn find_membership(
        pool: &PgPool,
        environment_id: &str,
        external_user_id: &str,
        external_company_id: &str,
    ) -> Result<Option<BizMembership>, sqlx::Error> {
        sqlx::query_as::<_, BizMembership>(
            "SELECT environment_id, external_user_id, external_company_id, attributes, updated_at \
             FROM biz_memberships \
             WHERE environment_id = $1 AND external_user_id = $2 AND external_company_id = $3",
        )
        .bind(environment_id)
        .bind(external_user_id)
        .bind(external_company_id)
        .fetch_optional(pool)
        .await
    }

    /// Segment ids the user is a member of.
    pub async fn list_segments(
        pool: &PgPool,
        environment_id: &str,
        external_user_id: &str,
    ) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            "SELECT segment_id FROM biz_segment_members \
             WHERE environment_id = $1 AND external_user_id = $2",
        )
        .bind(environment_id)
        .bind(external_user_id)
        .fetch_all(pool)
        .await
    }

    pub async fn list_content_states(
        pool: &PgPool,
        environment_id: &str,
        external_user_id: &str,
    ) -> Result<Vec<BizContentState>, sqlx::Error> {
        sqlx::query_as::<_, BizContentState>(
            "SELECT content_id, actived, seen, completed FROM biz_content_states \
             WHERE environment_id = $1 AND external_user_id = $2",
        )
        .bind(environment_id)
        .bind(external_user_id)
        .fetch_all(pool)
        .await
    }

    /// Update a user's history for one content. `None` leaves a flag as is.
    pub async fn upsert_content_state(
        pool: &PgPool,
        environment_id: &str,
        external_user_id: &str,
        content_id: &str,
        actived: Option<bool>,
        seen: Option<bool>,
        completed: Option<bool>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO biz_content_states \
                (environment_id, external_user_id, content_id, actived, seen, completed) \
             VALUES ($1, $2, $3, COALESCE($4, false), COALESCE($5, false), COALESCE($6, false)) \
             ON CONFLICT (environment_id, external_user_id, content_id) DO UPDATE SET \
                actived = COALESCE($4, biz_content_states.actived), \
                seen = COALESCE($5, biz_content_states.seen), \
                completed = COALESCE($6, biz_content_states.completed), \
                updated_at = now()",
        )
        .bind(environment_id)
        .bind(external_user_id)
        .bind(content_id)
        .bind(actived)
        .bind(seen)
        .bind(completed)
        .execute(pool)
        .await?;
        Ok(())
    }
}
