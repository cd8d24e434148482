//! Repository for the `biz_events` table.

use sqlx::PgPool;
use waypoint_core::types::Timestamp;

use crate::models::event::{BizEvent, CreateBizEvent};

const COLUMNS: &str = "\
    id, environment_id, external_user_id, session_id, content_id, code, payload, created_at";

pub struct BizEventRepo;

impl BizEventRepo {
    /// Insert an event, returning its id.
    pub async fn insert(pool: &PgPool, input: &CreateBizEvent<'_>) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO biz_events \
                (environment_id, external_user_id, session_id, content_id, code, payload, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING id",
        )
        .bind(input.environment_id)
        .bind(input.external_user_id)
        .bind(input.session_id)
        .bind(input.content_id)
        .bind(input.code)
        .bind(input.payload)
        .bind(input.created_at)
        .fetch_one(pool)
        .await
    }

    /// A user's events, newest first, optionally bounded below by `since`.
    pub async fn list_for_user(
        pool: &PgPool,
        environment_id: &str,
        external_user_id: &str,
        since: Option<Timestamp>,
    ) -> Result<Vec<BizEvent>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM biz_events \
             WHERE environment_id = $1 AND external_user_id = $2 \
               AND ($3::timestamptz IS NULL OR created_at >= $3) \
             ORDER BY created_at DESC"
        );
        sqlx::query_as::<_, BizEvent>(&query)
            .bind(environment_id)
            .bind(external_user_id)
            .bind(since)
            .fetch_all(pool)
            .await
    }
}
