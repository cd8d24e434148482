//! Repository for the `socket_client_data` table.
//!
//! Rows expire `ttl_secs` after their last write. Expired rows are never
//! returned and are removed by [`ClientDataRepo::purge_expired`].

use sqlx::PgPool;

use crate::models::client_data::SocketClientDataRow;

const COLUMNS: &str = "socket_id, environment_id, data, expires_at, updated_at";

pub struct ClientDataRepo;

impl ClientDataRepo {
    pub async fn find(
        pool: &PgPool,
        socket_id: &str,
    ) -> Result<Option<SocketClientDataRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM socket_client_data \
             WHERE socket_id = $1 AND expires_at > now()"
        );
        sqlx::query_as::<_, SocketClientDataRow>(&query)
            .bind(socket_id)
            .fetch_optional(pool)
            .await
    }

    /// Write the whole document and push its expiry forward.
    pub async fn upsert(
        pool: &PgPool,
        socket_id: &str,
        environment_id: &str,
        data: &serde_json::Value,
        ttl_secs: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO socket_client_data (socket_id, environment_id, data, expires_at) \
             VALUES ($1, $2, $3, now() + make_interval(secs => $4)) \
             ON CONFLICT (socket_id) DO UPDATE SET \
                environment_id = EXCLUDED.environment_id, \
                data = EXCLUDED.data, \
                expires_at = EXCLUDED.expires_at, \
                updated_at = now()",
        )
        .bind(socket_id)
        .bind(environment_id)
        .bind(data)
        .bind(ttl_secs as f64)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn delete(pool: &PgPool, socket_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM socket_client_data WHERE socket_id = $1")
            .bind(socket_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn purge_expired(pool: &PgPool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM socket_client_data WHERE expires_at <= now()")
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
