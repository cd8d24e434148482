//! Repository for the `environments` table.

use sqlx::PgPool;
use waypoint_core::hashing::sha256_hex;

use crate::models::environment::Environment;

const COLUMNS: &str = "id, project_id, name, token_hash, created_at";

pub struct EnvironmentRepo;

impl EnvironmentRepo {
    /// Resolve a raw SDK token. Tokens are stored as SHA-256 hex digests.
    pub async fn find_by_token(pool: &PgPool, token: &str) -> Result<Option<Environment>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM environments WHERE token_hash = $1");
        sqlx::query_as::<_, Environment>(&query)
            .bind(sha256_hex(token.as_bytes()))
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Environment>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM environments WHERE id = $1");
        sqlx::query_as::<_, Environment>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}
