//! Repository for the `distributed_locks` table.
//!
//! A lock is a row keyed by name holding the owner's random token. It can be
//! taken when absent or expired, and only the holder of the token can
//! release it.

use sqlx::PgPool;

pub struct LockRepo;

impl LockRepo {
    /// Try to take `lock_key` for `ttl_secs`. Returns `true` on success.
    pub async fn try_acquire(
        pool: &PgPool,
        lock_key: &str,
        token: &str,
        ttl_secs: i64,
    ) -> Result<bool, sqlx::Error> {
        let acquired = sqlx::query_scalar::<_, String>(
            "INSERT INTO distributed_locks (lock_key, token, expires_at) \
             VALUES ($1, $2, now() + make_interval(secs => $3)) \
             ON CONFLICT (lock_key) DO UPDATE SET \
                token = EXCLUDED.token, expires_at = EXCLUDED.expires_at \
             WHERE distributed_locks.expires_at <= now() \
             RETURNING lock_key",
        )
        .bind(lock_key)
        .bind(token)
        .bind(ttl_secs as f64)
        .fetch_optional(pool)
        .await?;
        Ok(acquired.is_some())
    }

    /// Release `lock_key` if it is still held with `token`.
    pub async fn release(pool: &PgPool, lock_key: &str, token: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM distributed_locks WHERE lock_key = $1 AND token = $2")
            .bind(lock_key)
            .bind(token)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
