//! Repository for published content and attribute definitions.

use sqlx::PgPool;

use crate::models::content::{AttributeDefinitionRow, PublishedContent};

const COLUMNS: &str = "\
    content_id, environment_id, content_type, name, version_id, version, published_at";

pub struct ContentRepo;

impl ContentRepo {
    /// All published content in an environment, oldest publication first.
    pub async fn list_published(
        pool: &PgPool,
        environment_id: &str,
    ) -> Result<Vec<PublishedContent>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM published_contents \
             WHERE environment_id = $1 ORDER BY published_at, content_id"
        );
        sqlx::query_as::<_, PublishedContent>(&query)
            .bind(environment_id)
            .fetch_all(pool)
            .await
    }

    pub async fn find_published(
        pool: &PgPool,
        environment_id: &str,
        content_id: &str,
    ) -> Result<Option<PublishedContent>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM published_contents \
             WHERE environment_id = $1 AND content_id = $2"
        );
        sqlx::query_as::<_, PublishedContent>(&query)
            .bind(environment_id)
            .bind(content_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_attribute_definitions(
        pool: &PgPool,
        environment_id: &str,
    ) -> Result<Vec<AttributeDefinitionRow>, sqlx::Error> {
        sqlx::query_as::<_, AttributeDefinitionRow>(
            "SELECT environment_id, biz_type, code_name, data_type \
             FROM attribute_definitions WHERE environment_id = $1",
        )
        .bind(environment_id)
        .fetch_all(pool)
        .await
    }

    /// Insert definitions that are not known yet. Existing definitions keep
    /// their declared data type.
    pub async fn insert_missing_definitions(
        pool: &PgPool,
        environment_id: &str,
        definitions: &[(String, String, String)],
    ) -> Result<u64, sqlx::Error> {
        let mut inserted = 0;
        for (biz_type, code_name, data_type) in definitions {
            inserted += sqlx::query(
                "INSERT INTO attribute_definitions (environment_id, biz_type, code_name, data_type) \
                 VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING",
            )
            .bind(environment_id)
            .bind(biz_type)
            .bind(code_name)
            .bind(data_type)
            .execute(pool)
            .await?
            .rows_affected();
        }
        Ok(inserted)
    }
}
