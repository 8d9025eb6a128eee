use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::models::preview_link::PreviewLink;
use crate::store::StoreError;

const LINK_COLUMNS: &str =
    "id, token, resource_id, created_by, expires_at, max_uses, use_count, created_at";

#[async_trait]
pub trait LinkStore: Send + Sync {
    async fn create(&self, link: &PreviewLink) -> Result<(), StoreError>;

    async fn find_by_token(&self, token: &str) -> Result<Option<PreviewLink>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PreviewLink>, StoreError>;

    /// Links created by `creator`, newest first.
    async fn find_by_creator(&self, creator: &str) -> Result<Vec<PreviewLink>, StoreError>;

    /// Deletes a link and records a tombstone for it in the same statement.
    /// Returns false when the link was already gone.
    async fn delete(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Creator of a link that was deleted or swept, if a tombstone exists.
    async fn find_removed(&self, id: Uuid) -> Result<Option<String>, StoreError>;

    /// Increments `use_count` only if the link is unexpired at `now` and under
    /// `max_uses`, as one conditional write. Returns the updated record when
    /// the use was granted.
    async fn consume_use(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PreviewLink>, StoreError>;

    /// Deletes links expired before `now`, leaving tombstones behind.
    async fn delete_expired_before(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

pub struct PgLinkStore {
    pool: PgPool,
}

impl PgLinkStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LinkStore for PgLinkStore {
    async fn create(&self, link: &PreviewLink) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO preview_links
                (id, token, resource_id, created_by, expires_at, max_uses, use_count, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(link.id)
        .bind(&link.token)
        .bind(link.resource_id)
        .bind(&link.created_by)
        .bind(link.expires_at)
        .bind(link.max_uses)
        .bind(link.use_count)
        .bind(link.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<PreviewLink>, StoreError> {
        let link = sqlx::query_as::<_, PreviewLink>(&format!(
            "SELECT {LINK_COLUMNS} FROM preview_links WHERE token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(link)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PreviewLink>, StoreError> {
        let link = sqlx::query_as::<_, PreviewLink>(&format!(
            "SELECT {LINK_COLUMNS} FROM preview_links WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(link)
    }

    async fn find_by_creator(&self, creator: &str) -> Result<Vec<PreviewLink>, StoreError> {
        let links = sqlx::query_as::<_, PreviewLink>(&format!(
            "SELECT {LINK_COLUMNS} FROM preview_links \
             WHERE created_by = $1 \
             ORDER BY created_at DESC"
        ))
        .bind(creator)
        .fetch_all(&self.pool)
        .await?;

        Ok(links)
    }

    async fn delete(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            WITH removed AS (
                DELETE FROM preview_links WHERE id = $1 RETURNING id, created_by
            )
            INSERT INTO preview_link_tombstones (id, created_by, removed_at)
            SELECT id, created_by, $2 FROM removed
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_removed(&self, id: Uuid) -> Result<Option<String>, StoreError> {
        let creator = sqlx::query_scalar::<_, String>(
            "SELECT created_by FROM preview_link_tombstones WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(creator)
    }

    async fn consume_use(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PreviewLink>, StoreError> {
        // Concurrent updates of the same row serialize on its row lock and
        // re-check the predicate, so the last slot goes to exactly one caller.
        let link = sqlx::query_as::<_, PreviewLink>(&format!(
            "UPDATE preview_links SET use_count = use_count + 1 \
             WHERE token = $1 \
               AND (expires_at IS NULL OR expires_at >= $2) \
               AND (max_uses IS NULL OR use_count < max_uses) \
             RETURNING {LINK_COLUMNS}"
        ))
        .bind(token)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(link)
    }

    async fn delete_expired_before(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            WITH removed AS (
                DELETE FROM preview_links WHERE expires_at < $1 RETURNING id, created_by
            )
            INSERT INTO preview_link_tombstones (id, created_by, removed_at)
            SELECT id, created_by, $1 FROM removed
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
