use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::models::media::MediaResource;
use crate::store::StoreError;

/// Read-only view of the media catalog, owned by another service.
#[async_trait]
pub trait ResourceDirectory: Send + Sync {
    async fn find(&self, resource_id: Uuid) -> Result<Option<MediaResource>, StoreError>;
}

pub struct PgResourceDirectory {
    pool: PgPool,
}

impl PgResourceDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceDirectory for PgResourceDirectory {
    async fn find(&self, resource_id: Uuid) -> Result<Option<MediaResource>, StoreError> {
        let resource = sqlx::query_as::<_, MediaResource>(
            r#"
            SELECT id, owner_id, title, content_type, storage_path
            FROM media_resources
            WHERE id = $1
            "#,
        )
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(resource)
    }
}
