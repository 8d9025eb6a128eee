use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A protected media item as seen by access control: who owns it and where
/// its bytes live on the delivery edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MediaResource {
    pub id: Uuid,
    pub owner_id: String,
    pub title: String,
    pub content_type: String,
    #[serde(skip_serializing)]
    pub storage_path: String,
}
