use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::MediaResource;
use crate::signing::SignedUrl;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub file_name: String,
    pub content_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub storage_path: String,
    pub content_type: String,
    #[serde(flatten)]
    pub delivery: SignedUrl,
}

/// Public view of a resource; never includes the storage path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDetails {
    pub id: Uuid,
    pub owner_id: String,
    pub title: String,
    pub content_type: String,
}

impl From<MediaResource> for MediaDetails {
    fn from(resource: MediaResource) -> Self {
        Self {
            id: resource.id,
            owner_id: resource.owner_id,
            title: resource.title,
            content_type: resource.content_type,
        }
    }
}

/// Inputs that identify one cached details response.
pub struct DetailsRequest {
    pub subject_id: String,
    pub media_id: Uuid,
}
