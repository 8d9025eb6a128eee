use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::preview::PreviewOptions;
use crate::routes::media::MediaDetails;
use crate::signing::SignedUrl;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePreviewRequest {
    pub resource_id: Uuid,
    #[serde(flatten)]
    pub options: PreviewOptions,
}

/// What an anonymous holder of a preview token receives.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewAccess {
    pub media: MediaDetails,
    pub stream: SignedUrl,
    pub link_expires_at: Option<DateTime<Utc>>,
    pub remaining_uses: Option<i32>,
}
