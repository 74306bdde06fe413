use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Reply of `GET /generate-sas-url/{blobName}`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SasUrlResponse {
    /// Write-only URL for the blob, valid for one hour
    pub sas_url: String,
}
