//! HTTP handlers for signed blob URLs.

use axum::{
    Json,
    extract::{Path, State},
};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::{
    AppState,
    api::models::{ErrorResponse, storage::SasUrlResponse},
    errors::{Error, Result},
    providers::SasPermission,
};

/// Blob extensions listed by `/get-images`, compared case-insensitively
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "jfif"];

/// Lifetime of every signed URL handed to clients
pub const SAS_VALIDITY_HOURS: i64 = 1;

fn sas_expiry() -> DateTime<Utc> {
    Utc::now() + Duration::hours(SAS_VALIDITY_HOURS)
}

/// Whether a blob name ends in one of [`IMAGE_EXTENSIONS`].
pub fn is_image(blob_name: &str) -> bool {
    blob_name
        .rsplit_once('.')
        .is_some_and(|(_, ext)| IMAGE_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)))
}

#[utoipa::path(
    get,
    path = "/generate-sas-url/{blobName}",
    tag = "storage",
    summary = "Issue an upload URL",
    description = "Returns a write-only signed URL for the named blob, valid for one hour.",
    params(
        ("blobName" = String, Path, description = "Name of the blob to upload"),
    ),
    responses(
        (status = 200, description = "Signed upload URL", body = SasUrlResponse),
        (status = 500, description = "Signing failed", body = ErrorResponse),
    )
)]
#[tracing::instrument(skip(state))]
pub async fn generate_sas_url(State(state): State<AppState>, Path(blob_name): Path<String>) -> Result<Json<SasUrlResponse>> {
    let sas_url = state
        .blobs
        .signed_url(&blob_name, SasPermission::Write, sas_expiry())
        .map_err(|e| Error::Upstream {
            error: e.upstream_message(),
            details: None,
        })?;

    debug!("Issued upload URL");
    Ok(Json(SasUrlResponse { sas_url }))
}

#[utoipa::path(
    get,
    path = "/get-images",
    tag = "storage",
    summary = "List images",
    description = "Returns read-only signed URLs, valid for one hour, for every image blob in the container. \
                   Responds 404 when the container holds no images.",
    responses(
        (status = 200, description = "Signed image URLs", body = Vec<String>),
        (status = 404, description = "No image blobs", body = ErrorResponse),
        (status = 500, description = "Listing or signing failed", body = ErrorResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_images(State(state): State<AppState>) -> Result<Json<Vec<String>>> {
    let names = state.blobs.list_blob_names().await.map_err(|e| Error::Upstream {
        error: e.upstream_message(),
        details: None,
    })?;

    let expires_on = sas_expiry();
    let urls = names
        .iter()
        .filter(|name| is_image(name))
        .map(|name| state.blobs.signed_url(name, SasPermission::Read, expires_on))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Upstream {
            error: e.upstream_message(),
            details: None,
        })?;

    if urls.is_empty() {
        return Err(Error::NotFound {
            message: "No images found".to_string(),
        });
    }

    info!(blobs = names.len(), images = urls.len(), "Listed images");
    Ok(Json(urls))
}
