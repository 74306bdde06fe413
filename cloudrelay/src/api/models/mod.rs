//! API request and response data models.
//!
//! These structures define the public JSON contract of the relay. Field names follow the
//! camelCase wire format clients already depend on, and every model is annotated with `utoipa`
//! so it appears in the generated OpenAPI document.
//!
//! - [`chat`]: prompt relay and connectivity check
//! - [`storage`]: signed upload URLs and image listings
//! - [`ocr`]: text extraction and translation results

pub mod chat;
pub mod ocr;
pub mod storage;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Generic `{ "error": ... }` body, optionally with upstream detail
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
