use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Reply of `POST /extract-text`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtractTextResponse {
    /// Text recognised in the image, words joined by single spaces
    pub extracted_text: String,
    /// `extracted_text` translated to English
    pub translated_text: String,
}
