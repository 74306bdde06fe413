use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Body of `POST /ask`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AskRequest {
    /// Prompt forwarded as the sole user message. Must contain non-whitespace characters.
    #[schema(example = "Explain ownership in Rust in two sentences.")]
    pub prompt: String,
}

/// Reply of `POST /ask`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AskResponse {
    /// Content of the first completion choice, exactly as the provider returned it
    #[schema(value_type = Object)]
    pub response: Value,
}

/// Reply of a successful `GET /test-api`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiTestResponse {
    /// Always `"success"`
    pub status: String,
    /// Round trip to the chat provider in milliseconds
    pub response_time: u64,
    #[schema(value_type = Object)]
    pub content: Value,
}

/// Reply of a failed `GET /test-api`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiTestFailure {
    /// Always `"error"`
    pub status: String,
    pub error: String,
    pub code: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}
