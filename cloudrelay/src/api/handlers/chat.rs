//! HTTP handlers for the chat relay endpoints.

use std::time::Instant;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use tracing::{debug, info};

use crate::{
    AppState,
    api::models::{
        ErrorResponse,
        chat::{ApiTestFailure, ApiTestResponse, AskRequest, AskResponse},
    },
    errors::{Error, Result},
};

const INVALID_PROMPT: &str = "Prompt is required and must be a non-empty string";
const LLM_FAILURE: &str = "Failed to get response from LLM";

#[utoipa::path(
    get,
    path = "/test-api",
    tag = "chat",
    summary = "Check chat provider connectivity",
    description = "Sends a fixed diagnostic prompt to the chat provider and reports the round trip time.",
    responses(
        (status = 200, description = "Provider answered", body = ApiTestResponse),
        (status = 500, description = "Provider call failed", body = ApiTestFailure),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn test_api(State(state): State<AppState>) -> Result<Json<ApiTestResponse>> {
    let started = Instant::now();

    let reply = state
        .chat
        .complete(&state.config.chat.test_prompt)
        .await
        .map_err(|e| Error::ApiTest {
            message: e.upstream_message(),
            code: e.code().map(str::to_string),
            kind: e.kind().map(str::to_string),
        })?;

    let response_time = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    info!(response_time_ms = response_time, model = ?reply.model, "Chat provider check succeeded");

    Ok(Json(ApiTestResponse {
        status: "success".to_string(),
        response_time,
        content: reply.content,
    }))
}

#[utoipa::path(
    post,
    path = "/ask",
    tag = "chat",
    summary = "Ask the LLM",
    description = "Forwards the prompt as a single user message and returns the first choice content unmodified.",
    request_body = AskRequest,
    responses(
        (status = 200, description = "Completion content", body = AskResponse),
        (status = 400, description = "Missing, empty or non-string prompt", body = ErrorResponse),
        (status = 500, description = "Provider call failed", body = ErrorResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn ask(State(state): State<AppState>, payload: std::result::Result<Json<AskRequest>, JsonRejection>) -> Result<Json<AskResponse>> {
    let Json(request) = payload.map_err(|rejection| {
        debug!(%rejection, "Rejected /ask body");
        Error::BadRequest {
            message: INVALID_PROMPT.to_string(),
        }
    })?;

    if request.prompt.trim().is_empty() {
        return Err(Error::BadRequest {
            message: INVALID_PROMPT.to_string(),
        });
    }

    let reply = state.chat.complete(&request.prompt).await.map_err(|e| Error::Upstream {
        error: LLM_FAILURE.to_string(),
        details: Some(e.upstream_message()),
    })?;

    Ok(Json(AskResponse { response: reply.content }))
}
