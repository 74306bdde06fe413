//! OpenAPI documentation for the relay, served at `/api-docs/openapi.json`.

use utoipa::OpenApi;

use crate::api::{self, models};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "cloudrelay",
        description = "Relay for chat completions, signed blob URLs and image text extraction."
    ),
    paths(
        api::handlers::chat::test_api,
        api::handlers::chat::ask,
        api::handlers::storage::generate_sas_url,
        api::handlers::storage::get_images,
        api::handlers::ocr::extract_text,
    ),
    components(schemas(
        models::ErrorResponse,
        models::chat::AskRequest,
        models::chat::AskResponse,
        models::chat::ApiTestResponse,
        models::chat::ApiTestFailure,
        models::storage::SasUrlResponse,
        models::ocr::ExtractTextResponse,
    )),
    tags(
        (name = "chat", description = "Chat completion relay"),
        (name = "storage", description = "Signed blob storage URLs"),
        (name = "ocr", description = "Image text extraction and translation"),
    )
)]
pub struct ApiDoc;
