//! HTTP handler for text extraction and translation.
//!
//! The uploaded image is staged on disk, sent to the OCR provider, and the recognised text is
//! translated to English. The staged file is removed on every exit path, and callers only ever
//! see a generic failure message: the stage that failed is logged instead.

use std::path::{Path, PathBuf};

use axum::{
    Json,
    extract::{Multipart, State},
    http::StatusCode,
};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    AppState,
    api::models::{ErrorResponse, ocr::ExtractTextResponse},
    errors::{Error, Result},
    providers::{OcrClients, ProviderError},
};

/// Multipart field carrying the image
pub const IMAGE_FIELD: &str = "image";

/// Every extraction is translated into this language
pub const TARGET_LANGUAGE: &str = "en";

const PIPELINE_FAILURE: &str = "Failed to extract and translate text";

/// A failure in one stage of the extraction pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to stage upload: {0}")]
    Staging(#[from] std::io::Error),

    #[error("OCR request failed: {0}")]
    Ocr(#[source] ProviderError),

    #[error("OCR response has no regions array")]
    MissingRegions,

    #[error("no text recognised in image")]
    NoText,

    #[error("translation request failed: {0}")]
    Translation(#[source] ProviderError),

    #[error("unexpected translation response: {0}")]
    TranslationShape(&'static str),
}

/// Join every recognised word, region by region and line by line, with single spaces.
pub fn extract_words(ocr: &Value) -> std::result::Result<String, PipelineError> {
    let regions = ocr
        .get("regions")
        .and_then(Value::as_array)
        .ok_or(PipelineError::MissingRegions)?;

    let words: Vec<&str> = regions
        .iter()
        .filter_map(|region| region.get("lines").and_then(Value::as_array))
        .flatten()
        .filter_map(|line| line.get("words").and_then(Value::as_array))
        .flatten()
        .filter_map(|word| word.get("text").and_then(Value::as_str))
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .collect();

    let text = words.join(" ");
    if text.is_empty() {
        return Err(PipelineError::NoText);
    }
    Ok(text)
}

/// First translation of the first document in a translator response.
pub fn first_translation(response: &Value) -> std::result::Result<String, PipelineError> {
    let documents = response
        .as_array()
        .ok_or(PipelineError::TranslationShape("response is not an array"))?;
    let document = documents
        .first()
        .ok_or(PipelineError::TranslationShape("response array is empty"))?;
    let translations = document
        .get("translations")
        .and_then(Value::as_array)
        .ok_or(PipelineError::TranslationShape("first document has no translations array"))?;
    let translation = translations
        .first()
        .ok_or(PipelineError::TranslationShape("translations array is empty"))?;

    translation
        .get("text")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(PipelineError::TranslationShape("first translation has no text"))
}

/// Run OCR then translation over the image bytes.
pub async fn run_pipeline(clients: &OcrClients, image: Vec<u8>) -> std::result::Result<ExtractTextResponse, PipelineError> {
    let ocr = clients.vision.recognize(image).await.map_err(PipelineError::Ocr)?;
    let extracted_text = extract_words(&ocr)?;
    debug!(chars = extracted_text.chars().count(), "Text extracted");

    let translation = clients
        .translator
        .translate(&extracted_text, TARGET_LANGUAGE)
        .await
        .map_err(PipelineError::Translation)?;
    let translated_text = first_translation(&translation)?;

    Ok(ExtractTextResponse {
        extracted_text,
        translated_text,
    })
}

/// Staging file name: a fresh UUID plus the client's file name reduced to safe characters.
fn staged_path(dir: &Path, file_name: Option<&str>) -> PathBuf {
    let safe: String = file_name
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .take(64)
        .collect();
    let suffix = if safe.trim_matches('.').is_empty() { "upload".to_string() } else { safe };
    dir.join(format!("{}-{}", Uuid::new_v4(), suffix))
}

/// Write the upload to disk, read it back and run the pipeline. The staged file is removed
/// when this returns, whatever the outcome.
async fn process_upload(
    clients: &OcrClients,
    dir: &Path,
    file_name: Option<&str>,
    bytes: Vec<u8>,
) -> std::result::Result<ExtractTextResponse, PipelineError> {
    tokio::fs::create_dir_all(dir).await?;
    let path = staged_path(dir, file_name);

    let _cleanup = scopeguard::guard(path.clone(), |path| {
        if let Err(e) = std::fs::remove_file(&path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %path.display(), error = %e, "Failed to remove staged upload");
        }
    });

    tokio::fs::write(&path, &bytes).await?;
    drop(bytes);
    debug!(path = %path.display(), "Upload staged");

    let staged = tokio::fs::read(&path).await?;
    run_pipeline(clients, staged).await
}

#[utoipa::path(
    post,
    path = "/extract-text",
    tag = "ocr",
    summary = "Extract and translate text",
    description = "Recognises text in the uploaded image and translates it to English.",
    request_body(
        content_type = "multipart/form-data",
        description = "Image file in the `image` field"
    ),
    responses(
        (status = 200, description = "Extracted and translated text", body = ExtractTextResponse),
        (status = 400, description = "No image uploaded", body = ErrorResponse),
        (status = 413, description = "Image exceeds the upload size limit", body = ErrorResponse),
        (status = 500, description = "Extraction or translation failed", body = ErrorResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn extract_text(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<ExtractTextResponse>> {
    let clients = state.ocr.as_ref().ok_or_else(|| Error::Internal {
        operation: "extract text: OCR providers are not configured".to_string(),
    })?;
    let max_file_size = state.config.uploads.max_file_size;

    let multipart_error = |e: axum::extract::multipart::MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Error::PayloadTooLarge {
                message: format!("File size exceeds maximum allowed size of {max_file_size} bytes"),
            }
        } else {
            Error::BadRequest {
                message: format!("Failed to parse multipart data: {e}"),
            }
        }
    };

    let mut upload: Option<(Option<String>, Vec<u8>)> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(IMAGE_FIELD) || upload.is_some() {
            continue;
        }

        let file_name = field.file_name().map(str::to_string);
        let mut bytes = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            if (bytes.len() + chunk.len()) as u64 > max_file_size {
                warn!(max_file_size, "Upload size limit exceeded, aborting");
                return Err(Error::PayloadTooLarge {
                    message: format!("File size exceeds maximum allowed size of {max_file_size} bytes"),
                });
            }
            bytes.extend_from_slice(&chunk);
        }
        upload = Some((file_name, bytes));
    }

    // An empty file still goes to the OCR provider, whose rejection surfaces as the generic 500
    let Some((file_name, bytes)) = upload else {
        return Err(Error::BadRequest {
            message: "No file uploaded".to_string(),
        });
    };

    info!(bytes = bytes.len(), file_name = ?file_name, "Processing image");

    match process_upload(clients, &state.config.uploads.dir, file_name.as_deref(), bytes).await {
        Ok(result) => Ok(Json(result)),
        Err(e) => {
            error!(error = %e, "Text extraction failed");
            Err(Error::Upstream {
                error: PIPELINE_FAILURE.to_string(),
                details: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeOcr, FakeTranslator, TestProviders, create_test_app, create_test_config};
    use axum_test::multipart::{MultipartForm, Part};
    use serde_json::json;
    use std::sync::Arc;

    const IMAGE: &[u8] = b"\x89PNG\r\n\x1a\nfake image";

    fn ocr_document() -> Value {
        json!({
            "language": "de",
            "regions": [
                {"lines": [
                    {"words": [{"text": "Guten"}, {"text": "Morgen"}]},
                    {"words": [{"text": "Welt"}]}
                ]},
                {"lines": [{"words": [{"text": "Ende"}]}]}
            ]
        })
    }

    fn translation(text: &str) -> Value {
        json!([{"translations": [{"text": text, "to": "en"}]}])
    }

    struct Harness {
        app: axum_test::TestServer,
        providers: TestProviders,
        uploads: tempfile::TempDir,
    }

    fn harness(ocr: FakeOcr, translator: FakeTranslator) -> Harness {
        let uploads = tempfile::tempdir().unwrap();
        let mut config = create_test_config();
        config.uploads.dir = uploads.path().join("staging");
        config.uploads.max_file_size = 1024;

        let providers = TestProviders {
            ocr: Some((Arc::new(ocr), Arc::new(translator))),
            ..Default::default()
        };
        let app = create_test_app(config, &providers);
        Harness { app, providers, uploads }
    }

    impl Harness {
        fn staged_files(&self) -> usize {
            std::fs::read_dir(self.uploads.path().join("staging"))
                .map(|entries| entries.count())
                .unwrap_or(0)
        }

        fn vision(&self) -> &FakeOcr {
            &self.providers.ocr.as_ref().unwrap().0
        }

        fn translator(&self) -> &FakeTranslator {
            &self.providers.ocr.as_ref().unwrap().1
        }
    }

    fn image_form() -> MultipartForm {
        MultipartForm::new().add_part(IMAGE_FIELD, Part::bytes(IMAGE).file_name("sign.png").mime_type("image/png"))
    }

    #[test]
    fn test_extract_words_joins_regions_and_lines() {
        assert_eq!(extract_words(&ocr_document()).unwrap(), "Guten Morgen Welt Ende");
    }

    #[test]
    fn test_extract_words_requires_regions() {
        assert!(matches!(extract_words(&json!({"language": "en"})), Err(PipelineError::MissingRegions)));
        assert!(matches!(extract_words(&json!({"regions": {}})), Err(PipelineError::MissingRegions)));
        assert!(matches!(extract_words(&json!({"regions": []})), Err(PipelineError::NoText)));
    }

    #[test]
    fn test_first_translation_validation() {
        assert_eq!(first_translation(&translation("Good morning")).unwrap(), "Good morning");

        for bad in [
            json!({}),
            json!([]),
            json!([{}]),
            json!([{"translations": []}]),
            json!([{"translations": [{"to": "en"}]}]),
            json!([{"translations": [{"text": 5}]}]),
        ] {
            assert!(
                matches!(first_translation(&bad), Err(PipelineError::TranslationShape(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_staged_path_sanitises_file_name() {
        let dir = Path::new("/tmp/uploads");
        let path = staged_path(dir, Some("../../etc/passwd"));
        assert_eq!(path.parent(), Some(dir));
        assert!(path.file_name().unwrap().to_str().unwrap().ends_with("-....etcpasswd"));

        let path = staged_path(dir, None);
        assert!(path.file_name().unwrap().to_str().unwrap().ends_with("-upload"));
    }

    #[tokio::test]
    async fn test_extract_text_success() {
        let h = harness(
            FakeOcr::returning(ocr_document()),
            FakeTranslator::returning(translation("Good morning world end")),
        );

        let response = h.app.post("/extract-text").multipart(image_form()).await;

        response.assert_status_ok();
        response.assert_json(&json!({
            "extractedText": "Guten Morgen Welt Ende",
            "translatedText": "Good morning world end"
        }));
        assert_eq!(h.vision().images(), vec![IMAGE.to_vec()]);
        assert_eq!(
            h.translator().requests(),
            vec![("Guten Morgen Welt Ende".to_string(), "en".to_string())]
        );
        assert_eq!(h.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_ocr_failure_is_masked_and_file_removed() {
        let h = harness(
            FakeOcr::failing("Input data is not a valid image."),
            FakeTranslator::returning(translation("unused")),
        );

        let response = h.app.post("/extract-text").multipart(image_form()).await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        response.assert_json(&json!({"error": "Failed to extract and translate text"}));
        assert!(h.translator().requests().is_empty());
        assert_eq!(h.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_missing_regions_fails() {
        let h = harness(
            FakeOcr::returning(json!({"language": "en"})),
            FakeTranslator::returning(translation("unused")),
        );

        let response = h.app.post("/extract-text").multipart(image_form()).await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(h.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_bad_translation_shape_fails() {
        let h = harness(
            FakeOcr::returning(ocr_document()),
            FakeTranslator::returning(json!([{"translations": []}])),
        );

        let response = h.app.post("/extract-text").multipart(image_form()).await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        response.assert_json(&json!({"error": "Failed to extract and translate text"}));
        assert_eq!(h.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_missing_image_field() {
        let h = harness(FakeOcr::returning(ocr_document()), FakeTranslator::returning(translation("x")));

        let form = MultipartForm::new().add_part("file", Part::bytes(IMAGE).file_name("sign.png"));
        let response = h.app.post("/extract-text").multipart(form).await;

        response.assert_status(StatusCode::BAD_REQUEST);
        response.assert_json(&json!({"error": "No file uploaded"}));
        assert!(h.vision().images().is_empty());
    }

    #[tokio::test]
    async fn test_empty_image_is_rejected_by_provider_with_generic_500() {
        let h = harness(
            FakeOcr::failing("Input data is not a valid image."),
            FakeTranslator::returning(translation("x")),
        );

        let form = MultipartForm::new().add_part(IMAGE_FIELD, Part::bytes(Vec::<u8>::new()).file_name("empty.png"));
        let response = h.app.post("/extract-text").multipart(form).await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        response.assert_json(&json!({"error": "Failed to extract and translate text"}));
        assert_eq!(h.vision().images(), vec![Vec::<u8>::new()]);
        assert!(h.translator().requests().is_empty());
        assert_eq!(h.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_translation_failure_is_masked_and_file_removed() {
        let h = harness(
            FakeOcr::returning(ocr_document()),
            FakeTranslator::failing("The request is not authorized because credentials are missing or invalid."),
        );

        let response = h.app.post("/extract-text").multipart(image_form()).await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        response.assert_json(&json!({"error": "Failed to extract and translate text"}));
        assert_eq!(h.translator().requests().len(), 1);
        assert_eq!(h.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_oversized_upload_rejected() {
        let h = harness(FakeOcr::returning(ocr_document()), FakeTranslator::returning(translation("x")));

        let form = MultipartForm::new().add_part(IMAGE_FIELD, Part::bytes(vec![7u8; 4096]).file_name("big.png"));
        let response = h.app.post("/extract-text").multipart(form).await;

        response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
        assert!(h.vision().images().is_empty());
        assert_eq!(h.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_route_absent_without_ocr_providers() {
        let providers = TestProviders::default();
        let app = create_test_app(create_test_config(), &providers);

        let response = app.post("/extract-text").multipart(image_form()).await;

        response.assert_status(StatusCode::NOT_FOUND);
    }
}
