//! Azure Computer Vision OCR client (v3.2 `ocr` operation).

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use super::{OcrProvider, ProviderError, Result, azure_status_error};
use crate::tolerant_json::{Delimiter, parse_embedded};

const PROVIDER: &str = "vision";

pub struct AzureVision {
    client: Client,
    endpoint: Url,
    api_key: String,
}

impl AzureVision {
    pub fn new(endpoint: &Url, api_key: String, timeout: std::time::Duration) -> anyhow::Result<Self> {
        let mut endpoint = endpoint.clone();
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }
        let mut endpoint = endpoint
            .join("vision/v3.2/ocr")
            .map_err(|e| anyhow::anyhow!("Failed to construct OCR URL: {}", e))?;
        endpoint
            .query_pairs_mut()
            .append_pair("language", "unk")
            .append_pair("detectOrientation", "true");

        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint,
            api_key,
        })
    }
}

#[async_trait]
impl OcrProvider for AzureVision {
    #[instrument(skip_all, fields(bytes = image.len()))]
    async fn recognize(&self, image: Vec<u8>) -> Result<Value> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image)
            .send()
            .await
            .map_err(|source| ProviderError::Transport { provider: PROVIDER, source })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| ProviderError::Transport { provider: PROVIDER, source })?;

        if !status.is_success() {
            return Err(azure_status_error(PROVIDER, status, &body));
        }

        debug!(len = body.len(), "OCR response received");
        parse_embedded(&body, Delimiter::Object).map_err(|source| ProviderError::Parse { provider: PROVIDER, source })
    }
}
