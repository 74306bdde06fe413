//! Azure Translator client (v3 `translate` operation).

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, instrument};
use url::Url;
use uuid::Uuid;

use super::{ProviderError, Result, Translator, azure_status_error};
use crate::tolerant_json::{Delimiter, parse_embedded};

const PROVIDER: &str = "translator";

pub struct AzureTranslator {
    client: Client,
    endpoint: Url,
    api_key: String,
    region: Option<String>,
}

impl AzureTranslator {
    pub fn new(endpoint: &Url, api_key: String, region: Option<String>, timeout: std::time::Duration) -> anyhow::Result<Self> {
        let mut endpoint = endpoint.clone();
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }
        let endpoint = endpoint
            .join("translate")
            .map_err(|e| anyhow::anyhow!("Failed to construct translate URL: {}", e))?;

        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint,
            api_key,
            region: region.filter(|r| !r.trim().is_empty()),
        })
    }
}

#[async_trait]
impl Translator for AzureTranslator {
    #[instrument(skip(self, text), fields(chars = text.chars().count()))]
    async fn translate(&self, text: &str, to: &str) -> Result<Value> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("api-version", "3.0").append_pair("to", to);

        let trace_id = Uuid::new_v4();
        let mut request = self
            .client
            .post(url)
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .header("X-ClientTraceId", trace_id.to_string())
            .json(&json!([{ "text": text }]));
        if let Some(region) = &self.region {
            request = request.header("Ocp-Apim-Subscription-Region", region);
        }

        let response = request
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

        debug!(%trace_id, "Translation response received");
        parse_embedded(&body, Delimiter::Array).map_err(|source| ProviderError::Parse { provider: PROVIDER, source })
    }
}
