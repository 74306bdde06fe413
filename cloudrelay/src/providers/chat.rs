//! OpenAI-compatible chat completion client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use super::{ChatProvider, ChatReply, ProviderError, Result};
use crate::config::ChatConfig;

const PROVIDER: &str = "chat provider";

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    // Kept as a raw value: some providers return structured content parts
    #[serde(default)]
    content: Value,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<Value>,
    code: Option<Value>,
}

/// Render an error `code`/`type` field, which providers send as strings, numbers or null.
fn field_to_string(value: Option<Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Makes sure a url has a trailing slash, so `join` appends instead of replacing the last
/// path segment.
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let path = format!("{}/", new_url.path());
        new_url.set_path(&path);
        new_url
    }
}

/// Chat completion client for any `/chat/completions` compatible API.
pub struct OpenAiChat {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiChat {
    pub fn new(config: &ChatConfig) -> anyhow::Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("chat.api_key is not configured"))?;

        let mut builder = Client::builder().timeout(config.timeout);
        if let Some(proxy_url) = &config.proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url.as_str())?);
        }

        let endpoint = ensure_slash(&config.base_url)
            .join("chat/completions")
            .map_err(|e| anyhow::anyhow!("Failed to construct chat completions URL: {}", e))?;

        Ok(Self {
            client: builder.build()?,
            endpoint,
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiChat {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn complete(&self, prompt: &str) -> Result<ChatReply> {
        let body = ChatCompletionRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        debug!("Sending chat completion request to {}", self.endpoint);

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|source| ProviderError::Transport { provider: PROVIDER, source })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|source| ProviderError::Transport { provider: PROVIDER, source })?;

        if !status.is_success() {
            let (message, code, kind) = match serde_json::from_str::<ErrorEnvelope>(&text) {
                Ok(ErrorEnvelope { error }) => (
                    error.message.unwrap_or_else(|| format!("HTTP {status}")),
                    field_to_string(error.code),
                    field_to_string(error.kind),
                ),
                Err(_) if text.trim().is_empty() => (format!("HTTP {status}"), None, None),
                Err(_) => (text, None, None),
            };
            return Err(ProviderError::Status {
                provider: PROVIDER,
                status,
                message,
                code,
                kind,
            });
        }

        let completion: ChatCompletionResponse = serde_json::from_str(&text).map_err(|e| ProviderError::Malformed {
            provider: PROVIDER,
            message: format!("invalid completion body: {e}"),
        })?;

        let choice = completion.choices.into_iter().next().ok_or_else(|| ProviderError::Malformed {
            provider: PROVIDER,
            message: "completion contained no choices".to_string(),
        })?;

        debug!(model = ?completion.model, "Chat completion received");

        Ok(ChatReply {
            content: choice.message.content,
            model: completion.model,
        })
    }
}
