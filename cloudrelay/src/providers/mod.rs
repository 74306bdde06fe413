//! Clients for the external services this relay fronts.
//!
//! Each provider is defined by a trait so handlers can be exercised against fakes, with one
//! reqwest-backed implementation per trait:
//!
//! - [`ChatProvider`] / [`chat::OpenAiChat`]: OpenAI-compatible chat completions
//! - [`BlobStore`] / [`blob::AzureBlobStore`]: Azure Blob Storage SAS signing and listing
//! - [`OcrProvider`] / [`vision::AzureVision`]: Azure Computer Vision OCR
//! - [`Translator`] / [`translator::AzureTranslator`]: Azure Translator
//!
//! Provider clients are constructed once at startup and shared through [`crate::AppState`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;

use crate::tolerant_json::{Delimiter, EmbeddedJsonError, parse_embedded};

pub mod blob;
pub mod chat;
pub mod translator;
pub mod vision;

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors that can occur while talking to a provider
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The request never produced a response (connect failure, timeout, body read error)
    #[error("request to {provider} failed: {source}")]
    Transport {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The provider answered with a non-success status
    #[error("{provider} returned {status}: {message}")]
    Status {
        provider: &'static str,
        status: StatusCode,
        message: String,
        code: Option<String>,
        kind: Option<String>,
    },

    /// The provider answered, but not with the shape we expect
    #[error("unexpected response from {provider}: {message}")]
    Malformed { provider: &'static str, message: String },

    #[error("unparseable response from {provider}: {source}")]
    Parse {
        provider: &'static str,
        #[source]
        source: EmbeddedJsonError,
    },

    /// A signed URL could not be produced
    #[error("failed to sign request: {0}")]
    Signing(String),
}

impl ProviderError {
    /// Message suitable for surfacing to API callers on the paths that expose upstream detail.
    pub fn upstream_message(&self) -> String {
        match self {
            ProviderError::Status { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Provider error code, when the provider supplied one
    pub fn code(&self) -> Option<&str> {
        match self {
            ProviderError::Status { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Provider error type, when the provider supplied one
    pub fn kind(&self) -> Option<&str> {
        match self {
            ProviderError::Status { kind, .. } => kind.as_deref(),
            _ => None,
        }
    }
}

/// Build a status error from an Azure AI services error body
/// (`{"error": {"code": ..., "message": ...}}`), falling back to the raw body.
fn azure_status_error(provider: &'static str, status: StatusCode, body: &str) -> ProviderError {
    let parsed: Option<Value> = parse_embedded(body, Delimiter::Object).ok();
    let error = parsed.as_ref().map(|v| &v["error"]);
    let field = |name: &str| {
        error
            .and_then(|e| e.get(name))
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
    };

    let message = field("message").unwrap_or_else(|| {
        if body.trim().is_empty() {
            format!("HTTP {status}")
        } else {
            body.trim().to_string()
        }
    });

    ProviderError::Status {
        provider,
        status,
        message,
        code: field("code"),
        kind: None,
    }
}

/// Content of the first choice of a chat completion, exactly as the provider returned it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub content: Value,
    pub model: Option<String>,
}

/// A chat completion API.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Send `prompt` as the sole user message and return the reply content.
    async fn complete(&self, prompt: &str) -> Result<ChatReply>;
}

/// Access scope granted by a signed URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SasPermission {
    Read,
    Write,
    List,
}

impl SasPermission {
    /// Permission letter in the `sp` query parameter
    pub fn as_str(self) -> &'static str {
        match self {
            SasPermission::Read => "r",
            SasPermission::Write => "w",
            SasPermission::List => "l",
        }
    }
}

/// A blob container that can issue signed URLs for its objects.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Signed URL granting `permission` on `blob_name` until `expires_on`.
    fn signed_url(&self, blob_name: &str, permission: SasPermission, expires_on: DateTime<Utc>) -> Result<String>;

    /// Names of every blob in the container, across all result pages.
    async fn list_blob_names(&self) -> Result<Vec<String>>;
}

/// An optical character recognition API.
#[async_trait]
pub trait OcrProvider: Send + Sync {
    /// Recognise text in an image, returning the provider's JSON document.
    async fn recognize(&self, image: Vec<u8>) -> Result<Value>;
}

/// A text translation API.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text` into `to`, returning the provider's JSON document.
    async fn translate(&self, text: &str, to: &str) -> Result<Value>;
}

/// The two providers behind the text extraction pipeline.
#[derive(Clone)]
pub struct OcrClients {
    pub vision: Arc<dyn OcrProvider>,
    pub translator: Arc<dyn Translator>,
}
