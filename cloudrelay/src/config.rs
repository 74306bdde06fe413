//! Application configuration management.
//!
//! Configuration is loaded from an optional YAML file with environment variable overrides. The
//! file path defaults to `config.yaml` but can be specified via the `-f` flag or the
//! `CLOUDRELAY_CONFIG` environment variable.
//!
//! ## Loading Priority
//!
//! Sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`, may be absent)
//! 2. **Prefixed environment variables** - `CLOUDRELAY_` variables, `__` separates nesting
//!    levels, e.g. `CLOUDRELAY_CHAT__MODEL=gpt-4o`
//! 3. **Provider environment variables** - the conventional names used by provider SDKs:
//!
//! | Variable | Config key |
//! |---|---|
//! | `OPENAI_API_KEY` | `chat.api_key` |
//! | `AZURE_STORAGE_ACCOUNT_NAME` | `storage.account_name` |
//! | `AZURE_STORAGE_ACCOUNT_KEY` | `storage.account_key` |
//! | `AZURE_STORAGE_CONTAINER_NAME` | `storage.container_name` |
//! | `AZURE_VISION_ENDPOINT` | `vision.endpoint` |
//! | `AZURE_VISION_KEY` | `vision.api_key` |
//! | `AZURE_TRANSLATOR_ENDPOINT` | `translator.endpoint` |
//! | `AZURE_TRANSLATOR_KEY` | `translator.api_key` |
//! | `AZURE_TRANSLATOR_REGION` | `translator.region` |
//!
//! ## Required credentials
//!
//! The chat API key, storage account name, storage account key and container name must all be
//! present. [`Config::load`] fails when any of them is missing, and the binary exits before the
//! HTTP listener is bound.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use cloudrelay::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```

use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
    value::Uncased,
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

use crate::errors::Error;

/// Raw environment variables accepted in addition to the `CLOUDRELAY_` prefix, and the config
/// keys they populate.
const PROVIDER_ENV_ALIASES: &[(&str, &str)] = &[
    ("OPENAI_API_KEY", "chat.api_key"),
    ("AZURE_STORAGE_ACCOUNT_NAME", "storage.account_name"),
    ("AZURE_STORAGE_ACCOUNT_KEY", "storage.account_key"),
    ("AZURE_STORAGE_CONTAINER_NAME", "storage.container_name"),
    ("AZURE_VISION_ENDPOINT", "vision.endpoint"),
    ("AZURE_VISION_KEY", "vision.api_key"),
    ("AZURE_TRANSLATOR_ENDPOINT", "translator.endpoint"),
    ("AZURE_TRANSLATOR_KEY", "translator.api_key"),
    ("AZURE_TRANSLATOR_REGION", "translator.region"),
];

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "CLOUDRELAY_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have defaults except the provider credentials, which are checked by
/// [`Config::validate`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Console log output format
    pub log_format: LogFormat,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Cross-origin request policy
    pub cors: CorsConfig,
    /// Chat completion provider
    pub chat: ChatConfig,
    /// Blob storage account used for signed URLs and listing
    pub storage: StorageConfig,
    /// OCR provider (optional, enables `/extract-text` together with `translator`)
    pub vision: VisionConfig,
    /// Translation provider (optional, enables `/extract-text` together with `vision`)
    pub translator: TranslatorConfig,
    /// Temporary storage for uploaded images
    pub uploads: UploadsConfig,
    /// Request limits applied before any handler runs
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable multi-field lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins. `*` allows any origin.
    pub allowed_origins: Vec<String>,
    /// Preflight cache lifetime in seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            max_age: None,
        }
    }
}

/// OpenAI-compatible chat completion provider.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChatConfig {
    /// API key sent as a bearer token (required)
    pub api_key: Option<String>,
    /// Base URL of the API; `chat/completions` is joined onto it
    pub base_url: Url,
    /// Fixed model identifier used for every request
    pub model: String,
    /// Token budget for every completion
    pub max_tokens: u32,
    /// Outbound request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Optional HTTP proxy for chat requests only
    pub proxy_url: Option<Url>,
    /// Prompt sent by `/test-api`
    pub test_prompt: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: Url::parse("https://api.openai.com/v1/").expect("static URL is valid"),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 1000,
            timeout: Duration::from_secs(60),
            proxy_url: None,
            test_prompt: "Say hello in one short sentence.".to_string(),
        }
    }
}

// Hand-written so the API key never reaches the logs
impl std::fmt::Debug for ChatConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url.as_str())
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .field("proxy_url", &self.proxy_url.as_ref().map(Url::as_str))
            .field("test_prompt", &self.test_prompt)
            .finish()
    }
}

/// Azure Blob Storage account.
#[derive(Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Storage account name (required)
    pub account_name: Option<String>,
    /// Base64 storage account key (required)
    pub account_key: Option<String>,
    /// Container holding the images (required)
    pub container_name: Option<String>,
    /// Blob service endpoint. Defaults to `https://{account}.blob.core.windows.net`.
    pub endpoint: Option<Url>,
}

impl StorageConfig {
    /// Blob service endpoint, derived from the account name unless overridden.
    pub fn endpoint_url(&self) -> anyhow::Result<Url> {
        if let Some(endpoint) = &self.endpoint {
            return Ok(endpoint.clone());
        }
        let account = self
            .account_name
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("storage.account_name is not configured"))?;
        Ok(Url::parse(&format!("https://{account}.blob.core.windows.net"))?)
    }
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("account_name", &self.account_name)
            .field("account_key", &self.account_key.as_ref().map(|_| "<redacted>"))
            .field("container_name", &self.container_name)
            .field("endpoint", &self.endpoint.as_ref().map(Url::as_str))
            .finish()
    }
}

/// Azure Computer Vision OCR.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct VisionConfig {
    /// Resource endpoint, e.g. `https://my-vision.cognitiveservices.azure.com/`
    pub endpoint: Option<Url>,
    pub api_key: Option<String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            timeout: Duration::from_secs(60),
        }
    }
}

impl std::fmt::Debug for VisionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionConfig")
            .field("endpoint", &self.endpoint.as_ref().map(Url::as_str))
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Azure Translator.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TranslatorConfig {
    pub endpoint: Url,
    pub api_key: Option<String>,
    /// Resource region, required for regional and multi-service resources
    pub region: Option<String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            endpoint: Url::parse("https://api.cognitive.microsofttranslator.com/").expect("static URL is valid"),
            api_key: None,
            region: None,
            timeout: Duration::from_secs(60),
        }
    }
}

impl std::fmt::Debug for TranslatorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslatorConfig")
            .field("endpoint", &self.endpoint.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("region", &self.region)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadsConfig {
    /// Directory where uploaded images are staged while being processed
    pub dir: PathBuf,
    /// Maximum accepted upload size in bytes
    pub max_file_size: u64,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir().join("cloudrelay-uploads"),
            max_file_size: 10 * 1024 * 1024,
        }
    }
}

/// Resource limits for protecting upstream quotas.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    pub requests: RequestLimitsConfig,
}

/// Fixed-window request rate limit per client.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequestLimitsConfig {
    /// Requests allowed per client per window. 0 disables rate limiting.
    pub max_requests: u32,
    /// Window length
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Identify clients by the first `X-Forwarded-For` entry instead of the peer address.
    /// Only enable behind a proxy that overwrites the header.
    pub trust_forwarded_for: bool,
}

impl Default for RequestLimitsConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(15 * 60),
            trust_forwarded_for: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_format: LogFormat::default(),
            enable_otel_export: false,
            enable_metrics: false,
            cors: CorsConfig::default(),
            chat: ChatConfig::default(),
            storage: StorageConfig::default(),
            vision: VisionConfig::default(),
            translator: TranslatorConfig::default(),
            uploads: UploadsConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

/// Fully resolved OCR variant settings, present only when both providers are configured.
#[derive(Debug, Clone)]
pub struct OcrSettings {
    pub vision_endpoint: Url,
    pub vision_key: String,
    pub vision_timeout: Duration,
    pub translator_endpoint: Url,
    pub translator_key: String,
    pub translator_region: Option<String>,
    pub translator_timeout: Duration,
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can override specific values
            // CLOUDRELAY_CONFIG names the file itself and is consumed by clap
            .merge(Env::prefixed("CLOUDRELAY_").ignore(&["config"]).split("__"))
            // Provider SDK variable names
            .merge(
                Env::raw()
                    .only(&PROVIDER_ENV_ALIASES.iter().map(|(var, _)| *var).collect::<Vec<_>>())
                    .map(|var| {
                        PROVIDER_ENV_ALIASES
                            .iter()
                            .find(|(name, _)| var.as_str().eq_ignore_ascii_case(name))
                            .map(|(_, key)| Uncased::from(*key))
                            .unwrap_or_else(|| Uncased::from(var.as_str().to_owned()))
                    }),
            )
    }

    /// Names of the required credentials that are absent or blank.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if is_blank(&self.chat.api_key) {
            missing.push("chat.api_key (OPENAI_API_KEY)");
        }
        if is_blank(&self.storage.account_name) {
            missing.push("storage.account_name (AZURE_STORAGE_ACCOUNT_NAME)");
        }
        if is_blank(&self.storage.account_key) {
            missing.push("storage.account_key (AZURE_STORAGE_ACCOUNT_KEY)");
        }
        if is_blank(&self.storage.container_name) {
            missing.push("storage.container_name (AZURE_STORAGE_CONTAINER_NAME)");
        }
        missing
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        let missing = self.missing_credentials();
        if !missing.is_empty() {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: missing required credentials: {}. \
                     Set them in the config file or via environment variables.",
                    missing.join(", ")
                ),
            });
        }

        if let Some(key) = self.storage.account_key.as_deref()
            && BASE64_STANDARD.decode(key.trim()).is_err()
        {
            return Err(Error::Internal {
                operation: "Config validation: storage.account_key is not valid base64".to_string(),
            });
        }

        if self.limits.requests.max_requests > 0 && self.limits.requests.window.is_zero() {
            return Err(Error::Internal {
                operation: "Config validation: limits.requests.window must be positive when rate limiting is enabled \
                            (set max_requests to 0 to disable)."
                    .to_string(),
            });
        }

        if self.uploads.max_file_size == 0 {
            return Err(Error::Internal {
                operation: "Config validation: uploads.max_file_size cannot be 0.".to_string(),
            });
        }

        if self.cors.allowed_origins.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: cors.allowed_origins cannot be empty. Add at least one allowed origin.".to_string(),
            });
        }

        // The OCR variant is all-or-nothing
        let ocr_parts = [
            self.vision.endpoint.is_some(),
            !is_blank(&self.vision.api_key),
            !is_blank(&self.translator.api_key),
        ];
        if ocr_parts.iter().any(|set| *set) && !ocr_parts.iter().all(|set| *set) {
            return Err(Error::Internal {
                operation: "Config validation: OCR is partially configured. Set vision.endpoint, vision.api_key and \
                            translator.api_key together, or none of them."
                    .to_string(),
            });
        }

        Ok(())
    }

    /// OCR variant settings, if vision and translator credentials are configured.
    pub fn ocr(&self) -> Option<OcrSettings> {
        Some(OcrSettings {
            vision_endpoint: self.vision.endpoint.clone()?,
            vision_key: self.vision.api_key.clone().filter(|k| !k.trim().is_empty())?,
            vision_timeout: self.vision.timeout,
            translator_endpoint: self.translator.endpoint.clone(),
            translator_key: self.translator.api_key.clone().filter(|k| !k.trim().is_empty())?,
            translator_region: self.translator.region.clone(),
            translator_timeout: self.translator.timeout,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
