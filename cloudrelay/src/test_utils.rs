//! Test helpers: a valid configuration, in-memory fake providers and a router wired to them.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use axum_test::TestServer;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde_json::{Value, json};

use crate::{
    AppState, build_router,
    config::Config,
    providers::{BlobStore, ChatProvider, ChatReply, OcrClients, OcrProvider, ProviderError, Result, SasPermission, Translator},
};

/// A configuration that passes validation: chat and storage credentials set, OCR disabled.
pub fn create_test_config() -> Config {
    let mut config = Config::default();
    config.chat.api_key = Some("sk-test".to_string());
    config.storage.account_name = Some("relaytest".to_string());
    config.storage.account_key = Some("c2VjcmV0LWtleQ==".to_string());
    config.storage.container_name = Some("images".to_string());
    config
}

enum ChatOutcome {
    Reply(Value),
    Fail {
        message: String,
        code: Option<String>,
        kind: Option<String>,
    },
    Panic,
}

/// Chat provider that records prompts and answers with a canned outcome.
pub struct FakeChat {
    outcome: ChatOutcome,
    prompts: Mutex<Vec<String>>,
}

impl FakeChat {
    pub fn replying(content: Value) -> Self {
        Self {
            outcome: ChatOutcome::Reply(content),
            prompts: Mutex::default(),
        }
    }

    pub fn failing(message: &str, code: Option<&str>, kind: Option<&str>) -> Self {
        Self {
            outcome: ChatOutcome::Fail {
                message: message.to_string(),
                code: code.map(str::to_string),
                kind: kind.map(str::to_string),
            },
            prompts: Mutex::default(),
        }
    }

    pub fn panicking() -> Self {
        Self {
            outcome: ChatOutcome::Panic,
            prompts: Mutex::default(),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatProvider for FakeChat {
    async fn complete(&self, prompt: &str) -> Result<ChatReply> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match &self.outcome {
            ChatOutcome::Reply(content) => Ok(ChatReply {
                content: content.clone(),
                model: Some("fake-model".to_string()),
            }),
            ChatOutcome::Fail { message, code, kind } => Err(ProviderError::Status {
                provider: "chat provider",
                status: StatusCode::BAD_REQUEST,
                message: message.clone(),
                code: code.clone(),
                kind: kind.clone(),
            }),
            ChatOutcome::Panic => panic!("fake chat provider exploded"),
        }
    }
}

/// Blob store over a fixed list of names. Signed URLs are deterministic and readable.
pub struct FakeBlobStore {
    names: Vec<String>,
    list_error: Option<String>,
    sign_error: Option<String>,
    signed: Mutex<Vec<String>>,
    lists: AtomicUsize,
}

impl FakeBlobStore {
    pub fn with_blobs(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
            list_error: None,
            sign_error: None,
            signed: Mutex::default(),
            lists: AtomicUsize::new(0),
        }
    }

    pub fn failing_listing(mut self, message: &str) -> Self {
        self.list_error = Some(message.to_string());
        self
    }

    pub fn failing_signing(mut self, message: &str) -> Self {
        self.sign_error = Some(message.to_string());
        self
    }

    /// Blob names passed to `signed_url`, in call order
    pub fn signed_names(&self) -> Vec<String> {
        self.signed.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for FakeBlobStore {
    fn signed_url(&self, blob_name: &str, permission: SasPermission, expires_on: DateTime<Utc>) -> Result<String> {
        if let Some(message) = &self.sign_error {
            return Err(ProviderError::Signing(message.clone()));
        }
        self.signed.lock().unwrap().push(blob_name.to_string());

        let mut url = url::Url::parse("https://relaytest.blob.example/images/").expect("static URL is valid");
        url.path_segments_mut()
            .expect("base URL")
            .pop_if_empty()
            .extend(blob_name.split('/'));
        url.query_pairs_mut()
            .append_pair("sp", permission.as_str())
            .append_pair("se", &expires_on.format("%Y-%m-%dT%H:%M:%SZ").to_string())
            .append_pair("sig", "fake");
        Ok(url.into())
    }

    async fn list_blob_names(&self) -> Result<Vec<String>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        match &self.list_error {
            Some(message) => Err(ProviderError::Status {
                provider: "blob storage",
                status: StatusCode::NOT_FOUND,
                message: message.clone(),
                code: Some("ContainerNotFound".to_string()),
                kind: None,
            }),
            None => Ok(self.names.clone()),
        }
    }
}

/// OCR provider returning a canned document and recording the images it was sent.
pub struct FakeOcr {
    outcome: std::result::Result<Value, String>,
    images: Mutex<Vec<Vec<u8>>>,
}

impl FakeOcr {
    pub fn returning(document: Value) -> Self {
        Self {
            outcome: Ok(document),
            images: Mutex::default(),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
            images: Mutex::default(),
        }
    }

    pub fn images(&self) -> Vec<Vec<u8>> {
        self.images.lock().unwrap().clone()
    }
}

#[async_trait]
impl OcrProvider for FakeOcr {
    async fn recognize(&self, image: Vec<u8>) -> Result<Value> {
        self.images.lock().unwrap().push(image);
        self.outcome.clone().map_err(|message| ProviderError::Status {
            provider: "vision",
            status: StatusCode::BAD_REQUEST,
            message,
            code: Some("InvalidImage".to_string()),
            kind: None,
        })
    }
}

/// Translator returning a canned response and recording `(text, to)` pairs.
pub struct FakeTranslator {
    outcome: std::result::Result<Value, String>,
    requests: Mutex<Vec<(String, String)>>,
}

impl FakeTranslator {
    pub fn returning(response: Value) -> Self {
        Self {
            outcome: Ok(response),
            requests: Mutex::default(),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
            requests: Mutex::default(),
        }
    }

    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Translator for FakeTranslator {
    async fn translate(&self, text: &str, to: &str) -> Result<Value> {
        self.requests.lock().unwrap().push((text.to_string(), to.to_string()));
        self.outcome.clone().map_err(|message| ProviderError::Malformed {
            provider: "translator",
            message,
        })
    }
}

/// The fakes behind a test app. Handles stay with the test for assertions.
pub struct TestProviders {
    pub chat: Arc<FakeChat>,
    pub blobs: Arc<FakeBlobStore>,
    pub ocr: Option<(Arc<FakeOcr>, Arc<FakeTranslator>)>,
}

impl Default for TestProviders {
    fn default() -> Self {
        Self {
            chat: Arc::new(FakeChat::replying(json!("Hello!"))),
            blobs: Arc::new(FakeBlobStore::with_blobs(&[])),
            ocr: None,
        }
    }
}

impl TestProviders {
    pub fn state(&self, config: Config) -> AppState {
        let ocr = self.ocr.as_ref().map(|(vision, translator)| OcrClients {
            vision: vision.clone(),
            translator: translator.clone(),
        });

        AppState::builder()
            .config(config)
            .chat(self.chat.clone())
            .blobs(self.blobs.clone())
            .maybe_ocr(ocr)
            .build()
    }
}

/// Router over fake providers, without rate limiting.
pub fn create_test_app(config: Config, providers: &TestProviders) -> TestServer {
    let router = build_router(&providers.state(config)).expect("Failed to build router");
    TestServer::new(router).expect("Failed to create test server")
}
