//! # cloudrelay: credential-injecting relay for chat, blob storage and OCR providers
//!
//! `cloudrelay` is a small HTTP service that sits between browser or mobile clients and three
//! hosted APIs, so that provider credentials never leave the server:
//!
//! - an OpenAI-compatible chat completion API (`POST /ask`, `GET /test-api`)
//! - Azure Blob Storage, for short-lived signed upload and download URLs
//!   (`GET /generate-sas-url/{blobName}`, `GET /get-images`)
//! - Azure Computer Vision OCR followed by Azure Translator (`POST /extract-text`)
//!
//! ## Architecture
//!
//! The service is built on [Axum](https://github.com/tokio-rs/axum). Every handler is a stateless
//! pass-through: it validates the request, calls one or two providers and reshapes the response.
//! Providers are reached through the traits in [`providers`], constructed once in
//! [`Application::new`] and shared through [`AppState`], so handler tests run against fakes.
//!
//! Requests pass through, from the outside in: tracing, panic recovery, optional Prometheus
//! metrics, CORS and the per-client rate limiter in [`limits`]. Errors from every layer are
//! expressed as [`errors::Error`], which renders the JSON error bodies clients rely on.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use cloudrelay::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = cloudrelay::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     cloudrelay::telemetry::init_telemetry(config.enable_otel_export, config.log_format)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options and the environment variables that
//! supply provider credentials.

pub mod api;
pub mod config;
pub mod errors;
pub mod limits;
mod openapi;
pub mod providers;
pub mod telemetry;
pub mod tolerant_json;

#[cfg(test)]
pub mod test_utils;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{self, HeaderValue},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::{
    api::handlers::{chat, ocr, storage},
    errors::Error,
    limits::Limiters,
    openapi::ApiDoc,
    providers::{
        BlobStore, ChatProvider, OcrClients, blob::AzureBlobStore, chat::OpenAiChat, translator::AzureTranslator,
        vision::AzureVision,
    },
};

/// Room for multipart boundaries and headers on top of the upload size limit
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Provider clients and settings handed to every handler.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .chat(Arc::new(OpenAiChat::new(&config.chat)?))
///     .blobs(Arc::new(AzureBlobStore::new(&config.storage)?))
///     .maybe_ocr(ocr_clients)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub chat: Arc<dyn ChatProvider>,
    pub blobs: Arc<dyn BlobStore>,
    /// Present only when both OCR and translation are configured
    pub ocr: Option<OcrClients>,
    #[builder(default)]
    pub limiters: Limiters,
}

/// Construct the provider clients described by the configuration.
fn create_providers(config: &Config) -> anyhow::Result<(Arc<dyn ChatProvider>, Arc<dyn BlobStore>, Option<OcrClients>)> {
    let chat: Arc<dyn ChatProvider> = Arc::new(OpenAiChat::new(&config.chat)?);
    let blobs: Arc<dyn BlobStore> = Arc::new(AzureBlobStore::new(&config.storage)?);

    let ocr = match config.ocr() {
        Some(settings) => {
            info!("OCR providers configured, enabling /extract-text");
            Some(OcrClients {
                vision: Arc::new(AzureVision::new(
                    &settings.vision_endpoint,
                    settings.vision_key,
                    settings.vision_timeout,
                )?),
                translator: Arc::new(AzureTranslator::new(
                    &settings.translator_endpoint,
                    settings.translator_key,
                    settings.translator_region,
                    settings.translator_timeout,
                )?),
            })
        }
        None => {
            info!("OCR providers not configured, /extract-text is disabled");
            None
        }
    };

    Ok((chat, blobs, ocr))
}

/// CORS policy: `*` allows any origin, otherwise only the listed ones
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let origins = &config.cors.allowed_origins;

    let allow_origin = if origins.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        let values = origins
            .iter()
            .map(|origin| origin.parse::<HeaderValue>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("Invalid CORS origin: {}", e))?;
        AllowOrigin::list(values)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([http::Method::GET, http::Method::POST])
        .allow_headers(Any)
        .expose_headers([
            http::HeaderName::from_static("ratelimit-limit"),
            http::HeaderName::from_static("ratelimit-remaining"),
            http::HeaderName::from_static("ratelimit-reset"),
            http::header::RETRY_AFTER,
        ]);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

async fn not_found() -> Error {
    Error::NotFound {
        message: "Not found".to_string(),
    }
}

/// Turn a handler panic into the generic 500 body.
fn handle_panic(panic: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("non-string panic payload");

    Error::Internal {
        operation: format!("handle request: handler panicked: {detail}"),
    }
    .into_response()
}

/// Assemble the relay routes and their middleware.
///
/// Layers, innermost first: per-client rate limiting, CORS, Prometheus metrics (when enabled),
/// panic recovery, request tracing. `/extract-text` is only routed when [`AppState::ocr`] is set,
/// and `/internal/metrics` sits outside the rate limiter.
///
/// # Errors
///
/// Returns an error if CORS configuration is invalid or the upload limit does not fit in memory.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let mut api_routes = Router::new()
        .route("/test-api", get(chat::test_api))
        .route("/ask", post(chat::ask))
        .route("/generate-sas-url/{blob_name}", get(storage::generate_sas_url))
        .route("/get-images", get(storage::get_images));

    if state.ocr.is_some() {
        let body_limit = usize::try_from(state.config.uploads.max_file_size)?.saturating_add(MULTIPART_OVERHEAD);
        api_routes = api_routes.route(
            "/extract-text",
            post(ocr::extract_text).layer(DefaultBodyLimit::max(body_limit)),
        );
    }

    let mut router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .merge(api_routes.with_state(state.clone()))
        .fallback(not_found);

    if let Some(limiter) = state.limiters.requests.clone() {
        router = router.layer(from_fn_with_state(limiter, limits::rate_limit));
    }

    let mut router = router.layer(create_cors_layer(&state.config)?);

    // Metrics are registered after the limiter so scrapes are never throttled
    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(move || async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(CatchPanicLayer::custom(handle_panic)).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Main application struct that owns the router and background tasks.
///
/// # Lifecycle
///
/// 1. **Create**: [`Application::new`] builds provider clients and the router, and starts the
///    rate limiter's purge task
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts handling requests
/// 3. **Shutdown**: When the shutdown signal is received, stops background tasks and flushes
///    telemetry
pub struct Application {
    router: Router,
    config: Config,
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
}

impl Application {
    /// Create a new application instance with all provider clients initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        debug!("Starting relay with configuration: {:#?}", config);

        let (chat, blobs, ocr) = create_providers(&config)?;
        let limiters = Limiters::new(&config.limits);

        let app_state = AppState::builder()
            .config(config)
            .chat(chat)
            .blobs(blobs)
            .maybe_ocr(ocr)
            .limiters(limiters)
            .build();

        Self::from_state(app_state)
    }

    /// Build the application around an existing state, e.g. one holding fake providers
    pub fn from_state(app_state: AppState) -> anyhow::Result<Self> {
        let router = build_router(&app_state)?;
        let shutdown_token = CancellationToken::new();

        let mut background_tasks = Vec::new();
        if let Some(limiter) = &app_state.limiters.requests {
            background_tasks.push(limiter.spawn_purge_task(shutdown_token.clone()));
        }

        Ok(Self {
            router,
            config: app_state.config,
            background_tasks,
            shutdown_token,
        })
    }

    /// Serve the router in-process; the guard stops background tasks when dropped
    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, tokio_util::sync::DropGuard) {
        let server = axum_test::TestServer::new(self.router).expect("Failed to create test server");
        (server, self.shutdown_token.drop_guard())
    }

    /// Bind, serve until `shutdown` resolves, then stop background work and flush telemetry
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Relay listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        // Peer addresses identify clients for rate limiting
        axum::serve(listener, self.router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Stopping background tasks...");
        self.shutdown_token.cancel();
        for handle in self.background_tasks {
            let _ = handle.await;
        }

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
