//! API layer for HTTP request handling and data models.
//!
//! This module contains the REST API implementation, organized into:
//!
//! - **[`handlers`]**: Axum route handlers for all API endpoints
//! - **[`models`]**: Request/response data structures for API communication
//!
//! # API Structure
//!
//! - **Chat** (`/ask`, `/test-api`): prompt relay to the chat completion provider
//! - **Storage** (`/generate-sas-url/{blobName}`, `/get-images`): signed blob URLs
//! - **OCR** (`/extract-text`): text extraction and translation, mounted only when the vision
//!   and translator providers are configured
//!
//! # OpenAPI Documentation
//!
//! All endpoints are documented with OpenAPI annotations using `utoipa`. The document is served
//! at `/api-docs/openapi.json`.

pub mod handlers;
pub mod models;
