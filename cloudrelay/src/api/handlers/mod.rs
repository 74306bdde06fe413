//! HTTP request handlers for all API endpoints.
//!
//! Each handler validates its input, calls one or two providers from [`crate::AppState`] and
//! reshapes the result into the public JSON contract.
//!
//! # Handler Modules
//!
//! - [`chat`]: `/ask` and `/test-api`
//! - [`storage`]: `/generate-sas-url/{blobName}` and `/get-images`
//! - [`ocr`]: `/extract-text`
//!
//! # Error Handling
//!
//! Handlers return [`crate::errors::Error`], which converts to the appropriate HTTP status code
//! and JSON error body.

pub mod chat;
pub mod ocr;
pub mod storage;
