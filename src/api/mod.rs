//! REST API interaction module
//!
//! Provides the single HTTP transport used by the whole engine: one request
//! in, `(body, status)` out, with token auth and uniform error reporting.
//!
//! # Module Structure
//!
//! - [`client`] - HTTP client wrapper for the backend REST API

pub mod client;

pub use client::{ApiClient, ApiResponse};
