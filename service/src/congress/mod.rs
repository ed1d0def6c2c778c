//! Congress.gov API access.
//!
//! # Architecture
//!
//! - [`ApiClient`] - authenticated GET + JSON decode, retried per [`crate::http::RetryPolicy`]
//! - [`crate::http::HttpTransport`] - the network seam the client sits on
//! - [`Pagination`] / [`lookup_path`] - helpers for reading list responses
//!
//! # Testing Patterns
//!
//! ## Unit Tests (Mock Transport)
//!
//! ```ignore
//! use congress_sync::http::mock::{json_response, MockTransport};
//!
//! let transport = Arc::new(MockTransport::new(|_| json_response(&json!({"bills": []}))));
//! let client = ApiClient::new(transport.clone(), "https://api.test/v3/", "key");
//! ```
//!
//! ## Integration Tests (HTTP Stubbing)
//!
//! Point a [`crate::http::ReqwestTransport`]-backed client at `MockHttpServer` (wiremock)
//! from `tests/common/http_mock.rs`.

mod client;
mod types;

pub use client::{ApiClient, ApiError};
pub use types::{lookup_field, lookup_path, Pagination};
