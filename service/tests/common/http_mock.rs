//! HTTP mock server helpers for testing outbound HTTP calls.
//!
//! A thin wrapper around `wiremock` for declarative HTTP stubbing.
//!
//! # Quick Start
//!
//! ```ignore
//! use crate::common::http_mock::MockHttpServer;
//!
//! #[tokio::test]
//! async fn test_external_api_call() {
//!     let server = MockHttpServer::start().await;
//!
//!     server
//!         .expect_get("/v3/bill/118")
//!         .with_query("api_key", "test-key")
//!         .respond_with_json(json!({"bills": []}))
//!         .mount()
//!         .await;
//!
//!     // Point the client at server.url("/v3/")
//! }
//! ```
//!
//! # Patterns
//!
//! - **Success response**: `.respond_with_json(value)`
//! - **Error response**: `.respond_with_status(503)`, optionally `.with_json_response(value)`
//! - **Rate limiting**: `.respond_with_status(429).with_retry_after(1)`
//! - **Timeout simulation**: `.respond_with_delay(Duration::from_secs(30))`
//! - **Request verification**: `.expect_times(1)` then `server.verify().await`

use std::time::Duration;

use serde_json::Value;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub struct MockHttpServer {
    server: MockServer,
}

impl MockHttpServer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Absolute URL for a path on this server.
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.server.uri())
    }

    pub fn expect_get(&self, request_path: &str) -> MockBuilder<'_> {
        MockBuilder {
            server: &self.server,
            mock: Mock::given(method("GET")).and(path(request_path)),
            status: 200,
            body: None,
            delay: None,
            retry_after: None,
            times: None,
        }
    }

    /// Verify every `expect_times` expectation.
    pub async fn verify(&self) {
        self.server.verify().await;
    }

    /// Requests received so far.
    pub async fn received(&self) -> Vec<wiremock::Request> {
        self.server.received_requests().await.unwrap_or_default()
    }

    /// Underlying server, for matchers the builder does not cover.
    pub fn inner(&self) -> &MockServer {
        &self.server
    }
}

pub struct MockBuilder<'a> {
    server: &'a MockServer,
    mock: wiremock::MockBuilder,
    status: u16,
    body: Option<Value>,
    delay: Option<Duration>,
    retry_after: Option<u64>,
    times: Option<u64>,
}

impl MockBuilder<'_> {
    #[must_use]
    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.mock = self.mock.and(query_param(key, value));
        self
    }

    #[must_use]
    pub fn respond_with_json(mut self, body: Value) -> Self {
        self.status = 200;
        self.body = Some(body);
        self
    }

    #[must_use]
    pub const fn respond_with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Body to send along with a non-200 status.
    #[must_use]
    pub fn with_json_response(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub const fn respond_with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[must_use]
    pub const fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    #[must_use]
    pub const fn expect_times(mut self, times: u64) -> Self {
        self.times = Some(times);
        self
    }

    pub async fn mount(self) {
        let mut template = ResponseTemplate::new(self.status);
        if let Some(body) = self.body {
            template = template.set_body_json(body);
        }
        if let Some(delay) = self.delay {
            template = template.set_delay(delay);
        }
        if let Some(seconds) = self.retry_after {
            template = template.insert_header("Retry-After", seconds.to_string().as_str());
        }

        let mut mock = self.mock.respond_with(template);
        if let Some(times) = self.times {
            mock = mock.expect(times);
        }
        mock.mount(self.server).await;
    }
}
