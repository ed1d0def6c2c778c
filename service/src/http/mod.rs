//! HTTP transport boundary.
//!
//! Everything above this module talks to the network through [`HttpTransport`], a single
//! `send(request) -> response | error` call. Retries live one layer up, in
//! [`crate::congress::ApiClient`], driven by a [`RetryPolicy`].
//!
//! - [`ReqwestTransport`] - real transport with a client-side request budget (`governor`)
//! - [`mock::MockTransport`] - scripted transport for tests (behind `test-utils` feature)

pub mod retry;

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use thiserror::Error;

pub use retry::{run_with_retry, AttemptError, RetryError, RetryPolicy};

/// A GET request against the upstream API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// First value of a query parameter, if present.
    #[must_use]
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Raw response as seen by the retry layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
    /// Parsed `Retry-After` header (seconds form only).
    pub retry_after: Option<Duration>,
}

impl ApiResponse {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Failures below HTTP status level. All of them are worth retrying.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("HTTP request failed: {0}")]
    Other(String),
}

/// The one network call the sync engine depends on.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// `reqwest`-backed transport with an optional hourly request budget.
pub struct ReqwestTransport {
    client: reqwest::Client,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl ReqwestTransport {
    /// Build a transport with the given timeout and hourly request budget.
    ///
    /// # Errors
    /// Returns an error if the underlying `reqwest` client cannot be constructed.
    pub fn new(timeout: Duration, requests_per_hour: u32) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("congress-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;

        Ok(Self::with_client(client, requests_per_hour))
    }

    /// Create a transport around a custom `reqwest::Client` (for testing with custom config).
    /// A zero budget disables client-side limiting.
    #[must_use]
    pub fn with_client(client: reqwest::Client, requests_per_hour: u32) -> Self {
        let limiter =
            NonZeroU32::new(requests_per_hour).map(|n| RateLimiter::direct(hourly_quota(n)));
        Self { client, limiter }
    }
}

/// Requests a fresh process may send before the hourly budget starts pacing them.
const MAX_BURST: u32 = 10;

// `Quota::per_hour` alone would let the whole hourly budget out at once.
fn hourly_quota(requests_per_hour: NonZeroU32) -> Quota {
    let burst = NonZeroU32::new(MAX_BURST.min(requests_per_hour.get())).unwrap_or(NonZeroU32::MIN);
    Quota::per_hour(requests_per_hour).allow_burst(burst)
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let response = self
            .client
            .get(&request.url)
            .query(&request.query)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.map_err(map_reqwest_error)?;

        Ok(ApiResponse {
            status,
            body,
            retry_after,
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::missing_const_for_fn,
    clippy::must_use_candidate
)]
pub mod mock {
    //! Mock transport for unit testing.

    use super::{ApiRequest, ApiResponse, HttpTransport, TransportError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    type Handler = dyn Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync;

    /// Scripted transport: every request is answered by a handler closure and recorded.
    ///
    /// Inspect what was sent with `calls()` and `count_matching()`, and how many requests
    /// overlapped with `max_in_flight()`.
    pub struct MockTransport {
        handler: Box<Handler>,
        calls: Mutex<Vec<ApiRequest>>,
        delay: Option<Box<dyn Fn(&ApiRequest) -> Duration + Send + Sync>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockTransport {
        pub fn new<F>(handler: F) -> Self
        where
            F: Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync + 'static,
        {
            Self {
                handler: Box::new(handler),
                calls: Mutex::new(Vec::new()),
                delay: None,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        /// Delay each response by a per-request amount (used to scramble completion order).
        pub fn with_delay<D>(mut self, delay: D) -> Self
        where
            D: Fn(&ApiRequest) -> Duration + Send + Sync + 'static,
        {
            self.delay = Some(Box::new(delay));
            self
        }

        /// All requests sent so far, in send order.
        pub fn calls(&self) -> Vec<ApiRequest> {
            self.calls.lock().unwrap().clone()
        }

        /// Number of requests whose URL contains `fragment`.
        pub fn count_matching(&self, fragment: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.url.contains(fragment))
                .count()
        }

        /// Highest number of requests that were in flight at the same time.
        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
            self.calls.lock().unwrap().push(request.clone());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if let Some(delay) = &self.delay {
                tokio::time::sleep(delay(request)).await;
            }

            let response = (self.handler)(request);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            response
        }
    }

    /// 200 response with a JSON body.
    pub fn json_response(value: &serde_json::Value) -> Result<ApiResponse, TransportError> {
        Ok(ApiResponse {
            status: 200,
            body: value.to_string(),
            retry_after: None,
        })
    }

    /// Bodyless response with the given status.
    pub fn status_response(status: u16) -> Result<ApiResponse, TransportError> {
        Ok(ApiResponse {
            status,
            body: String::new(),
            retry_after: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hourly_quota_caps_the_initial_burst() {
        let quota = hourly_quota(NonZeroU32::new(5000).unwrap());
        assert_eq!(quota.burst_size().get(), MAX_BURST);

        let limiter = RateLimiter::direct(quota);
        for _ in 0..MAX_BURST {
            assert!(limiter.check().is_ok());
        }
        assert!(limiter.check().is_err());
    }

    #[test]
    fn small_budgets_burst_at_most_their_size() {
        let quota = hourly_quota(NonZeroU32::new(3).unwrap());
        assert_eq!(quota.burst_size().get(), 3);
    }

    #[test]
    fn zero_budget_disables_limiting() {
        let client = reqwest::Client::new();
        assert!(ReqwestTransport::with_client(client, 0).limiter.is_none());
    }
}
