//! Congress.gov API client.
//!
//! [`ApiClient`] turns a relative path (`bill/119`, `member/A000360`) into an
//! authenticated GET, runs it through the [`RetryPolicy`], and decodes the JSON body.
//!
//! # Example
//!
//! ```ignore
//! use congress_sync::congress::ApiClient;
//! use congress_sync::http::{ReqwestTransport, RetryPolicy};
//!
//! let transport = ReqwestTransport::new(Duration::from_secs(30), 5_000)?;
//! let client = ApiClient::new(Arc::new(transport), "https://api.congress.gov/v3/", "my-api-key")
//!     .with_retry_policy(RetryPolicy::default());
//! let body = client.get_json("member/A000360", &[]).await?;
//! ```

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::http::{
    run_with_retry, ApiRequest, ApiResponse, AttemptError, HttpTransport, RetryError, RetryPolicy,
    TransportError,
};

/// Errors that can occur when calling the Congress API.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Network-level failure
    #[error("HTTP request failed: {0}")]
    Transport(#[from] TransportError),

    /// HTTP 429
    #[error("rate limited by API")]
    RateLimited,

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// API returned an error response
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    /// Body was not the JSON we expected
    #[error("invalid JSON from {path}: {message}")]
    Decode { path: String, message: String },

    /// Every attempt failed with a transient error
    #[error("gave up on {path} after {attempts} attempts: {last}")]
    RetriesExhausted {
        path: String,
        attempts: u32,
        last: Box<ApiError>,
    },
}

impl ApiError {
    /// Whether another attempt could plausibly succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::RateLimited => true,
            Self::ApiError { status, .. } => *status >= 500,
            Self::NotFound(_) | Self::Decode { .. } | Self::RetriesExhausted { .. } => false,
        }
    }
}

/// Authenticated, retrying client for the Congress.gov v3 API.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl ApiClient {
    /// Create a new client with the given base URL and API key.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            api_key: api_key.into(),
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Absolute URL for a path. Absolute inputs pass through unchanged.
    #[must_use]
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// GET `path` with extra query parameters and decode the JSON body.
    ///
    /// Network errors, 5xx and 429 are retried per the client's [`RetryPolicy`]; any other
    /// non-success status fails on the first attempt.
    ///
    /// # Errors
    /// Returns [`ApiError::RetriesExhausted`] when the budget runs out, or the first
    /// non-retryable error otherwise.
    pub async fn get_json(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<serde_json::Value, ApiError> {
        let mut request = ApiRequest::new(self.url_for(path))
            .with_query("api_key", self.api_key.as_str())
            .with_query("format", "json");
        for (key, value) in params {
            request = request.with_query(*key, value.as_str());
        }

        let result = run_with_retry(&self.retry, path, |attempt| {
            let request = &request;
            async move {
                debug!(path, attempt, "GET");
                let response = self
                    .transport
                    .send(request)
                    .await
                    .map_err(|e| AttemptError::retryable(ApiError::Transport(e)))?;
                classify(path, response)
            }
        })
        .await;

        result.map_err(|err| match err {
            RetryError::Exhausted { attempts, last } => ApiError::RetriesExhausted {
                path: path.to_string(),
                attempts,
                last: Box::new(last),
            },
            RetryError::Fatal { error, .. } => error,
        })
    }
}

fn classify(path: &str, response: ApiResponse) -> Result<serde_json::Value, AttemptError<ApiError>> {
    if response.is_success() {
        return serde_json::from_str(&response.body).map_err(|e| {
            AttemptError::Fatal(ApiError::Decode {
                path: path.to_string(),
                message: e.to_string(),
            })
        });
    }

    match response.status {
        429 => Err(AttemptError::Retryable {
            error: ApiError::RateLimited,
            retry_after: response.retry_after,
        }),
        404 => Err(AttemptError::Fatal(ApiError::NotFound(path.to_string()))),
        status => {
            let error = ApiError::ApiError {
                status,
                message: truncate(&response.body, 200),
            };
            if error.is_transient() {
                Err(AttemptError::Retryable {
                    error,
                    retry_after: response.retry_after,
                })
            } else {
                Err(AttemptError::Fatal(error))
            }
        }
    }
}

fn truncate(body: &str, max_chars: usize) -> String {
    body.chars().take(max_chars).collect()
}
