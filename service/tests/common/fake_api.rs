//! In-process fake of the Congress.gov list and detail endpoints.
//!
//! ```ignore
//! let api = FakeCongressApi::new()
//!     .list("member/congress/118", "members", members)
//!     .detail("member/A000001", json!({"member": {...}}))
//!     .failing("treaty/");
//! let transport = Arc::new(api.into_transport());
//! ```

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use congress_sync::config::CurrentCongressPolicy;
use congress_sync::congress::ApiClient;
use congress_sync::endpoints::EndpointCatalog;
use congress_sync::http::mock::{json_response, status_response, MockTransport};
use congress_sync::http::{ApiRequest, ApiResponse, RetryPolicy, TransportError};
use congress_sync::sink::RowSink;
use congress_sync::state::{StateManager, StateStore};
use congress_sync::sync::{SyncContext, SyncSettings};
use serde_json::{json, Value};

pub const BASE_URL: &str = "https://api.test/v3/";

#[derive(Default, Clone)]
pub struct FakeCongressApi {
    lists: HashMap<String, (String, Vec<Value>)>,
    details: HashMap<String, Value>,
    failing: Vec<String>,
    omit_pagination: bool,
}

impl FakeCongressApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `records` under `records_key` at `path`, honoring offset/limit.
    pub fn list(mut self, path: &str, records_key: &str, records: Vec<Value>) -> Self {
        self.lists
            .insert(path.to_string(), (records_key.to_string(), records));
        self
    }

    /// Serve a fixed body at `path`.
    pub fn detail(mut self, path: &str, body: Value) -> Self {
        self.details.insert(path.to_string(), body);
        self
    }

    /// Answer 500 for every URL containing `fragment`.
    pub fn failing(mut self, fragment: &str) -> Self {
        self.failing.push(fragment.to_string());
        self
    }

    /// Leave out the `pagination` block, so only page length signals the end.
    pub fn without_pagination(mut self) -> Self {
        self.omit_pagination = true;
        self
    }

    pub fn respond(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        if self.failing.iter().any(|f| request.url.contains(f.as_str())) {
            return status_response(500);
        }

        let path = request.url.strip_prefix(BASE_URL).unwrap_or(&request.url);

        if let Some((records_key, records)) = self.lists.get(path) {
            let offset: usize = request
                .query_value("offset")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let limit: usize = request
                .query_value("limit")
                .and_then(|v| v.parse().ok())
                .unwrap_or(250);
            let end = records.len().min(offset + limit);
            let page: Vec<Value> = records.get(offset..end).unwrap_or_default().to_vec();
            let next = (end < records.len())
                .then(|| format!("{BASE_URL}{path}?offset={end}&limit={limit}"));

            let mut body = serde_json::Map::new();
            body.insert(records_key.clone(), Value::Array(page));
            if !self.omit_pagination {
                body.insert(
                    "pagination".into(),
                    json!({"count": records.len(), "next": next}),
                );
            }
            return json_response(&Value::Object(body));
        }

        match self.details.get(path) {
            Some(body) => json_response(body),
            None => status_response(404),
        }
    }

    pub fn into_transport(self) -> MockTransport {
        MockTransport::new(move |request| self.respond(request))
    }
}

/// `n` bills for a congress, numbered from 1.
pub fn bills(congress: u32, n: usize) -> Vec<Value> {
    (1..=n)
        .map(|i| {
            json!({
                "congress": congress,
                "type": "HR",
                "number": i.to_string(),
                "title": format!("Bill {i}"),
                "updateDate": "2024-01-01",
            })
        })
        .collect()
}

pub fn settings(start: u32, current: u32, page_size: u32) -> SyncSettings {
    SyncSettings {
        starting_congress: start,
        current_congress: current,
        policy: CurrentCongressPolicy::Resume,
        page_size,
        worker_limit: 3,
        detail_concurrency: 4,
    }
}

/// Context wired to the fake API with zero-delay retries.
pub fn context(
    transport: Arc<MockTransport>,
    store: Arc<dyn StateStore>,
    sink: Arc<dyn RowSink>,
    endpoints: &[&str],
    settings: SyncSettings,
) -> SyncContext {
    let names: Vec<String> = endpoints.iter().map(|e| (*e).to_string()).collect();
    SyncContext {
        client: ApiClient::new(transport, BASE_URL, "test-key")
            .with_retry_policy(RetryPolicy::immediate(4)),
        catalog: EndpointCatalog::congress_gov().select(&names),
        state: Arc::new(StateManager::new(store, settings.starting_congress)),
        sink,
        settings,
        cancel: Arc::new(AtomicBool::new(false)),
    }
}
