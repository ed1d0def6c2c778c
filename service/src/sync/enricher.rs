use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::RawRecord;
use crate::congress::{lookup_path, ApiClient};
use crate::endpoints::{render_template, DetailSpec, EndpointSpec};

/// What happened to a record's detail fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailStatus {
    /// Endpoint has no detail request.
    NotConfigured,
    /// A placeholder field was missing, so no request was made.
    Skipped,
    Fetched,
    /// Request failed after retries, or the response lacked the detail object.
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRecord {
    pub record: RawRecord,
    pub detail: Option<Value>,
    pub status: DetailStatus,
}

impl EnrichedRecord {
    #[must_use]
    pub const fn plain(record: RawRecord) -> Self {
        Self {
            record,
            detail: None,
            status: DetailStatus::NotConfigured,
        }
    }
}

/// Attaches per-record detail objects.
///
/// Fetches run with at most `concurrency` requests in flight. Output has the same length
/// and order as the input, whatever order the responses arrive in.
pub struct DetailEnricher<'a> {
    client: &'a ApiClient,
    concurrency: usize,
}

impl<'a> DetailEnricher<'a> {
    #[must_use]
    pub fn new(client: &'a ApiClient, concurrency: usize) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn enrich(&self, records: Vec<RawRecord>, spec: &EndpointSpec) -> Vec<EnrichedRecord> {
        let Some(detail) = &spec.detail else {
            return records.into_iter().map(EnrichedRecord::plain).collect();
        };

        stream::iter(records)
            .map(|record| self.enrich_one(record, spec.name, detail))
            .buffered(self.concurrency)
            .collect()
            .await
    }

    async fn enrich_one(&self, record: RawRecord, endpoint: &str, detail: &DetailSpec) -> EnrichedRecord {
        let path = match render_template(detail.url_template, &record) {
            Ok(path) => path,
            Err(e) => {
                debug!(endpoint, error = %e, "detail skipped");
                return EnrichedRecord {
                    record,
                    detail: None,
                    status: DetailStatus::Skipped,
                };
            }
        };

        match self.client.get_json(&path, &[]).await {
            Ok(body) => match lookup_path(&body, detail.records_key) {
                Some(found) if !found.is_null() => EnrichedRecord {
                    record,
                    detail: Some(found.clone()),
                    status: DetailStatus::Fetched,
                },
                _ => {
                    warn!(
                        endpoint,
                        path = %path,
                        records_key = detail.records_key,
                        "detail response has no detail object"
                    );
                    EnrichedRecord {
                        record,
                        detail: None,
                        status: DetailStatus::Failed,
                    }
                }
            },
            Err(e) => {
                warn!(endpoint, path = %path, error = %e, "detail fetch failed, keeping record");
                EnrichedRecord {
                    record,
                    detail: None,
                    status: DetailStatus::Failed,
                }
            }
        }
    }
}
