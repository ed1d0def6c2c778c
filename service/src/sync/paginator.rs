use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::SyncError;
use crate::congress::{lookup_path, ApiClient, Pagination};
use crate::endpoints::{EndpointSpec, ResponseShape};
use crate::state::{Cursor, UpdateWindow};

/// A record exactly as the list endpoint returned it.
pub type RawRecord = Map<String, Value>;

/// Congress.gov timestamp format for `fromDateTime` / `toDateTime`.
const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub records: Vec<RawRecord>,
    /// Cursor to store once this page is accepted downstream.
    pub next_cursor: Cursor,
    pub has_more: bool,
}

/// Offset/limit walker over one endpoint's list. Stateless between calls: the cursor is the
/// only position, so re-issuing a call with the same cursor is always safe.
pub struct Paginator<'a> {
    client: &'a ApiClient,
    page_size: u32,
}

impl<'a> Paginator<'a> {
    #[must_use]
    pub const fn new(client: &'a ApiClient, page_size: u32) -> Self {
        Self { client, page_size }
    }

    /// Fetch the page starting at `cursor.offset`.
    ///
    /// # Errors
    /// Returns [`SyncError::EndpointFetch`] when the list request fails after retries.
    pub async fn next_page(
        &self,
        spec: &EndpointSpec,
        congress: u32,
        cursor: &Cursor,
    ) -> Result<Page, SyncError> {
        let path = spec.list_path(congress)?;
        let params = self.list_params(spec, cursor);

        debug!(
            endpoint = spec.name,
            congress,
            offset = cursor.offset,
            path = %path,
            "fetching page"
        );

        let body = self
            .client
            .get_json(&path, &params)
            .await
            .map_err(|source| SyncError::EndpointFetch {
                endpoint: spec.name.to_string(),
                congress,
                source,
            })?;

        let (mut records, returned, has_more) = match spec.response_shape {
            ResponseShape::Object => match lookup_path(&body, spec.records_key) {
                Some(Value::Object(record)) => (vec![record.clone()], 1, false),
                _ => (Vec::new(), 0, false),
            },
            ResponseShape::Array => {
                let items: &[Value] = match lookup_path(&body, spec.records_key) {
                    Some(Value::Array(items)) => items.as_slice(),
                    Some(other) => {
                        warn!(
                            endpoint = spec.name,
                            congress,
                            records_key = spec.records_key,
                            kind = json_kind(other),
                            "records key is not an array, treating page as empty"
                        );
                        &[]
                    }
                    None => &[],
                };
                let records: Vec<RawRecord> = items
                    .iter()
                    .filter_map(|item| item.as_object().cloned())
                    .collect();
                if records.len() != items.len() {
                    warn!(
                        endpoint = spec.name,
                        congress,
                        dropped = items.len() - records.len(),
                        "non-object entries in page dropped"
                    );
                }
                let has_more = self.has_more(items.len(), Pagination::from_response(&body));
                (records, items.len(), has_more)
            }
        };

        if spec.inject_congress {
            for record in &mut records {
                record
                    .entry("congress")
                    .or_insert_with(|| Value::from(congress));
            }
        }

        let next_cursor = cursor.advanced(returned, has_more);
        debug!(
            endpoint = spec.name,
            congress,
            records = records.len(),
            next_offset = next_cursor.offset,
            has_more,
            "page fetched"
        );

        Ok(Page {
            records,
            next_cursor,
            has_more,
        })
    }

    fn list_params(&self, spec: &EndpointSpec, cursor: &Cursor) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("offset", cursor.offset.to_string()),
            ("limit", self.page_size.to_string()),
        ];
        if spec.supports_updated_since {
            // Encoded as `updateDate+asc` on the wire.
            params.push(("sort", "updateDate asc".to_string()));
            if let Some(UpdateWindow { from, to }) = cursor.window {
                if let Some(from) = from {
                    params.push(("fromDateTime", from.format(DATE_TIME_FORMAT).to_string()));
                }
                params.push(("toDateTime", to.format(DATE_TIME_FORMAT).to_string()));
            }
        }
        params
    }

    // A short page ends the walk, as does a pagination block without a `next` link.
    fn has_more(&self, returned: usize, pagination: Option<Pagination>) -> bool {
        let full_page = u32::try_from(returned).is_ok_and(|n| n >= self.page_size);
        let upstream_says_last = pagination.is_some_and(|p| p.next.is_none());
        full_page && !upstream_says_last
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
