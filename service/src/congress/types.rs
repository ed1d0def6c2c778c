//! Shapes of Congress.gov responses the sync engine relies on.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `pagination` block attached to every list response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub count: Option<u64>,
    /// Link to the following page; absent on the last page.
    #[serde(default)]
    pub next: Option<String>,
}

impl Pagination {
    /// Read the `pagination` block of a response, if it has one.
    #[must_use]
    pub fn from_response(body: &Value) -> Option<Self> {
        body.get("pagination")
            .and_then(|p| serde_json::from_value(p.clone()).ok())
    }
}

/// Resolve a dotted path (`communicationType.code`) inside a JSON value.
#[must_use]
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| current.get(segment))
}

/// Like [`lookup_path`], starting from a record's field map.
#[must_use]
pub fn lookup_field<'a>(record: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    match path.split_once('.') {
        Some((head, rest)) => record.get(head).and_then(|v| lookup_path(v, rest)),
        None => record.get(path),
    }
}
