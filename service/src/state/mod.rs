//! Checkpoint model and persistence.
//!
//! - [`SyncState`] / [`Cursor`] - the resumability contract, serialized as one JSON blob
//! - [`StateManager`] - sole owner of the in-memory state; every mutation goes through it
//! - [`StateStore`] - where the blob lives ([`FileStateStore`], or the in-memory mock)

mod manager;
mod store;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use manager::StateManager;
pub use store::{FileStateStore, StateStore};

#[cfg(any(test, feature = "test-utils"))]
pub use store::mock;

/// Frozen `fromDateTime`/`toDateTime` bounds for a refresh pass.
///
/// Stored with the cursor so a resumed refresh keeps paging the same result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateWindow {
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    pub to: DateTime<Utc>,
}

/// Position within one endpoint's result set for one congress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub endpoint: String,
    pub congress: u32,
    pub offset: u64,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<UpdateWindow>,
}

impl Cursor {
    /// Fresh cursor at offset 0.
    pub fn start(endpoint: impl Into<String>, congress: u32) -> Self {
        Self {
            endpoint: endpoint.into(),
            congress,
            offset: 0,
            done: false,
            window: None,
        }
    }

    /// Cursor after accepting a page of `records` records.
    #[must_use]
    pub fn advanced(&self, records: usize, has_more: bool) -> Self {
        Self {
            offset: self.offset + records as u64,
            done: !has_more,
            ..self.clone()
        }
    }
}

/// Everything a later run needs to resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub last_processed_congress: u32,
    /// endpoint -> congress -> cursor
    #[serde(default)]
    pub endpoint_cursors: BTreeMap<String, BTreeMap<u32, Cursor>>,
    /// endpoint -> start time of the last run that finished it
    #[serde(default)]
    pub endpoint_last_sync_at: BTreeMap<String, DateTime<Utc>>,
}

impl SyncState {
    /// State for a store that has never been written.
    #[must_use]
    pub const fn seeded(starting_congress: u32) -> Self {
        Self {
            last_processed_congress: starting_congress,
            endpoint_cursors: BTreeMap::new(),
            endpoint_last_sync_at: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn cursor(&self, endpoint: &str, congress: u32) -> Option<&Cursor> {
        self.endpoint_cursors
            .get(endpoint)
            .and_then(|by_congress| by_congress.get(&congress))
    }

    pub(crate) fn set_cursor(&mut self, cursor: Cursor) {
        self.endpoint_cursors
            .entry(cursor.endpoint.clone())
            .or_default()
            .insert(cursor.congress, cursor);
    }

    /// Number of stored cursors, across all endpoints.
    #[must_use]
    pub fn cursor_count(&self) -> usize {
        self.endpoint_cursors.values().map(BTreeMap::len).sum()
    }
}

#[derive(Debug, Clone, Error)]
pub enum StateError {
    #[error("state store I/O failed: {0}")]
    Io(String),

    #[error("checkpoint is corrupt: {0}")]
    Corrupt(String),

    #[error("failed to encode checkpoint: {0}")]
    Encode(String),

    #[error("cursor for {endpoint}/{congress} rejected: {reason}")]
    CursorRegression {
        endpoint: String,
        congress: u32,
        reason: String,
    },
}
