//! Incremental sync engine.
//!
//! Components, leaves first:
//!
//! - [`Paginator`] - one list page per call, offset/limit
//! - [`DetailEnricher`] - per-record detail fetch, merged under `detail`
//! - [`schema`] - raw JSON to typed [`crate::sink::Row`]s
//! - [`EndpointDriver`] - one (endpoint, congress) from cursor to `Done`
//! - [`SyncOrchestrator`] - the congress loop with bounded concurrent drivers
//!
//! Everything a component needs arrives through [`SyncContext`]; there is no global state.

mod driver;
mod enricher;
mod orchestrator;
mod paginator;
pub mod schema;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use thiserror::Error;

use crate::config::{Config, CurrentCongressPolicy};
use crate::congress::{ApiClient, ApiError};
use crate::endpoints::{EndpointCatalog, TemplateError};
use crate::sink::{RowSink, SinkError};
use crate::state::{StateError, StateManager};

pub use driver::{DriverOutcome, DriverStatus, EndpointDriver};
pub use enricher::{DetailEnricher, DetailStatus, EnrichedRecord};
pub use orchestrator::{CongressReport, SyncOrchestrator, SyncReport};
pub use paginator::{Page, Paginator, RawRecord};

#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// List fetch failed after the client spent its retry budget.
    #[error("fetching {endpoint} for congress {congress} failed: {source}")]
    EndpointFetch {
        endpoint: String,
        congress: u32,
        #[source]
        source: ApiError,
    },

    /// Checkpoint could not be written. Fatal for the run.
    #[error("failed to persist sync state: {0}")]
    StatePersist(#[from] StateError),

    #[error("sink failed for {endpoint} congress {congress}: {source}")]
    Sink {
        endpoint: String,
        congress: u32,
        #[source]
        source: SinkError,
    },

    #[error("sink rejected {endpoint} congress {congress}: {reason}")]
    SinkRejected {
        endpoint: String,
        congress: u32,
        reason: String,
    },

    #[error("bad list template: {0}")]
    Template(#[from] TemplateError),
}

impl SyncError {
    /// Errors that abort the whole run rather than a single driver.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::StatePersist(_))
    }
}

/// Tunables resolved once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub starting_congress: u32,
    pub current_congress: u32,
    pub policy: CurrentCongressPolicy,
    pub page_size: u32,
    pub worker_limit: usize,
    pub detail_concurrency: usize,
}

impl SyncSettings {
    /// Resolve settings from config; the current congress falls back to the one in session
    /// on `today`.
    #[must_use]
    pub fn from_config(config: &Config, today: NaiveDate) -> Self {
        Self {
            starting_congress: config.sync.starting_congress_number,
            current_congress: config
                .sync
                .current_congress
                .unwrap_or_else(|| current_congress_for(today)),
            policy: config.sync.current_congress_policy,
            page_size: config.api.page_size,
            worker_limit: config.sync.worker_limit.max(1),
            detail_concurrency: config.sync.detail_concurrency.max(1),
        }
    }
}

/// Congress in session on `date`. The 1st Congress convened in 1789 and each one spans
/// two years, starting on January 3 of odd years. Terms before 1935 began in March, so dates
/// in early 1789-1933 odd years resolve to the next Congress one or two months early.
#[must_use]
pub fn current_congress_for(date: NaiveDate) -> u32 {
    let years_since = u32::try_from(date.year() - 1789).unwrap_or(0);
    let congress = years_since / 2 + 1;
    let before_convening = years_since % 2 == 0 && date.month() == 1 && date.day() < 3;
    if before_convening && congress > 1 {
        congress - 1
    } else {
        congress
    }
}

/// Shared, read-only context for one sync run.
pub struct SyncContext {
    pub client: ApiClient,
    pub catalog: EndpointCatalog,
    pub state: Arc<StateManager>,
    pub sink: Arc<dyn RowSink>,
    pub settings: SyncSettings,
    pub cancel: Arc<AtomicBool>,
}

impl SyncContext {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}
