use std::collections::BTreeSet;
use std::sync::atomic::Ordering;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::{DriverOutcome, DriverStatus, EndpointDriver, SyncContext, SyncError};
use crate::config::CurrentCongressPolicy;
use crate::state::UpdateWindow;

/// Drivers run for one congress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CongressReport {
    pub congress: u32,
    /// Every configured endpoint reached `Done`.
    pub complete: bool,
    pub outcomes: Vec<DriverOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub current_congress: u32,
    pub congresses: Vec<CongressReport>,
    /// Endpoints that failed and were not driven for later congresses.
    pub failed_endpoints: BTreeSet<String>,
    pub cancelled: bool,
    pub last_processed_congress: u32,
}

impl SyncReport {
    #[must_use]
    pub fn rows_emitted(&self) -> usize {
        self.outcomes().map(|o| o.rows_emitted).sum()
    }

    pub fn outcomes(&self) -> impl Iterator<Item = &DriverOutcome> {
        self.congresses.iter().flat_map(|c| c.outcomes.iter())
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed_endpoints.is_empty() && !self.cancelled
    }
}

/// Top-level congress loop.
///
/// Walks from `max(starting_congress, last_processed_congress)` up to the current congress,
/// running every endpoint's driver for one congress at a time with at most `worker_limit`
/// drivers in flight.
pub struct SyncOrchestrator {
    ctx: SyncContext,
}

impl SyncOrchestrator {
    #[must_use]
    pub const fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    #[must_use]
    pub const fn context(&self) -> &SyncContext {
        &self.ctx
    }

    /// Run one sync pass.
    ///
    /// # Errors
    /// Returns an error only when state cannot be loaded or persisted. Endpoint failures are
    /// reported in the [`SyncReport`].
    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id);
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid) -> Result<SyncReport, SyncError> {
        let started_at = Utc::now();
        let settings = &self.ctx.settings;
        let state = self.ctx.state.load().await?;

        let current = settings.current_congress;
        let first = settings.starting_congress.max(state.last_processed_congress);
        info!(
            first,
            current,
            endpoints = self.ctx.catalog.len(),
            policy = ?settings.policy,
            "sync run starting"
        );

        if settings.policy == CurrentCongressPolicy::Refresh && first <= current {
            self.reset_current_congress(current, started_at).await;
        }

        let mut report = SyncReport {
            run_id,
            started_at,
            current_congress: current,
            congresses: Vec::new(),
            failed_endpoints: BTreeSet::new(),
            cancelled: false,
            last_processed_congress: state.last_processed_congress,
        };
        let mut contiguous = true;

        for congress in first..=current {
            if self.ctx.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let specs: Vec<_> = self
                .ctx
                .catalog
                .iter()
                .filter(|spec| !report.failed_endpoints.contains(spec.name))
                .collect();
            let skipped = self.ctx.catalog.len() - specs.len();

            let mut drivers = stream::iter(specs)
                .map(|spec| EndpointDriver::new(&self.ctx, spec, congress).run())
                .buffer_unordered(settings.worker_limit.max(1));

            let mut outcomes = Vec::new();
            while let Some(result) = drivers.next().await {
                match result {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(e) => {
                        // Drivers still in flight are dropped with the stream.
                        self.ctx.cancel.store(true, Ordering::SeqCst);
                        error!(congress, error = %e, "sync run aborted");
                        return Err(e);
                    }
                }
            }
            // Completion order is arbitrary; report in catalog order.
            outcomes.sort_by_key(|o| {
                self.ctx
                    .catalog
                    .names()
                    .position(|name| name == o.endpoint)
            });

            for outcome in &outcomes {
                match &outcome.status {
                    DriverStatus::Done if congress == current => {
                        self.record_last_sync(&outcome.endpoint, current, started_at)
                            .await;
                    }
                    DriverStatus::Done => {}
                    DriverStatus::Cancelled => report.cancelled = true,
                    DriverStatus::Failed(reason) => {
                        warn!(
                            endpoint = %outcome.endpoint,
                            congress,
                            reason = %reason,
                            "endpoint skipped for the rest of this run"
                        );
                        report.failed_endpoints.insert(outcome.endpoint.clone());
                    }
                }
            }

            let complete = skipped == 0 && outcomes.iter().all(DriverOutcome::is_done);
            contiguous &= complete;
            if contiguous && congress < current {
                self.ctx.state.advance_congress(congress).await;
            }

            info!(
                congress,
                complete,
                rows = outcomes.iter().map(|o| o.rows_emitted).sum::<usize>(),
                "congress finished"
            );
            report.congresses.push(CongressReport {
                congress,
                complete,
                outcomes,
            });

            if report.cancelled {
                break;
            }
        }

        self.ctx.state.checkpoint().await?;
        report.last_processed_congress = self.ctx.state.snapshot().await.last_processed_congress;

        info!(
            congresses = report.congresses.len(),
            rows = report.rows_emitted(),
            failed = report.failed_endpoints.len(),
            cancelled = report.cancelled,
            last_processed_congress = report.last_processed_congress,
            "sync run finished"
        );
        Ok(report)
    }

    // A cursor that finished a frozen refresh window only covers changes up to the window's
    // end, even when it was completed by a later run.
    async fn record_last_sync(&self, endpoint: &str, current: u32, started_at: DateTime<Utc>) {
        let synced_until = self
            .ctx
            .state
            .cursor(endpoint, current)
            .await
            .window
            .map_or(started_at, |window| window.to);
        self.ctx.state.update_last_sync(endpoint, synced_until).await;
    }

    // Reopen finished cursors of the congress in session. Endpoints that filter by update
    // time only re-read what changed since their last sync.
    async fn reset_current_congress(&self, current: u32, started_at: DateTime<Utc>) {
        for spec in self.ctx.catalog.iter() {
            let cursor = self.ctx.state.cursor(spec.name, current).await;
            if !cursor.done {
                continue;
            }
            let window = if spec.supports_updated_since {
                self.ctx
                    .state
                    .last_sync(spec.name)
                    .await
                    .map(|from| UpdateWindow {
                        from: Some(from),
                        to: started_at,
                    })
            } else {
                None
            };
            self.ctx.state.reset_cursor(spec.name, current, window).await;
        }
    }
}
