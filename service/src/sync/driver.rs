use serde::Serialize;
use tracing::{debug, info, warn};

use super::schema::to_row;
use super::{DetailEnricher, DetailStatus, EnrichedRecord, Page, Paginator, SyncContext, SyncError};
use crate::endpoints::EndpointSpec;
use crate::sink::{Ack, RowBatch};
use crate::state::Cursor;

/// How a driver finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum DriverStatus {
    Done,
    Cancelled,
    Failed(String),
}

/// Per-(endpoint, congress) result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverOutcome {
    pub endpoint: String,
    pub congress: u32,
    pub status: DriverStatus,
    pub pages: u32,
    pub rows_emitted: usize,
    pub rejected_records: usize,
    pub detail_failures: usize,
}

impl DriverOutcome {
    fn new(endpoint: &str, congress: u32) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            congress,
            status: DriverStatus::Done,
            pages: 0,
            rows_emitted: 0,
            rejected_records: 0,
            detail_failures: 0,
        }
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status == DriverStatus::Done
    }
}

enum Phase {
    Pending,
    FetchingPage(Cursor),
    Enriching(Page),
    Emitting {
        records: Vec<EnrichedRecord>,
        next_cursor: Cursor,
        has_more: bool,
    },
    Done,
    Cancelled,
    Error(SyncError),
}

/// Drives one endpoint for one congress from its stored cursor to the end of the list.
pub struct EndpointDriver<'a> {
    ctx: &'a SyncContext,
    spec: &'a EndpointSpec,
    congress: u32,
}

impl<'a> EndpointDriver<'a> {
    #[must_use]
    pub const fn new(ctx: &'a SyncContext, spec: &'a EndpointSpec, congress: u32) -> Self {
        Self {
            ctx,
            spec,
            congress,
        }
    }

    /// Run to a terminal phase.
    ///
    /// Fetch and sink failures end this driver with [`DriverStatus::Failed`] and leave the
    /// stored cursor where it was.
    ///
    /// # Errors
    /// Returns [`SyncError::StatePersist`] when the checkpoint cannot be written; the run
    /// must stop.
    pub async fn run(self) -> Result<DriverOutcome, SyncError> {
        let endpoint = self.spec.name;
        let congress = self.congress;
        let paginator = Paginator::new(&self.ctx.client, self.ctx.settings.page_size);
        let enricher = DetailEnricher::new(&self.ctx.client, self.ctx.settings.detail_concurrency);
        let mut outcome = DriverOutcome::new(endpoint, congress);
        let mut phase = Phase::Pending;

        loop {
            phase = match phase {
                Phase::Pending => {
                    let cursor = self.ctx.state.cursor(endpoint, congress).await;
                    if cursor.done {
                        debug!(endpoint, congress, "cursor already done, nothing to fetch");
                        Phase::Done
                    } else {
                        if cursor.offset > 0 {
                            info!(endpoint, congress, offset = cursor.offset, "resuming");
                        }
                        Phase::FetchingPage(cursor)
                    }
                }

                Phase::FetchingPage(cursor) => {
                    if self.ctx.is_cancelled() {
                        Phase::Cancelled
                    } else {
                        match paginator.next_page(self.spec, congress, &cursor).await {
                            Ok(page) => Phase::Enriching(page),
                            Err(e) => Phase::Error(e),
                        }
                    }
                }

                Phase::Enriching(page) => {
                    let records = enricher.enrich(page.records, self.spec).await;
                    Phase::Emitting {
                        records,
                        next_cursor: page.next_cursor,
                        has_more: page.has_more,
                    }
                }

                Phase::Emitting {
                    records,
                    next_cursor,
                    has_more,
                } => match self.emit(&records, next_cursor.clone(), &mut outcome).await {
                    Ok(()) if has_more => Phase::FetchingPage(next_cursor),
                    Ok(()) => Phase::Done,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => Phase::Error(e),
                },

                Phase::Done => {
                    info!(
                        endpoint,
                        congress,
                        pages = outcome.pages,
                        rows = outcome.rows_emitted,
                        "endpoint done"
                    );
                    outcome.status = DriverStatus::Done;
                    return Ok(outcome);
                }

                Phase::Cancelled => {
                    info!(endpoint, congress, pages = outcome.pages, "cancelled between pages");
                    outcome.status = DriverStatus::Cancelled;
                    return Ok(outcome);
                }

                Phase::Error(e) => {
                    warn!(endpoint, congress, error = %e, "endpoint failed, cursor kept");
                    outcome.status = DriverStatus::Failed(e.to_string());
                    return Ok(outcome);
                }
            };
        }
    }

    // Rows go downstream first; the cursor only moves once they are acknowledged.
    async fn emit(
        &self,
        records: &[EnrichedRecord],
        next_cursor: Cursor,
        outcome: &mut DriverOutcome,
    ) -> Result<(), SyncError> {
        let endpoint = self.spec.name;
        let congress = self.congress;

        let mut rows = Vec::with_capacity(records.len());
        let mut rejected = 0;
        let mut detail_failures = 0;
        for record in records {
            if record.status == DetailStatus::Failed {
                detail_failures += 1;
            }
            match to_row(self.spec, record) {
                Ok(row) => rows.push(row),
                Err(violation) => {
                    rejected += 1;
                    warn!(endpoint, congress, error = %violation, "record rejected");
                }
            }
        }

        let batch = RowBatch {
            table: self.spec.table().to_string(),
            endpoint: endpoint.to_string(),
            congress,
            rows,
            cursor: next_cursor,
        };

        let ack = self
            .ctx
            .sink
            .write_batch(&batch)
            .await
            .map_err(|source| SyncError::Sink {
                endpoint: endpoint.to_string(),
                congress,
                source,
            })?;
        if let Ack::Rejected(reason) = ack {
            return Err(SyncError::SinkRejected {
                endpoint: endpoint.to_string(),
                congress,
                reason,
            });
        }

        self.ctx
            .state
            .advance_cursor(endpoint, congress, batch.cursor.clone())
            .await?;
        self.ctx.state.checkpoint().await?;

        outcome.pages += 1;
        outcome.rows_emitted += batch.rows.len();
        outcome.rejected_records += rejected;
        outcome.detail_failures += detail_failures;

        debug!(
            endpoint,
            congress,
            rows = batch.rows.len(),
            rejected,
            offset = batch.cursor.offset,
            done = batch.cursor.done,
            "page checkpointed"
        );
        Ok(())
    }
}
