//! Downstream handoff.
//!
//! The driver hands one [`RowBatch`] per page to a [`RowSink`] and only advances the cursor
//! once the sink answers [`Ack::Accepted`]. A sink must therefore have made the batch
//! durable before acknowledging it.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::state::Cursor;

/// One typed value of a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Int(i64),
    Text(String),
    Json(Value),
}

impl Cell {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Column name to value.
pub type Row = BTreeMap<String, Cell>;

/// Rows of one page, destined for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowBatch {
    pub table: String,
    pub endpoint: String,
    pub congress: u32,
    pub rows: Vec<Row>,
    /// Becomes the stored cursor once the batch is accepted.
    pub cursor: Cursor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    Accepted,
    Rejected(String),
}

#[derive(Debug, Clone, Error)]
pub enum SinkError {
    #[error("sink I/O failed: {0}")]
    Io(String),

    #[error("failed to encode row: {0}")]
    Encode(String),
}

#[async_trait]
pub trait RowSink: Send + Sync {
    async fn write_batch(&self, batch: &RowBatch) -> Result<Ack, SinkError>;
}

/// Appends rows as JSON lines to `<dir>/<table>.jsonl`.
///
/// Writers to the same table take turns; different tables are written concurrently.
#[derive(Debug, Clone)]
pub struct JsonlSink {
    dir: PathBuf,
    table_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl JsonlSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            table_locks: Arc::default(),
        }
    }

    async fn table_lock(&self, table: &str) -> Arc<Mutex<()>> {
        self.table_locks
            .lock()
            .await
            .entry(table.to_string())
            .or_default()
            .clone()
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn table_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.jsonl"))
    }

    /// Write the table manifest to `<dir>/schema.json`.
    ///
    /// # Errors
    /// Returns an error if the directory or file cannot be written.
    pub async fn write_schema(&self, manifest: &Value) -> Result<PathBuf, SinkError> {
        let path = self.dir.join("schema.json");
        let body = serde_json::to_vec_pretty(manifest).map_err(|e| SinkError::Encode(e.to_string()))?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SinkError::Io(format!("creating {}: {e}", self.dir.display())))?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| SinkError::Io(format!("writing {}: {e}", path.display())))?;
        Ok(path)
    }
}

#[async_trait]
impl RowSink for JsonlSink {
    async fn write_batch(&self, batch: &RowBatch) -> Result<Ack, SinkError> {
        let mut buf = Vec::new();
        for row in &batch.rows {
            serde_json::to_writer(&mut buf, row).map_err(|e| SinkError::Encode(e.to_string()))?;
            buf.push(b'\n');
        }

        let path = self.table_path(&batch.table);
        let dir = self.dir.clone();
        let rows = batch.rows.len();

        let lock = self.table_lock(&batch.table).await;
        let _guard = lock.lock().await;
        let target = path.clone();
        tokio::task::spawn_blocking(move || append_synced(&dir, &target, &buf))
            .await
            .map_err(|e| SinkError::Io(format!("sink writer panicked: {e}")))??;

        debug!(
            table = %batch.table,
            congress = batch.congress,
            rows,
            path = %path.display(),
            "batch appended"
        );
        Ok(Ack::Accepted)
    }
}

fn append_synced(dir: &Path, path: &Path, buf: &[u8]) -> Result<(), SinkError> {
    let io_err = |e: std::io::Error| SinkError::Io(format!("{}: {e}", path.display()));
    std::fs::create_dir_all(dir).map_err(io_err)?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_err)?;
    file.write_all(buf).map_err(io_err)?;
    file.sync_all().map_err(io_err)
}

#[cfg(any(test, feature = "test-utils"))]
#[allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::missing_const_for_fn,
    clippy::must_use_candidate
)]
pub mod mock {
    //! Collecting sink for unit testing.

    use super::{Ack, RowBatch, RowSink, SinkError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    type Verdict = dyn Fn(&RowBatch) -> Result<Ack, SinkError> + Send + Sync;

    /// Records every accepted batch. A verdict closure can reject or fail chosen batches.
    pub struct CollectingSink {
        batches: Mutex<Vec<RowBatch>>,
        verdict: Option<Box<Verdict>>,
    }

    impl Default for CollectingSink {
        fn default() -> Self {
            Self::new()
        }
    }

    impl CollectingSink {
        pub fn new() -> Self {
            Self {
                batches: Mutex::new(Vec::new()),
                verdict: None,
            }
        }

        /// Decide per batch; anything other than `Ok(Ack::Accepted)` is not recorded.
        pub fn with_verdict<F>(verdict: F) -> Self
        where
            F: Fn(&RowBatch) -> Result<Ack, SinkError> + Send + Sync + 'static,
        {
            Self {
                batches: Mutex::new(Vec::new()),
                verdict: Some(Box::new(verdict)),
            }
        }

        pub fn batches(&self) -> Vec<RowBatch> {
            self.batches.lock().unwrap().clone()
        }

        /// Accepted batches for one table.
        pub fn batches_for(&self, table: &str) -> Vec<RowBatch> {
            self.batches()
                .into_iter()
                .filter(|b| b.table == table)
                .collect()
        }

        /// Total accepted rows for one table.
        pub fn row_count(&self, table: &str) -> usize {
            self.batches_for(table).iter().map(|b| b.rows.len()).sum()
        }
    }

    #[async_trait]
    impl RowSink for CollectingSink {
        async fn write_batch(&self, batch: &RowBatch) -> Result<Ack, SinkError> {
            let ack = match &self.verdict {
                Some(verdict) => verdict(batch)?,
                None => Ack::Accepted,
            };
            if ack == Ack::Accepted {
                self.batches.lock().unwrap().push(batch.clone());
            }
            Ok(ack)
        }
    }
}
