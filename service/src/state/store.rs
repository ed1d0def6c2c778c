use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use super::StateError;

/// Durable home of the checkpoint blob.
///
/// `write` must replace the whole blob atomically: a reader sees either the previous blob
/// or the new one, never a mix.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn read(&self) -> Result<Option<Vec<u8>>, StateError>;
    async fn write(&self, blob: Vec<u8>) -> Result<(), StateError>;
}

/// Checkpoint stored in a local file, replaced via temp file + rename.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn read(&self) -> Result<Option<Vec<u8>>, StateError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::Io(format!(
                "reading {}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn write(&self, blob: Vec<u8>) -> Result<(), StateError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &blob))
            .await
            .map_err(|e| StateError::Io(format!("checkpoint writer panicked: {e}")))?
    }
}

fn write_atomically(path: &Path, blob: &[u8]) -> Result<(), StateError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let io_err = |what: &str, e: std::io::Error| {
        StateError::Io(format!("{what} {}: {e}", path.display()))
    };

    std::fs::create_dir_all(&dir).map_err(|e| io_err("creating directory for", e))?;
    let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| io_err("creating temp file for", e))?;
    tmp.write_all(blob)
        .map_err(|e| io_err("writing temp file for", e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| io_err("syncing temp file for", e))?;
    tmp.persist(path)
        .map_err(|e| io_err("replacing", e.error))?;
    Ok(())
}

#[cfg(any(test, feature = "test-utils"))]
#[allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::missing_const_for_fn,
    clippy::must_use_candidate
)]
pub mod mock {
    //! In-memory state store for unit testing.

    use super::{StateError, StateStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Keeps the blob in memory. Writes can be made to fail with `fail_writes(true)`, or
    /// just the next few with `fail_next_writes(n)`.
    #[derive(Default)]
    pub struct MemoryStateStore {
        blob: Mutex<Option<Vec<u8>>>,
        writes: AtomicUsize,
        fail_writes: AtomicBool,
        failures_left: AtomicUsize,
    }

    impl MemoryStateStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Store pre-seeded with a blob (e.g. a checkpoint from an earlier run).
        pub fn with_blob(blob: Vec<u8>) -> Self {
            let store = Self::default();
            *store.blob.lock().unwrap() = Some(blob);
            store
        }

        pub fn fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        pub fn fail_next_writes(&self, n: usize) {
            self.failures_left.store(n, Ordering::SeqCst);
        }

        /// Number of successful writes.
        pub fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }

        pub fn blob(&self) -> Option<Vec<u8>> {
            self.blob.lock().unwrap().clone()
        }

        /// Current blob decoded as JSON.
        pub fn json(&self) -> Option<serde_json::Value> {
            self.blob()
                .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        }
    }

    #[async_trait]
    impl StateStore for MemoryStateStore {
        async fn read(&self) -> Result<Option<Vec<u8>>, StateError> {
            Ok(self.blob())
        }

        async fn write(&self, blob: Vec<u8>) -> Result<(), StateError> {
            let scripted_failure = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if scripted_failure || self.fail_writes.load(Ordering::SeqCst) {
                return Err(StateError::Io("simulated write failure".into()));
            }
            *self.blob.lock().unwrap() = Some(blob);
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
