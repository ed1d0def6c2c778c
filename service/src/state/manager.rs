use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{Cursor, StateError, StateStore, SyncState, UpdateWindow};

/// Owns the [`SyncState`].
///
/// Cursor updates are serialized through one lock, so concurrent drivers working on
/// different (endpoint, congress) keys never interleave partial writes. `save` holds a
/// second lock for the duration of the store write; concurrent savers queue on it, and each
/// writes a snapshot taken after it acquired the lock.
pub struct StateManager {
    store: Arc<dyn StateStore>,
    starting_congress: u32,
    state: Mutex<SyncState>,
    save_lock: Mutex<()>,
}

impl StateManager {
    pub fn new(store: Arc<dyn StateStore>, starting_congress: u32) -> Self {
        Self {
            store,
            starting_congress,
            state: Mutex::new(SyncState::seeded(starting_congress)),
            save_lock: Mutex::new(()),
        }
    }

    /// Read the checkpoint from the store. A missing or empty blob yields a state seeded at
    /// the starting congress.
    ///
    /// # Errors
    /// Returns [`StateError::Corrupt`] if the blob cannot be decoded, or the store's error.
    pub async fn load(&self) -> Result<SyncState, StateError> {
        let loaded = match self.store.read().await? {
            Some(blob) if !blob.iter().all(u8::is_ascii_whitespace) => {
                serde_json::from_slice::<SyncState>(&blob)
                    .map_err(|e| StateError::Corrupt(e.to_string()))?
            }
            _ => {
                info!(
                    starting_congress = self.starting_congress,
                    "no checkpoint found, starting fresh"
                );
                SyncState::seeded(self.starting_congress)
            }
        };

        debug!(
            last_processed_congress = loaded.last_processed_congress,
            cursors = loaded.cursor_count(),
            "checkpoint loaded"
        );
        *self.state.lock().await = loaded.clone();
        Ok(loaded)
    }

    /// Replace the whole state and persist it.
    ///
    /// # Errors
    /// Returns an error if encoding or the store write fails. The in-memory state is
    /// replaced either way.
    pub async fn save(&self, state: SyncState) -> Result<(), StateError> {
        let _guard = self.save_lock.lock().await;
        *self.state.lock().await = state;
        self.persist_current().await
    }

    /// Persist the current in-memory state.
    ///
    /// # Errors
    /// Returns an error if encoding or the store write fails.
    pub async fn checkpoint(&self) -> Result<(), StateError> {
        let _guard = self.save_lock.lock().await;
        self.persist_current().await
    }

    // Caller holds `save_lock`.
    async fn persist_current(&self) -> Result<(), StateError> {
        let snapshot = self.state.lock().await.clone();
        let blob = serde_json::to_vec_pretty(&snapshot).map_err(|e| StateError::Encode(e.to_string()))?;
        self.store.write(blob).await
    }

    #[must_use]
    pub async fn snapshot(&self) -> SyncState {
        self.state.lock().await.clone()
    }

    /// Stored cursor for (endpoint, congress), or a fresh one at offset 0.
    pub async fn cursor(&self, endpoint: &str, congress: u32) -> Cursor {
        self.state
            .lock()
            .await
            .cursor(endpoint, congress)
            .cloned()
            .unwrap_or_else(|| Cursor::start(endpoint, congress))
    }

    /// Record a cursor for an accepted page. Offsets never decrease and a finished cursor
    /// never reopens; use [`Self::reset_cursor`] for an explicit resync.
    ///
    /// # Errors
    /// Returns [`StateError::CursorRegression`] if the update would violate either rule or
    /// the cursor does not belong to (endpoint, congress).
    pub async fn advance_cursor(
        &self,
        endpoint: &str,
        congress: u32,
        cursor: Cursor,
    ) -> Result<(), StateError> {
        let reject = |reason: String| StateError::CursorRegression {
            endpoint: endpoint.to_string(),
            congress,
            reason,
        };

        if cursor.endpoint != endpoint || cursor.congress != congress {
            return Err(reject(format!(
                "cursor belongs to {}/{}",
                cursor.endpoint, cursor.congress
            )));
        }

        let mut state = self.state.lock().await;
        if let Some(current) = state.cursor(endpoint, congress) {
            if cursor.offset < current.offset {
                return Err(reject(format!(
                    "offset {} is behind {}",
                    cursor.offset, current.offset
                )));
            }
            if current.done && !cursor.done {
                return Err(reject("cursor is already done".into()));
            }
        }

        debug!(
            endpoint,
            congress,
            offset = cursor.offset,
            done = cursor.done,
            "cursor advanced"
        );
        state.set_cursor(cursor);
        Ok(())
    }

    /// Explicit resync: restart (endpoint, congress) at offset 0, optionally limited to an
    /// update window.
    pub async fn reset_cursor(&self, endpoint: &str, congress: u32, window: Option<UpdateWindow>) {
        info!(endpoint, congress, ?window, "cursor reset for resync");
        let mut cursor = Cursor::start(endpoint, congress);
        cursor.window = window;
        self.state.lock().await.set_cursor(cursor);
    }

    pub async fn update_last_sync(&self, endpoint: &str, at: DateTime<Utc>) {
        self.state
            .lock()
            .await
            .endpoint_last_sync_at
            .insert(endpoint.to_string(), at);
    }

    pub async fn last_sync(&self, endpoint: &str) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .await
            .endpoint_last_sync_at
            .get(endpoint)
            .copied()
    }

    /// Move `last_processed_congress` forward. Lower values are ignored.
    pub async fn advance_congress(&self, congress: u32) {
        let mut state = self.state.lock().await;
        if congress > state.last_processed_congress {
            info!(
                from = state.last_processed_congress,
                to = congress,
                "last processed congress advanced"
            );
            state.last_processed_congress = congress;
        }
    }
}
