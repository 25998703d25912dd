// Dedup and cursor state.
//
// A small local table: which note IDs have been synced, the last trusted
// resume cursor with its configuration fingerprint, and the last
// successful live-sync timestamp. Persistence is optional JSON-on-disk;
// the lock is never held across the write.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use notesync_common::{Note, Result};

#[async_trait]
pub trait SyncStore: Send + Sync {
    async fn is_synced(&self, id: &str) -> Result<bool>;

    /// Record a note as synced. Idempotent; once marked, a note is never
    /// re-summarized or re-counted as new.
    async fn mark_synced(&self, note: &Note) -> Result<()>;

    /// Stored resume cursor and its configuration fingerprint.
    async fn cursor(&self) -> Result<Option<(String, String)>>;
    async fn set_cursor(&self, cursor: &str, fingerprint: &str) -> Result<()>;

    async fn last_live_sync(&self) -> Result<Option<DateTime<Utc>>>;
    async fn set_last_live_sync(&self, at: DateTime<Utc>) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupRecord {
    pub synced: bool,
    pub title: String,
    pub source_url: String,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    records: HashMap<String, DedupRecord>,
    last_cursor: Option<String>,
    cursor_fingerprint: Option<String>,
    last_live_sync_at: Option<DateTime<Utc>>,
}

/// In-memory store with optional JSON file persistence.
pub struct LocalStore {
    state: Mutex<StoreState>,
    path: Option<PathBuf>,
}

impl LocalStore {
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            path: None,
        }
    }

    /// Open a file-backed store, loading existing state when present.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("corrupt store file at {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => {
                return Err(anyhow::Error::from(e)
                    .context(format!("reading store file {}", path.display()))
                    .into())
            }
        };
        Ok(Self {
            state: Mutex::new(state),
            path: Some(path),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot under the lock, write after releasing it.
    async fn persist(&self) -> Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let snapshot = {
            let state = self.lock();
            serde_json::to_string_pretty(&*state).context("serializing store state")?
        };
        tokio::fs::write(path, snapshot)
            .await
            .with_context(|| format!("writing store file {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl SyncStore for LocalStore {
    async fn is_synced(&self, id: &str) -> Result<bool> {
        Ok(self.lock().records.get(id).is_some_and(|r| r.synced))
    }

    async fn mark_synced(&self, note: &Note) -> Result<()> {
        {
            let mut state = self.lock();
            state.records.insert(
                note.id.clone(),
                DedupRecord {
                    synced: true,
                    title: note.title.clone(),
                    source_url: note.source_url.clone(),
                    synced_at: Utc::now(),
                },
            );
        }
        debug!(note_id = %note.id, "marked synced");
        self.persist().await
    }

    async fn cursor(&self) -> Result<Option<(String, String)>> {
        let state = self.lock();
        Ok(match (&state.last_cursor, &state.cursor_fingerprint) {
            (Some(cursor), Some(fp)) => Some((cursor.clone(), fp.clone())),
            _ => None,
        })
    }

    async fn set_cursor(&self, cursor: &str, fingerprint: &str) -> Result<()> {
        {
            let mut state = self.lock();
            state.last_cursor = Some(cursor.to_string());
            state.cursor_fingerprint = Some(fingerprint.to_string());
        }
        self.persist().await
    }

    async fn last_live_sync(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.lock().last_live_sync_at)
    }

    async fn set_last_live_sync(&self, at: DateTime<Utc>) -> Result<()> {
        self.lock().last_live_sync_at = Some(at);
        self.persist().await
    }
}
