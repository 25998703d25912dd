// In-memory fakes for exercising the orchestrator without a network.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use notesync_common::{Note, PageBatch, Result, SourceMode, SyncConfig, SyncError, WebSourceConfig};

use crate::store::LocalStore;
use crate::summarize::{AudioFetcher, Summarizer, Transcriber};
use crate::sync::{NoteSource, SyncEngine};

pub fn note(id: &str) -> Note {
    Note {
        id: id.to_string(),
        title: format!("Note {id}"),
        body: format!("Body of note {id}."),
        source_url: format!("https://platform.example/notes/{id}"),
        images: Vec::new(),
        is_video: false,
    }
}

pub fn video_note(id: &str) -> Note {
    Note {
        is_video: true,
        body: String::new(),
        ..note(id)
    }
}

pub fn batch(cursor: &str, ids: &[&str], next_cursor: &str) -> PageBatch {
    PageBatch {
        items: ids.iter().map(|id| note(id)).collect(),
        cursor: cursor.to_string(),
        next_cursor: next_cursor.to_string(),
        exhausted: next_cursor.is_empty(),
    }
}

/// Scripted paginated source. Pages are keyed by cursor ("" is the
/// head); every fetch is recorded for assertion.
#[derive(Default)]
pub struct MockSource {
    pages: HashMap<String, PageBatch>,
    fail_on: HashSet<String>,
    notes: HashMap<String, Note>,
    calls: Mutex<Vec<String>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, batch: PageBatch) -> Self {
        self.pages.insert(batch.cursor.clone(), batch);
        self
    }

    /// Make fetches for this cursor fail with an upstream error.
    pub fn fail_on(mut self, cursor: &str) -> Self {
        self.fail_on.insert(cursor.to_string());
        self
    }

    pub fn note(mut self, url: &str, note: Note) -> Self {
        self.notes.insert(url.to_string(), note);
        self
    }

    /// Cursors fetched so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl NoteSource for MockSource {
    async fn fetch_page(&self, cursor: &str) -> Result<PageBatch> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(cursor.to_string());
        if self.fail_on.contains(cursor) {
            return Err(SyncError::Upstream(format!("cursor {cursor:?} rejected")));
        }
        match self.pages.get(cursor) {
            Some(batch) => Ok(batch.clone()),
            None => Ok(PageBatch {
                items: Vec::new(),
                cursor: cursor.to_string(),
                next_cursor: String::new(),
                exhausted: true,
            }),
        }
    }

    async fn fetch_one(&self, url: &str) -> Result<Note> {
        self.notes
            .get(url)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("no note at {url}")))
    }
}

/// Summarizer that fails for a chosen set of note IDs and echoes
/// markdown for the rest.
#[derive(Default)]
pub struct ScriptedSummarizer {
    fail_ids: HashSet<String>,
}

impl ScriptedSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(mut self, id: &str) -> Self {
        self.fail_ids.insert(id.to_string());
        self
    }
}

#[async_trait]
impl Summarizer for ScriptedSummarizer {
    async fn summarize(&self, note: &Note) -> anyhow::Result<String> {
        anyhow::ensure!(
            !self.fail_ids.contains(&note.id),
            "summarization refused for {}",
            note.id
        );
        Ok(format!("## {}\n\n{}", note.title, note.body))
    }

    async fn summarize_video(&self, note: &Note, transcript: &str) -> anyhow::Result<String> {
        anyhow::ensure!(
            !self.fail_ids.contains(&note.id),
            "summarization refused for {}",
            note.id
        );
        Ok(format!("## {}\n\n{}", note.title, transcript))
    }
}

/// Transcriber returning a fixed transcript regardless of input.
pub struct StaticTranscriber(pub String);

#[async_trait]
impl Transcriber for StaticTranscriber {
    async fn transcribe(&self, _audio_path: &Path) -> anyhow::Result<String> {
        Ok(self.0.clone())
    }
}

/// Audio fetcher returning a fixed local path without downloading.
pub struct FixedAudioFetcher(pub PathBuf);

#[async_trait]
impl AudioFetcher for FixedAudioFetcher {
    async fn fetch_audio(
        &self,
        _url: &str,
        _headers: Option<&HashMap<String, String>>,
    ) -> anyhow::Result<PathBuf> {
        Ok(self.0.clone())
    }
}

/// Mock-mode config with zero delays so runs finish instantly.
pub fn test_sync_config() -> SyncConfig {
    SyncConfig {
        mode: SourceMode::Mock,
        min_live_sync_interval_seconds: 300,
        circuit_breaker_threshold: 3,
        min_request_delay_seconds: 0.0,
        max_request_delay_seconds: 0.0,
    }
}

/// Live-mode config with zero delays and no cooldown.
pub fn live_sync_config() -> SyncConfig {
    SyncConfig {
        mode: SourceMode::Live,
        min_live_sync_interval_seconds: 0,
        ..test_sync_config()
    }
}

pub fn engine_with(source: Arc<MockSource>, store: Arc<LocalStore>, cfg: SyncConfig) -> SyncEngine {
    SyncEngine::new(
        source,
        store,
        Arc::new(ScriptedSummarizer::new()),
        WebSourceConfig::default(),
        cfg,
    )
}
