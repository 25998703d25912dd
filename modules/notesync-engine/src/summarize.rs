// Collaborator capability traits.
//
// Summarization, transcription, and audio download are external
// black boxes consumed through narrow interfaces; the orchestrator only
// routes between the text and video paths.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;

use notesync_common::Note;

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Produce a markdown summary for a text note.
    async fn summarize(&self, note: &Note) -> Result<String>;

    /// Produce a markdown summary for a video note. Callers must supply a
    /// non-empty transcript; body text is usually absent for video.
    async fn summarize_video(&self, note: &Note, transcript: &str) -> Result<String>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<String>;
}

#[async_trait]
pub trait AudioFetcher: Send + Sync {
    /// Download a video's audio track to a local file.
    async fn fetch_audio(
        &self,
        url: &str,
        headers: Option<&HashMap<String, String>>,
    ) -> Result<PathBuf>;
}

/// No-op summarizer for wiring tests and dry runs: echoes the note as
/// minimal markdown without calling any model.
pub struct NoopSummarizer;

#[async_trait]
impl Summarizer for NoopSummarizer {
    async fn summarize(&self, note: &Note) -> Result<String> {
        Ok(format!("## {}\n\n{}", note.title, note.body))
    }

    async fn summarize_video(&self, note: &Note, transcript: &str) -> Result<String> {
        Ok(format!("## {}\n\n{}", note.title, transcript))
    }
}
