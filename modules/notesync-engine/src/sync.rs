// The sync orchestrator.
//
// Drives the ingestion source against the dedup store under a circuit
// breaker and inter-request pacing policy. Live runs use the hybrid
// cursor algorithm: one bounded head scan to catch newly published
// notes, then resume from the stored cursor when its configuration
// fingerprint still matches.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tracing::{debug, info, warn};

use notesync_common::{
    Cooldown, ItemSummary, Note, PageBatch, PendingCount, Result, SourceMode, SyncConfig,
    SyncError, SyncReport, WebSourceConfig,
};
use notesync_web::WebSource;

use crate::store::SyncStore;
use crate::summarize::{AudioFetcher, Summarizer, Transcriber};

/// Pages fetched from the head before resuming from a stored cursor.
/// Small on purpose: the head scan exists to catch notes published since
/// the last run, not to re-crawl.
pub const HEAD_SCAN_PAGES: u32 = 2;

/// Paginated note source, mockable for tests.
#[async_trait]
pub trait NoteSource: Send + Sync {
    /// Fetch one page; empty cursor means the head.
    async fn fetch_page(&self, cursor: &str) -> Result<PageBatch>;

    /// Fetch a single note by URL, bypassing pagination.
    async fn fetch_one(&self, url: &str) -> Result<Note>;
}

#[async_trait]
impl NoteSource for WebSource {
    async fn fetch_page(&self, cursor: &str) -> Result<PageBatch> {
        self.fetch_list_page(cursor).await
    }

    async fn fetch_one(&self, url: &str) -> Result<Note> {
        WebSource::fetch_one(self, url).await
    }
}

/// Receives per-item progress during a run. Implementations must not
/// block; the engine calls this between items.
pub trait ProgressSink: Send + Sync {
    fn report(&self, current: u32, total: u32, message: &str, new_summaries: &[ItemSummary]);
}

pub struct SyncEngine {
    source: Arc<dyn NoteSource>,
    store: Arc<dyn SyncStore>,
    summarizer: Arc<dyn Summarizer>,
    transcriber: Option<Arc<dyn Transcriber>>,
    audio: Option<Arc<dyn AudioFetcher>>,
    web_cfg: WebSourceConfig,
    cfg: SyncConfig,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn NoteSource>,
        store: Arc<dyn SyncStore>,
        summarizer: Arc<dyn Summarizer>,
        web_cfg: WebSourceConfig,
        cfg: SyncConfig,
    ) -> Self {
        Self {
            source,
            store,
            summarizer,
            transcriber: None,
            audio: None,
            web_cfg,
            cfg,
        }
    }

    /// Attach the video pipeline collaborators. Without them, video notes
    /// fail per-item rather than aborting the run.
    pub fn with_transcription(
        mut self,
        transcriber: Arc<dyn Transcriber>,
        audio: Arc<dyn AudioFetcher>,
    ) -> Self {
        self.transcriber = Some(transcriber);
        self.audio = Some(audio);
        self
    }

    // -----------------------------------------------------------------------
    // Bulk sync
    // -----------------------------------------------------------------------

    pub async fn sync(&self, limit: u32, confirm_live: bool) -> Result<SyncReport> {
        self.sync_with_progress(limit, confirm_live, None).await
    }

    pub async fn sync_with_progress(
        &self,
        limit: u32,
        confirm_live: bool,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<SyncReport> {
        self.cfg.validate()?;
        if limit == 0 {
            return Err(SyncError::InvalidInput("limit must be positive".to_string()));
        }

        let live = self.cfg.mode == SourceMode::Live;
        if live {
            if !confirm_live {
                return Err(SyncError::InvalidInput(
                    "live sync requires explicit confirmation".to_string(),
                ));
            }
            let cooldown = self.live_sync_cooldown().await?;
            if !cooldown.allowed {
                return Err(SyncError::RateLimited {
                    message: format!(
                        "live sync ran {}s ago; minimum interval is {}s",
                        cooldown.min_interval_seconds - cooldown.remaining_seconds,
                        cooldown.min_interval_seconds
                    ),
                    retry_after_secs: Some(cooldown.remaining_seconds),
                });
            }
        }

        let fingerprint = self.web_cfg.fingerprint();
        let resume_cursor = if live {
            match self.store.cursor().await? {
                Some((cursor, fp)) if fp == fingerprint => Some(cursor),
                Some((cursor, _)) => {
                    info!(%cursor, "stored cursor fingerprint is stale, restarting from head");
                    None
                }
                None => None,
            }
        } else {
            None
        };

        let mut run = RunState::new(limit, self.cfg.circuit_breaker_threshold);

        // Head scan: bounded pass from the very start, before any resume,
        // so newly published notes ahead of the resume point are seen.
        let mut head_next = String::new();
        let mut exhausted = false;
        let mut cursor = String::new();
        for page in 0..HEAD_SCAN_PAGES {
            if run.satisfied() {
                break;
            }
            let batch = self.source.fetch_page(&cursor).await?;
            // A head page with nothing usable before anything has been
            // seen means the schema no longer matches or the platform
            // returned an empty shell. Raised before any cursor or
            // cooldown state is touched.
            if page == 0 && batch.items.is_empty() {
                return Err(SyncError::Upstream(
                    "zero usable items extracted from the list endpoint".to_string(),
                ));
            }
            head_next = batch.next_cursor.clone();
            run.note_cursor(&batch);
            self.process_batch(&batch, &mut run, live, progress).await?;
            if batch.exhausted {
                exhausted = true;
                break;
            }
            cursor = batch.next_cursor;
        }

        // Continue from the stored cursor when trusted, otherwise from
        // the head scan's own continuation.
        if !run.satisfied() && !exhausted {
            let mut from_stored = resume_cursor.is_some();
            let mut cursor = resume_cursor.unwrap_or_else(|| head_next.clone());
            while !cursor.is_empty() && !run.satisfied() {
                let batch = match self.source.fetch_page(&cursor).await {
                    Ok(batch) => batch,
                    Err(SyncError::Upstream(msg)) if from_stored => {
                        // The remembered cursor went invalid server-side.
                        // Fall back once to the head scan's continuation.
                        warn!(%cursor, error = %msg, "stored cursor rejected, falling back to head-scan continuation");
                        from_stored = false;
                        if head_next.is_empty() || head_next == cursor {
                            break;
                        }
                        cursor = head_next.clone();
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                from_stored = false;
                run.note_cursor(&batch);
                self.process_batch(&batch, &mut run, live, progress).await?;
                if batch.exhausted {
                    break;
                }
                cursor = batch.next_cursor;
            }
        }

        let report = run.into_report(false);
        if live {
            if let Some(ref cursor) = report.last_cursor {
                self.store.set_cursor(cursor, &fingerprint).await?;
            }
            self.store.set_last_live_sync(Utc::now()).await?;
        }

        info!(
            fetched = report.fetched,
            new = report.new,
            skipped = report.skipped,
            failed = report.failed,
            "sync run complete"
        );
        Ok(report)
    }

    async fn process_batch(
        &self,
        batch: &PageBatch,
        run: &mut RunState,
        live: bool,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<()> {
        for note in &batch.items {
            if run.satisfied() {
                break;
            }
            run.fetched += 1;

            if self.store.is_synced(&note.id).await? {
                // Skips consume no budget and trigger no delay.
                run.skipped += 1;
                debug!(note_id = %note.id, "already synced, skipping");
                continue;
            }

            if live && run.processed_any {
                self.pace().await;
            }
            run.processed_any = true;

            match self.summarize_note(note).await {
                Ok(markdown) => {
                    self.store.mark_synced(note).await?;
                    let summary = ItemSummary {
                        id: note.id.clone(),
                        title: note.title.clone(),
                        source_url: note.source_url.clone(),
                        markdown,
                        is_video: note.is_video,
                    };
                    run.new += 1;
                    run.consecutive_failures = 0;
                    run.summaries.push(summary.clone());
                    if let Some(sink) = progress {
                        sink.report(
                            run.new,
                            run.limit,
                            &format!("synced {}", note.title),
                            std::slice::from_ref(&summary),
                        );
                    }
                }
                Err(e) => {
                    warn!(note_id = %note.id, error = %e, "note sync failed");
                    run.failed += 1;
                    run.consecutive_failures += 1;
                    if run.consecutive_failures >= run.threshold {
                        let failures = run.consecutive_failures;
                        return Err(SyncError::CircuitOpen {
                            failures,
                            partial: Box::new(run.snapshot_report(true)),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Route a note through the text or video summarization path and
    /// append a "view original" link when the summary lacks one.
    async fn summarize_note(&self, note: &Note) -> anyhow::Result<String> {
        let mut markdown = if note.is_video {
            let audio = self
                .audio
                .as_ref()
                .context("no audio fetcher configured for video notes")?;
            let transcriber = self
                .transcriber
                .as_ref()
                .context("no transcriber configured for video notes")?;

            let audio_path = audio.fetch_audio(&note.source_url, None).await?;
            let transcript = transcriber.transcribe(&audio_path).await?;
            anyhow::ensure!(
                !transcript.trim().is_empty(),
                "empty transcript for video note {}",
                note.id
            );
            self.summarizer.summarize_video(note, &transcript).await?
        } else {
            self.summarizer.summarize(note).await?
        };

        if !note.source_url.is_empty() && !markdown.contains(&note.source_url) {
            markdown.push_str(&format!("\n\n[View original]({})", note.source_url));
        }
        Ok(markdown)
    }

    /// Uniform random inter-item delay. Live mode only; reduces request
    /// burstiness against an anti-abuse-sensitive platform.
    async fn pace(&self) {
        let min = self.cfg.min_request_delay_seconds;
        let max = self.cfg.max_request_delay_seconds;
        if max <= 0.0 {
            return;
        }
        let secs = if min >= max {
            min
        } else {
            rand::rng().random_range(min..=max)
        };
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
    }

    // -----------------------------------------------------------------------
    // On-demand operations
    // -----------------------------------------------------------------------

    /// Fetch and summarize one note by URL, bypassing pagination.
    pub async fn fetch_one(&self, url: &str) -> Result<ItemSummary> {
        let note = self.source.fetch_one(url).await?;
        let markdown = self
            .summarize_note(&note)
            .await
            .map_err(|e| SyncError::Upstream(format!("summarization failed: {e:#}")))?;
        self.store.mark_synced(&note).await?;
        Ok(ItemSummary {
            id: note.id,
            title: note.title,
            source_url: note.source_url,
            markdown,
            is_video: note.is_video,
        })
    }

    /// Bounded head scan reporting how many notes are not yet synced.
    /// Mutates nothing and calls no collaborator.
    pub async fn pending_count(&self) -> Result<PendingCount> {
        let mut scanned = 0;
        let mut pending = 0;
        let mut cursor = String::new();
        for page in 0..HEAD_SCAN_PAGES {
            let batch = self.source.fetch_page(&cursor).await?;
            if page == 0 && batch.items.is_empty() {
                return Err(SyncError::Upstream(
                    "zero usable items extracted from the list endpoint".to_string(),
                ));
            }
            for note in &batch.items {
                scanned += 1;
                if !self.store.is_synced(&note.id).await? {
                    pending += 1;
                }
            }
            if batch.exhausted {
                break;
            }
            cursor = batch.next_cursor;
        }
        Ok(PendingCount { scanned, pending })
    }

    /// Cooldown status for live runs, queryable without triggering one.
    pub async fn live_sync_cooldown(&self) -> Result<Cooldown> {
        let min_interval = self.cfg.min_live_sync_interval_seconds;
        let last = self.store.last_live_sync().await?;
        let (allowed, remaining) = match last {
            None => (true, 0),
            Some(at) => {
                let elapsed = (Utc::now() - at).num_seconds().max(0) as u64;
                if elapsed >= min_interval {
                    (true, 0)
                } else {
                    (false, min_interval - elapsed)
                }
            }
        };
        Ok(Cooldown {
            allowed,
            remaining_seconds: remaining,
            min_interval_seconds: min_interval,
            last_sync_at: last,
        })
    }
}

/// Mutable per-run counters.
struct RunState {
    limit: u32,
    threshold: u32,
    fetched: u32,
    new: u32,
    skipped: u32,
    failed: u32,
    consecutive_failures: u32,
    processed_any: bool,
    summaries: Vec<ItemSummary>,
    last_cursor: Option<String>,
}

impl RunState {
    fn new(limit: u32, threshold: u32) -> Self {
        Self {
            limit,
            threshold,
            fetched: 0,
            new: 0,
            skipped: 0,
            failed: 0,
            consecutive_failures: 0,
            processed_any: false,
            summaries: Vec::new(),
            last_cursor: None,
        }
    }

    fn satisfied(&self) -> bool {
        self.new >= self.limit
    }

    /// Remember the continuation point for cursor persistence.
    fn note_cursor(&mut self, batch: &PageBatch) {
        if !batch.next_cursor.is_empty() {
            self.last_cursor = Some(batch.next_cursor.clone());
        } else if !batch.cursor.is_empty() {
            self.last_cursor = Some(batch.cursor.clone());
        }
    }

    fn snapshot_report(&self, circuit_opened: bool) -> SyncReport {
        SyncReport {
            fetched: self.fetched,
            new: self.new,
            skipped: self.skipped,
            failed: self.failed,
            circuit_opened,
            summaries: self.summaries.clone(),
            last_cursor: self.last_cursor.clone(),
        }
    }

    fn into_report(self, circuit_opened: bool) -> SyncReport {
        SyncReport {
            fetched: self.fetched,
            new: self.new,
            skipped: self.skipped,
            failed: self.failed,
            circuit_opened,
            summaries: self.summaries,
            last_cursor: self.last_cursor,
        }
    }
}
