use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One piece of ingested content (a "note") from the external platform.
/// Immutable once yielded by the ingestion source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Note {
    /// Platform-unique identifier.
    pub id: String,
    pub title: String,
    /// Body text. May be empty for video notes — a transcript stands in downstream.
    pub body: String,
    pub source_url: String,
    /// Ordered, deduplicated image URLs, capped per config.
    pub images: Vec<String>,
    pub is_video: bool,
}

/// One page of notes from the ingestion source. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct PageBatch {
    pub items: Vec<Note>,
    /// Cursor used to request this page. Empty for the head.
    pub cursor: String,
    /// Cursor for the next page. Empty when the source is exhausted.
    pub next_cursor: String,
    pub exhausted: bool,
}

/// Learned field mapping for a capture payload. Immutable once accepted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldInference {
    /// Dotted path to the list-of-records array, e.g. `data.notes`.
    pub items_path: String,
    pub id_field: String,
    pub title_field: String,
    pub source_url_field: String,
    /// Ordered body-text candidates; first usable one wins at extraction time.
    pub body_candidates: Vec<String>,
    /// Ordered image-field candidates.
    pub image_candidates: Vec<String>,
}

/// Markdown summary produced for one note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemSummary {
    pub id: String,
    pub title: String,
    pub source_url: String,
    pub markdown: String,
    pub is_video: bool,
}

/// Counters and summaries from one sync run.
///
/// Invariant: `new + skipped + failed == fetched` whenever the circuit
/// breaker did not open.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    pub fetched: u32,
    pub new: u32,
    pub skipped: u32,
    pub failed: u32,
    pub circuit_opened: bool,
    pub summaries: Vec<ItemSummary>,
    /// Cursor to persist for the next live run, when one was reached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cursor: Option<String>,
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Sync Run Complete ===")?;
        writeln!(f, "Fetched:  {}", self.fetched)?;
        writeln!(f, "New:      {}", self.new)?;
        writeln!(f, "Skipped:  {}", self.skipped)?;
        writeln!(f, "Failed:   {}", self.failed)?;
        if self.circuit_opened {
            writeln!(f, "Aborted:  circuit breaker opened")?;
        }
        Ok(())
    }
}

/// Result of a head-scan-only pending check. No state is mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCount {
    pub scanned: u32,
    pub pending: u32,
}

/// Live-sync cooldown status, queryable without triggering a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cooldown {
    pub allowed: bool,
    pub remaining_seconds: u64,
    pub min_interval_seconds: u64,
    pub last_sync_at: Option<DateTime<Utc>>,
}
