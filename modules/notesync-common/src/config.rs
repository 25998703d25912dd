use std::collections::HashMap;
use std::env;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, SyncError};
use crate::types::FieldInference;

/// One configured HTTP request, bootstrapped from a HAR/cURL capture.
/// `{cursor}` in the URL or in any string inside `body` is replaced with
/// the pagination cursor; an empty cursor requests the head.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSpec {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

impl Default for RequestSpec {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: default_method(),
            headers: HashMap::new(),
            body: None,
        }
    }
}

fn default_method() -> String {
    "GET".to_string()
}

/// Request driver selection. `Auto` tries plain HTTP first and falls back
/// to the browser driver when the server blocks plain fetches (HTTP 406).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Http,
    Browser,
    #[default]
    Auto,
}

/// When to issue the secondary per-item detail request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailFetch {
    /// Only when the list-derived item is missing body text or images.
    #[default]
    Auto,
    Always,
    Never,
}

/// Static fixtures vs. the real platform. Pacing and cursor persistence
/// only apply to `Live`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    #[default]
    Mock,
    Live,
}

/// Configuration for the web-readonly ingestion source.
///
/// Field paths are data, not compiled accessors — the schema is learned
/// from captures, not declared. Explicit values here take precedence over
/// inferred defaults (see [`WebSourceConfig::apply_inference`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSourceConfig {
    pub list: RequestSpec,
    #[serde(default)]
    pub detail: Option<RequestSpec>,

    /// Hosts requests may be sent to. Checked before every request,
    /// list and detail both. Empty list fails closed.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,

    #[serde(default)]
    pub items_path: String,
    #[serde(default)]
    pub id_field: String,
    #[serde(default)]
    pub title_field: String,
    #[serde(default)]
    pub source_url_field: String,
    #[serde(default)]
    pub body_candidates: Vec<String>,
    #[serde(default)]
    pub image_candidates: Vec<String>,

    /// Path to the single record in a detail response. Root when absent.
    #[serde(default)]
    pub detail_item_path: Option<String>,
    #[serde(default)]
    pub detail_body_candidates: Vec<String>,
    #[serde(default)]
    pub detail_image_candidates: Vec<String>,
    #[serde(default)]
    pub detail_fetch: DetailFetch,

    /// Dotted path to the cursor for the next page in a list response.
    #[serde(default = "default_cursor_path")]
    pub cursor_path: String,
    /// Dotted path to the has-more flag in a list response, when present.
    #[serde(default)]
    pub has_more_path: Option<String>,

    #[serde(default)]
    pub driver: DriverKind,
    /// Session cookie captured from the browser. Fills the `Cookie` header
    /// gap; never overrides an explicitly configured one.
    #[serde(default)]
    pub cookie: Option<String>,

    /// Known media CDN hosts; any absolute URL on one of these counts as
    /// an image regardless of extension.
    #[serde(default)]
    pub media_hosts: Vec<String>,

    /// Field whose value marks a note as video (e.g. `type`).
    #[serde(default)]
    pub video_type_field: Option<String>,
    #[serde(default = "default_video_type_values")]
    pub video_type_values: Vec<String>,

    #[serde(default = "default_max_images")]
    pub max_images: usize,

    /// Dotted path to the platform's business status code in a response
    /// envelope, and the values that mean the session has expired.
    #[serde(default = "default_status_code_path")]
    pub status_code_path: String,
    #[serde(default = "default_session_expired_codes")]
    pub session_expired_codes: Vec<i64>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

// Matches the serde field defaults, so a config deserialized from `{}`
// and `WebSourceConfig::default()` agree.
impl Default for WebSourceConfig {
    fn default() -> Self {
        Self {
            list: RequestSpec::default(),
            detail: None,
            allowed_hosts: Vec::new(),
            items_path: String::new(),
            id_field: String::new(),
            title_field: String::new(),
            source_url_field: String::new(),
            body_candidates: Vec::new(),
            image_candidates: Vec::new(),
            detail_item_path: None,
            detail_body_candidates: Vec::new(),
            detail_image_candidates: Vec::new(),
            detail_fetch: DetailFetch::default(),
            cursor_path: default_cursor_path(),
            has_more_path: None,
            driver: DriverKind::default(),
            cookie: None,
            media_hosts: Vec::new(),
            video_type_field: None,
            video_type_values: default_video_type_values(),
            max_images: default_max_images(),
            status_code_path: default_status_code_path(),
            session_expired_codes: default_session_expired_codes(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_cursor_path() -> String {
    "data.cursor".to_string()
}

fn default_video_type_values() -> Vec<String> {
    vec!["video".to_string()]
}

fn default_max_images() -> usize {
    9
}

fn default_status_code_path() -> String {
    "code".to_string()
}

fn default_session_expired_codes() -> Vec<i64> {
    vec![-100, -101]
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl WebSourceConfig {
    /// Fill unset field paths from an inference result. Explicit
    /// configuration always wins; inference only fills gaps.
    pub fn apply_inference(&mut self, inferred: &FieldInference) {
        if self.items_path.is_empty() {
            self.items_path = inferred.items_path.clone();
        }
        if self.id_field.is_empty() {
            self.id_field = inferred.id_field.clone();
        }
        if self.title_field.is_empty() {
            self.title_field = inferred.title_field.clone();
        }
        if self.source_url_field.is_empty() {
            self.source_url_field = inferred.source_url_field.clone();
        }
        if self.body_candidates.is_empty() {
            self.body_candidates = inferred.body_candidates.clone();
        }
        if self.image_candidates.is_empty() {
            self.image_candidates = inferred.image_candidates.clone();
        }
    }

    /// Fingerprint over the parts of configuration that affect pagination
    /// semantics. A stored cursor is only trusted for resume while this
    /// value is unchanged.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.list.url.as_bytes());
        hasher.update(self.list.method.as_bytes());
        hasher.update(self.items_path.as_bytes());
        hasher.update(self.id_field.as_bytes());
        hasher.update(self.title_field.as_bytes());
        hasher.update(self.source_url_field.as_bytes());
        hasher.update(self.cursor_path.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Orchestrator-level knobs for one sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub mode: SourceMode,

    /// Minimum seconds between successful live syncs.
    #[serde(default = "default_min_live_interval")]
    pub min_live_sync_interval_seconds: u64,

    /// Consecutive per-item failures that abort the run.
    #[serde(default = "default_circuit_threshold")]
    pub circuit_breaker_threshold: u32,

    /// Uniform random inter-item delay bounds, seconds. Live mode only.
    #[serde(default = "default_min_delay")]
    pub min_request_delay_seconds: f64,
    #[serde(default = "default_max_delay")]
    pub max_request_delay_seconds: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mode: SourceMode::Mock,
            min_live_sync_interval_seconds: default_min_live_interval(),
            circuit_breaker_threshold: default_circuit_threshold(),
            min_request_delay_seconds: default_min_delay(),
            max_request_delay_seconds: default_max_delay(),
        }
    }
}

fn default_min_live_interval() -> u64 {
    300
}

fn default_circuit_threshold() -> u32 {
    3
}

fn default_min_delay() -> f64 {
    2.0
}

fn default_max_delay() -> f64 {
    5.0
}

impl SyncConfig {
    /// Misconfigured delay bounds are a synchronous input-validation
    /// error, not a runtime failure.
    pub fn validate(&self) -> Result<()> {
        if self.min_request_delay_seconds < 0.0 || self.max_request_delay_seconds < 0.0 {
            return Err(SyncError::InvalidInput(
                "request delay bounds must be >= 0".to_string(),
            ));
        }
        if self.min_request_delay_seconds > self.max_request_delay_seconds {
            return Err(SyncError::InvalidInput(format!(
                "min request delay {} exceeds max {}",
                self.min_request_delay_seconds, self.max_request_delay_seconds
            )));
        }
        Ok(())
    }
}

/// Process-level configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Browserless-style rendering service, used by the browser driver.
    pub browserless_url: String,
    pub browserless_token: Option<String>,

    /// Path for the persisted dedup/cursor table. In-memory when unset.
    pub store_path: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            browserless_url: required_env("BROWSERLESS_URL"),
            browserless_token: env::var("BROWSERLESS_TOKEN").ok(),
            store_path: env::var("NOTESYNC_STORE_PATH").ok(),
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
