use thiserror::Error;

use crate::types::SyncReport;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Error taxonomy for the sync core.
///
/// Per-item failures are counted, not raised; everything here is a
/// run-level (or request-level) condition that reaches the caller.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Bad configuration or caller arguments. Always synchronous, never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Session cookie or credential no longer valid. Caller must re-authenticate.
    #[error("session expired: {0}")]
    AuthExpired(String),

    /// Upstream 429 or internal cooldown. Caller may retry after the wait.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },

    /// Too many consecutive per-item failures. Carries everything gathered
    /// before the abort so partial progress is not lost.
    #[error("circuit open after {failures} consecutive failures")]
    CircuitOpen {
        failures: u32,
        partial: Box<SyncReport>,
    },

    /// Network/parse/schema failure from the external platform.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// A required external capability (e.g. the browser driver) is unavailable.
    #[error("missing dependency: {0}")]
    DependencyMissing(String),

    /// Referenced entity (e.g. a job ID) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    /// Stable machine-readable code, used in job failure payloads.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::InvalidInput(_) => "invalid_input",
            SyncError::AuthExpired(_) => "auth_expired",
            SyncError::RateLimited { .. } => "rate_limited",
            SyncError::CircuitOpen { .. } => "circuit_open",
            SyncError::Upstream(_) => "upstream_error",
            SyncError::DependencyMissing(_) => "dependency_missing",
            SyncError::NotFound(_) => "not_found",
            SyncError::Other(_) => "internal_error",
        }
    }
}
