// Request drivers for the ingestion source.
//
// Two implementations behind one capability trait: plain HTTP, and a
// headless-browser rendering service for pages that block plain fetches.
// Driver selection and the auto-fallback policy live in `WebSource`,
// not here.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use browserless_client::{BrowserlessClient, BrowserlessError, RenderRequest};
use tracing::{info, warn};

use notesync_common::{Result, SyncError};

/// A fully prepared outbound request: validated URL, layered headers,
/// cursor already substituted.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub body: Option<serde_json::Value>,
}

/// Raw driver result. Status interpretation (auth expiry, rate limits,
/// blocked-fetch fallback) happens in the source.
#[derive(Debug, Clone)]
pub struct DriverResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Execute one request. Network-level failure (timeout, connect
    /// error) is an upstream error; non-2xx statuses are returned, not
    /// raised, so the caller can apply its status policy.
    async fn fetch(&self, req: &PreparedRequest) -> Result<DriverResponse>;
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Plain HTTP driver
// ---------------------------------------------------------------------------

pub struct HttpDriver {
    client: reqwest::Client,
}

impl HttpDriver {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to build HTTP client"),
        }
    }
}

#[async_trait]
impl PageDriver for HttpDriver {
    async fn fetch(&self, req: &PreparedRequest) -> Result<DriverResponse> {
        info!(url = %req.url, method = %req.method, driver = "http", "fetching page");

        let mut builder = match req.method.to_ascii_uppercase().as_str() {
            "GET" => self.client.get(&req.url),
            "POST" => self.client.post(&req.url),
            other => {
                return Err(SyncError::InvalidInput(format!(
                    "unsupported HTTP method: {other}"
                )))
            }
        };

        for (name, value) in &req.headers {
            builder = builder.header(name, value);
        }
        if let Some(ref body) = req.body {
            builder = builder.json(body);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| SyncError::Upstream(format!("request to {} failed: {e}", req.url)))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| SyncError::Upstream(format!("reading response body failed: {e}")))?;

        Ok(DriverResponse { status, body })
    }

    fn name(&self) -> &str {
        "http"
    }
}

// ---------------------------------------------------------------------------
// Headless-browser driver
// ---------------------------------------------------------------------------

/// Renders the page in a real browser and returns the settled document.
/// Navigation is always a GET; configured request bodies do not apply.
pub struct BrowserDriver {
    client: BrowserlessClient,
}

impl BrowserDriver {
    pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> Self {
        info!(base_url, "Using browser driver");
        Self {
            client: BrowserlessClient::with_timeout(base_url, token, timeout),
        }
    }
}

#[async_trait]
impl PageDriver for BrowserDriver {
    async fn fetch(&self, req: &PreparedRequest) -> Result<DriverResponse> {
        info!(url = %req.url, driver = "browser", "rendering page");

        let mut render = RenderRequest::new(&req.url);
        render.headers = req.headers.clone();

        let body = self.client.render(&render).await.map_err(|e| match e {
            BrowserlessError::Unreachable(msg) => {
                warn!(url = %req.url, error = %msg, "browser driver unreachable");
                SyncError::DependencyMissing(format!("browser driver unavailable: {msg}"))
            }
            BrowserlessError::Api { status, message } => {
                SyncError::Upstream(format!("browser render failed (status {status}): {message}"))
            }
            BrowserlessError::Network(msg) => {
                SyncError::Upstream(format!("browser render failed: {msg}"))
            }
        })?;

        Ok(DriverResponse { status: 200, body })
    }

    fn name(&self) -> &str {
        "browser"
    }
}
