pub mod error;

pub use error::{BrowserlessError, Result};

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

/// One page-render request. The target platform gates content behind a
/// session cookie, so request headers must reach the rendering browser.
#[derive(Debug, Clone, Default)]
pub struct RenderRequest {
    pub url: String,
    /// Forwarded to the rendered navigation request verbatim.
    pub headers: HashMap<String, String>,
    /// Wait for network idle before dumping the DOM.
    pub wait_for_idle: bool,
}

impl RenderRequest {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            headers: HashMap::new(),
            wait_for_idle: true,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }
}

pub struct BrowserlessClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BrowserlessClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        Self::with_timeout(base_url, token, Duration::from_secs(30))
    }

    pub fn with_timeout(base_url: &str, token: Option<&str>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        }
    }

    /// Render a page in the headless browser and return the final document
    /// body via the Browserless /content endpoint. The result is whatever
    /// the page settled on — HTML, or raw JSON for API-style URLs.
    pub async fn render(&self, req: &RenderRequest) -> Result<String> {
        let mut endpoint = format!("{}/content", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }

        let mut body = serde_json::json!({ "url": req.url });
        if !req.headers.is_empty() {
            body["setExtraHTTPHeaders"] = serde_json::json!(req.headers);
        }
        if req.wait_for_idle {
            body["gotoOptions"] = serde_json::json!({ "waitUntil": "networkidle2" });
        }

        debug!(url = %req.url, "rendering page via browserless");

        let resp = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrowserlessError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.text().await?)
    }
}
