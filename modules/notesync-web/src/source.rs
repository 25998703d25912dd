// The web-readonly ingestion source.
//
// Turns a capture-derived HTTP contract into a typed stream of notes:
// endpoint validation, header layering, driver selection with auto
// fallback, field-path extraction, optional per-item detail enrichment,
// and cursor-linked pagination.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use notesync_common::{
    DetailFetch, DriverKind, Note, PageBatch, RequestSpec, Result, SyncError, WebSourceConfig,
};

use crate::driver::{BrowserDriver, DriverResponse, HttpDriver, PageDriver, PreparedRequest};
use crate::extract;
use crate::paths::{get_i64, get_path, get_str};

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Placeholder substituted with the pagination cursor in list requests.
const CURSOR_TOKEN: &str = "{cursor}";

pub struct WebSource {
    cfg: WebSourceConfig,
    http: Arc<dyn PageDriver>,
    browser: Option<Arc<dyn PageDriver>>,
}

impl WebSource {
    pub fn new(cfg: WebSourceConfig) -> Self {
        let timeout = Duration::from_secs(cfg.request_timeout_secs);
        Self {
            cfg,
            http: Arc::new(HttpDriver::new(timeout)),
            browser: None,
        }
    }

    /// Attach the headless-browser driver for `browser`/`auto` modes.
    pub fn with_browserless(mut self, base_url: &str, token: Option<&str>) -> Self {
        let timeout = Duration::from_secs(self.cfg.request_timeout_secs);
        self.browser = Some(Arc::new(BrowserDriver::new(base_url, token, timeout)));
        self
    }

    /// Inject drivers directly. Used by tests.
    pub fn with_drivers(
        mut self,
        http: Arc<dyn PageDriver>,
        browser: Option<Arc<dyn PageDriver>>,
    ) -> Self {
        self.http = http;
        self.browser = browser;
        self
    }

    pub fn config(&self) -> &WebSourceConfig {
        &self.cfg
    }

    // -----------------------------------------------------------------------
    // Request construction
    // -----------------------------------------------------------------------

    /// Endpoints must be HTTPS and on the explicit host allow-list.
    /// Checked before every request, list and detail both; fails closed.
    fn validate_endpoint(&self, raw: &str) -> Result<()> {
        let parsed = url::Url::parse(raw)
            .map_err(|e| SyncError::InvalidInput(format!("invalid endpoint URL {raw}: {e}")))?;
        if parsed.scheme() != "https" {
            return Err(SyncError::InvalidInput(format!(
                "endpoint must be https, got {}",
                parsed.scheme()
            )));
        }
        let host = parsed
            .host_str()
            .ok_or_else(|| SyncError::InvalidInput(format!("endpoint has no host: {raw}")))?;
        let allowed = self
            .cfg
            .allowed_hosts
            .iter()
            .any(|h| host.eq_ignore_ascii_case(h));
        if !allowed {
            return Err(SyncError::InvalidInput(format!(
                "host {host} is not in the allow-list"
            )));
        }
        Ok(())
    }

    /// Layer headers: explicit per-request headers win, fallback headers
    /// fill gaps, then the stored session cookie, then a default
    /// user-agent. Later layers never override earlier ones.
    fn layered_headers(
        &self,
        explicit: &HashMap<String, String>,
        fallback: Option<&HashMap<String, String>>,
    ) -> HashMap<String, String> {
        let mut headers = explicit.clone();
        if let Some(fallback) = fallback {
            for (name, value) in fallback {
                if !contains_header(&headers, name) {
                    headers.insert(name.clone(), value.clone());
                }
            }
        }
        if let Some(ref cookie) = self.cfg.cookie {
            if !contains_header(&headers, "cookie") {
                headers.insert("Cookie".to_string(), cookie.clone());
            }
        }
        if !contains_header(&headers, "user-agent") {
            headers.insert("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string());
        }
        headers
    }

    fn prepare_list_request(&self, cursor: &str) -> Result<PreparedRequest> {
        let spec = &self.cfg.list;
        let url = spec.url.replace(CURSOR_TOKEN, cursor);
        self.validate_endpoint(&url)?;
        Ok(PreparedRequest {
            url,
            method: spec.method.clone(),
            headers: self.layered_headers(&spec.headers, None),
            body: spec.body.as_ref().map(|b| substitute_cursor(b, cursor)),
        })
    }

    fn prepare_detail_request(&self, spec: &RequestSpec, note_id: &str, record: &Value) -> Result<PreparedRequest> {
        let url = extract::substitute_template(&spec.url, note_id, record);
        self.validate_endpoint(&url)?;
        Ok(PreparedRequest {
            url,
            method: spec.method.clone(),
            // List headers are the fallback layer for detail requests.
            headers: self.layered_headers(&spec.headers, Some(&self.cfg.list.headers)),
            body: spec.body.clone(),
        })
    }

    // -----------------------------------------------------------------------
    // Dispatch and status policy
    // -----------------------------------------------------------------------

    /// Run a request through the selected driver. In `auto` mode an HTTP
    /// 406 (the platform's plain-fetch block) transparently retries the
    /// same page through the browser driver; non-auto modes never fall
    /// back.
    async fn dispatch(&self, req: &PreparedRequest) -> Result<DriverResponse> {
        match self.cfg.driver {
            DriverKind::Http => {
                let resp = self.http.fetch(req).await?;
                self.interpret_status(&resp)?;
                Ok(resp)
            }
            DriverKind::Browser => {
                let browser = self.browser.as_ref().ok_or_else(|| {
                    SyncError::DependencyMissing("browser driver is not configured".to_string())
                })?;
                let resp = browser.fetch(req).await?;
                self.interpret_status(&resp)?;
                Ok(resp)
            }
            DriverKind::Auto => {
                let resp = self.http.fetch(req).await?;
                if resp.status == 406 {
                    info!(url = %req.url, "plain fetch blocked (406), retrying via browser driver");
                    let browser = self.browser.as_ref().ok_or_else(|| {
                        SyncError::DependencyMissing(
                            "server blocks plain HTTP and no browser driver is configured"
                                .to_string(),
                        )
                    })?;
                    let resp = browser.fetch(req).await?;
                    self.interpret_status(&resp)?;
                    return Ok(resp);
                }
                self.interpret_status(&resp)?;
                Ok(resp)
            }
        }
    }

    fn interpret_status(&self, resp: &DriverResponse) -> Result<()> {
        match resp.status {
            200..=299 => Ok(()),
            401 | 403 => Err(SyncError::AuthExpired(format!(
                "upstream returned {}",
                resp.status
            ))),
            429 => Err(SyncError::RateLimited {
                message: "upstream returned 429".to_string(),
                retry_after_secs: None,
            }),
            other => Err(SyncError::Upstream(format!(
                "unexpected upstream status {other}"
            ))),
        }
    }

    /// The platform wraps payloads in a business envelope; certain codes
    /// mean the session cookie has expired even on HTTP 200.
    fn check_business_code(&self, payload: &Value) -> Result<()> {
        if let Some(code) = get_i64(payload, &self.cfg.status_code_path) {
            if self.cfg.session_expired_codes.contains(&code) {
                return Err(SyncError::AuthExpired(format!(
                    "platform status code {code} indicates an expired session"
                )));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Page fetch
    // -----------------------------------------------------------------------

    /// Fetch and map one list page for the given cursor (empty = head).
    pub async fn fetch_list_page(&self, cursor: &str) -> Result<PageBatch> {
        let req = self.prepare_list_request(cursor)?;
        let resp = self.dispatch(&req).await?;
        let payload = parse_payload(&resp.body)?;
        self.check_business_code(&payload)?;

        let next_cursor = get_str(&payload, &self.cfg.cursor_path).unwrap_or_default();
        let has_more = match self.cfg.has_more_path {
            Some(ref path) => get_path(&payload, path)
                .and_then(Value::as_bool)
                .unwrap_or(!next_cursor.is_empty()),
            None => !next_cursor.is_empty(),
        };

        let records: Vec<Value> = match get_path(&payload, &self.cfg.items_path) {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };

        let mut items = Vec::new();
        for record in &records {
            let Some(mut note) = extract::map_record(&self.cfg, record) else {
                debug!("dropping record without usable id");
                continue;
            };
            if self.wants_detail(&note) {
                if let Err(e) = self.enrich_from_detail(&mut note, record).await {
                    warn!(note_id = %note.id, error = %e, "detail fetch failed, keeping list data");
                }
            }
            // Video notes survive an empty body: a transcript stands in
            // downstream. Text notes without a body are unusable.
            if note.body.is_empty() && !note.is_video {
                debug!(note_id = %note.id, "dropping non-video note with no usable body");
                continue;
            }
            items.push(note);
        }

        info!(
            cursor,
            fetched = records.len(),
            usable = items.len(),
            has_more,
            "list page fetched"
        );

        Ok(PageBatch {
            items,
            cursor: cursor.to_string(),
            next_cursor: next_cursor.clone(),
            exhausted: !has_more || next_cursor.is_empty(),
        })
    }

    /// Cursor-linked stream of pages. Pull-based: dropping the stream
    /// cancels any in-flight request, so an early-stopping consumer
    /// never leaks a half-finished fetch.
    pub fn pages(&self, cursor: Option<String>, max_pages: Option<u32>) -> PageStream<'_> {
        PageStream {
            source: self,
            cursor: cursor.unwrap_or_default(),
            max_pages,
            pages_fetched: 0,
            yielded_items: 0,
            done: false,
        }
    }

    // -----------------------------------------------------------------------
    // Detail enrichment
    // -----------------------------------------------------------------------

    fn wants_detail(&self, note: &Note) -> bool {
        if self.cfg.detail.is_none() {
            return false;
        }
        match self.cfg.detail_fetch {
            DetailFetch::Never => false,
            DetailFetch::Always => true,
            DetailFetch::Auto => note.body.is_empty() || note.images.is_empty(),
        }
    }

    async fn enrich_from_detail(&self, note: &mut Note, record: &Value) -> Result<()> {
        let spec = self
            .cfg
            .detail
            .as_ref()
            .ok_or_else(|| SyncError::InvalidInput("no detail request configured".to_string()))?;

        let req = self.prepare_detail_request(spec, &note.id, record)?;
        let resp = self.dispatch(&req).await?;
        let payload = parse_payload(&resp.body)?;
        self.check_business_code(&payload)?;

        let detail_record = match self.cfg.detail_item_path {
            Some(ref path) => get_path(&payload, path).unwrap_or(&payload),
            None => &payload,
        };

        let detail_body = extract::body_from_candidates(
            detail_record,
            &self.cfg.detail_body_candidates,
            &note.title,
        );
        if !detail_body.is_empty() {
            note.body = detail_body;
        }

        let detail_images = extract::images_from_record(
            &self.cfg,
            detail_record,
            &self.cfg.detail_image_candidates,
        );
        note.images = extract::merge_images(
            detail_images,
            std::mem::take(&mut note.images),
            self.cfg.max_images,
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Single-item fetch
    // -----------------------------------------------------------------------

    /// Fetch one note directly by its URL, bypassing pagination. Used for
    /// "summarize one link" requests.
    pub async fn fetch_one(&self, item_url: &str) -> Result<Note> {
        self.validate_endpoint(item_url)?;

        let fallback = self
            .cfg
            .detail
            .as_ref()
            .map(|d| &d.headers)
            .unwrap_or(&self.cfg.list.headers);
        let req = PreparedRequest {
            url: item_url.to_string(),
            method: "GET".to_string(),
            headers: self.layered_headers(fallback, Some(&self.cfg.list.headers)),
            body: None,
        };

        let resp = self.dispatch(&req).await?;
        let payload = parse_payload(&resp.body)?;
        self.check_business_code(&payload)?;

        let record = match self.cfg.detail_item_path {
            Some(ref path) => get_path(&payload, path).unwrap_or(&payload),
            None => &payload,
        };

        let id = get_str(record, &self.cfg.id_field)
            .or_else(|| id_from_url(item_url))
            .ok_or_else(|| {
                SyncError::Upstream(format!("no item identifier found for {item_url}"))
            })?;

        let title = get_str(record, &self.cfg.title_field).unwrap_or_default();
        let body_candidates = if self.cfg.detail_body_candidates.is_empty() {
            &self.cfg.body_candidates
        } else {
            &self.cfg.detail_body_candidates
        };
        let image_candidates = if self.cfg.detail_image_candidates.is_empty() {
            &self.cfg.image_candidates
        } else {
            &self.cfg.detail_image_candidates
        };

        let body = extract::body_from_candidates(record, body_candidates, &title);
        let images = extract::images_from_record(&self.cfg, record, image_candidates);
        let is_video = extract::is_video(&self.cfg, record);

        if body.is_empty() && !is_video {
            return Err(SyncError::Upstream(format!(
                "no usable body extracted from {item_url}"
            )));
        }

        Ok(Note {
            id,
            title,
            body,
            source_url: item_url.to_string(),
            images,
            is_video,
        })
    }
}

/// Pull-based page iterator over a `WebSource`.
pub struct PageStream<'a> {
    source: &'a WebSource,
    cursor: String,
    max_pages: Option<u32>,
    pages_fetched: u32,
    yielded_items: usize,
    done: bool,
}

impl PageStream<'_> {
    /// Fetch the next page, or `None` when the stream is finished.
    ///
    /// A page that yields zero usable items before anything else has been
    /// yielded is an upstream error — the schema no longer matches, or
    /// the platform returned an empty shell.
    pub async fn next(&mut self) -> Option<Result<PageBatch>> {
        if self.done {
            return None;
        }
        if let Some(max) = self.max_pages {
            if self.pages_fetched >= max {
                self.done = true;
                return None;
            }
        }

        let batch = match self.source.fetch_list_page(&self.cursor).await {
            Ok(batch) => batch,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        self.pages_fetched += 1;

        if batch.items.is_empty() && self.yielded_items == 0 {
            self.done = true;
            return Some(Err(SyncError::Upstream(
                "zero usable items extracted from the list endpoint".to_string(),
            )));
        }

        self.yielded_items += batch.items.len();
        self.cursor = batch.next_cursor.clone();
        if batch.exhausted {
            self.done = true;
        }
        Some(Ok(batch))
    }
}

/// Parse a driver response body as JSON. The browser driver returns the
/// settled document, which for API URLs is raw JSON wrapped in HTML —
/// fall back to the outermost brace span.
pub fn parse_payload(body: &str) -> Result<Value> {
    if let Ok(value) = serde_json::from_str(body) {
        return Ok(value);
    }
    if let (Some(start), Some(end)) = (body.find('{'), body.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&body[start..=end]) {
                return Ok(value);
            }
        }
    }
    Err(SyncError::Upstream(
        "response body is not JSON".to_string(),
    ))
}

fn substitute_cursor(body: &Value, cursor: &str) -> Value {
    match body {
        Value::String(s) => Value::String(s.replace(CURSOR_TOKEN, cursor)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| substitute_cursor(v, cursor)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_cursor(v, cursor)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn contains_header(headers: &HashMap<String, String>, name: &str) -> bool {
    headers.keys().any(|k| k.eq_ignore_ascii_case(name))
}

/// Last path segment of an item URL, as an identifier fallback.
fn id_from_url(item_url: &str) -> Option<String> {
    let parsed = url::Url::parse(item_url).ok()?;
    parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .next_back()
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source() -> WebSource {
        let mut cfg = WebSourceConfig {
            allowed_hosts: vec!["api.example.com".to_string()],
            cookie: Some("session=abc".to_string()),
            ..WebSourceConfig::default()
        };
        cfg.list.url = "https://api.example.com/notes?cursor={cursor}".to_string();
        WebSource::new(cfg)
    }

    #[test]
    fn rejects_non_https_and_unlisted_hosts() {
        let s = source();
        assert!(matches!(
            s.validate_endpoint("http://api.example.com/notes"),
            Err(SyncError::InvalidInput(_))
        ));
        assert!(matches!(
            s.validate_endpoint("https://evil.example.com/notes"),
            Err(SyncError::InvalidInput(_))
        ));
        assert!(s.validate_endpoint("https://api.example.com/notes").is_ok());
    }

    #[test]
    fn headers_layer_without_overriding() {
        let s = source();
        let mut explicit = HashMap::new();
        explicit.insert("User-Agent".to_string(), "custom-agent".to_string());
        let mut fallback = HashMap::new();
        fallback.insert("user-agent".to_string(), "fallback-agent".to_string());
        fallback.insert("X-Extra".to_string(), "1".to_string());

        let headers = s.layered_headers(&explicit, Some(&fallback));
        assert_eq!(headers.get("User-Agent").map(String::as_str), Some("custom-agent"));
        assert_eq!(headers.get("X-Extra").map(String::as_str), Some("1"));
        assert_eq!(headers.get("Cookie").map(String::as_str), Some("session=abc"));
    }

    #[test]
    fn default_user_agent_fills_gap() {
        let s = source();
        let headers = s.layered_headers(&HashMap::new(), None);
        assert_eq!(
            headers.get("User-Agent").map(String::as_str),
            Some(DEFAULT_USER_AGENT)
        );
    }

    #[test]
    fn cursor_substitution_in_url_and_body() {
        let s = source();
        let req = s.prepare_list_request("abc123").unwrap();
        assert_eq!(req.url, "https://api.example.com/notes?cursor=abc123");

        let body = json!({"cursor": "{cursor}", "num": 30});
        let substituted = substitute_cursor(&body, "xyz");
        assert_eq!(substituted["cursor"], "xyz");
        assert_eq!(substituted["num"], 30);
    }

    #[test]
    fn business_code_expiry_detected() {
        let s = source();
        assert!(matches!(
            s.check_business_code(&json!({"code": -100})),
            Err(SyncError::AuthExpired(_))
        ));
        assert!(s.check_business_code(&json!({"code": 0})).is_ok());
        assert!(s.check_business_code(&json!({"success": true})).is_ok());
    }

    #[test]
    fn status_mapping() {
        let s = source();
        let resp = |status| DriverResponse { status, body: String::new() };
        assert!(s.interpret_status(&resp(200)).is_ok());
        assert!(matches!(
            s.interpret_status(&resp(401)),
            Err(SyncError::AuthExpired(_))
        ));
        assert!(matches!(
            s.interpret_status(&resp(403)),
            Err(SyncError::AuthExpired(_))
        ));
        assert!(matches!(
            s.interpret_status(&resp(429)),
            Err(SyncError::RateLimited { .. })
        ));
        assert!(matches!(
            s.interpret_status(&resp(500)),
            Err(SyncError::Upstream(_))
        ));
    }

    #[test]
    fn payload_parse_unwraps_browser_html() {
        let wrapped = "<html><body><pre>{\"code\":0,\"data\":{}}</pre></body></html>";
        let value = parse_payload(wrapped).unwrap();
        assert_eq!(value["code"], 0);

        assert!(parse_payload("<html>no json here</html>").is_err());
    }

    #[test]
    fn id_fallback_from_url() {
        assert_eq!(
            id_from_url("https://p.example/discovery/item/65ab3f").as_deref(),
            Some("65ab3f")
        );
    }

    // -----------------------------------------------------------------------
    // Page stream
    // -----------------------------------------------------------------------

    /// Driver serving canned bodies by URL and recording every fetch.
    struct ScriptedDriver {
        bodies: HashMap<String, String>,
        calls: std::sync::Mutex<Vec<String>>,
    }

    impl ScriptedDriver {
        fn new() -> Self {
            Self {
                bodies: HashMap::new(),
                calls: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn body(mut self, url: &str, body: serde_json::Value) -> Self {
            self.bodies.insert(url.to_string(), body.to_string());
            self
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl crate::driver::PageDriver for ScriptedDriver {
        async fn fetch(&self, req: &crate::driver::PreparedRequest) -> Result<DriverResponse> {
            self.calls.lock().unwrap().push(req.url.clone());
            let body = self
                .bodies
                .get(&req.url)
                .cloned()
                .unwrap_or_else(|| json!({"code": 0, "data": {"notes": [], "cursor": ""}}).to_string());
            Ok(DriverResponse { status: 200, body })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn paged_source(driver: Arc<ScriptedDriver>) -> WebSource {
        let mut cfg = WebSourceConfig {
            allowed_hosts: vec!["api.example.com".to_string()],
            items_path: "data.notes".to_string(),
            id_field: "id".to_string(),
            title_field: "title".to_string(),
            body_candidates: vec!["desc".to_string()],
            ..WebSourceConfig::default()
        };
        cfg.list.url = "https://api.example.com/notes?cursor={cursor}".to_string();
        cfg.driver = DriverKind::Http;
        WebSource::new(cfg).with_drivers(driver, None)
    }

    fn page_body(ids: &[&str], next: &str) -> serde_json::Value {
        let notes: Vec<_> = ids
            .iter()
            .map(|id| json!({"id": id, "title": format!("t-{id}"), "desc": format!("b-{id}")}))
            .collect();
        json!({"code": 0, "data": {"notes": notes, "cursor": next}})
    }

    #[tokio::test]
    async fn stream_pulls_pages_until_exhausted() {
        let driver = Arc::new(
            ScriptedDriver::new()
                .body("https://api.example.com/notes?cursor=", page_body(&["n1"], "c2"))
                .body("https://api.example.com/notes?cursor=c2", page_body(&["n2"], "")),
        );
        let source = paged_source(driver);

        let mut stream = source.pages(None, None);
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.items[0].id, "n1");
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.items[0].id, "n2");
        assert!(second.exhausted);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn stream_stops_at_max_pages_without_extra_fetches() {
        let driver = Arc::new(
            ScriptedDriver::new()
                .body("https://api.example.com/notes?cursor=", page_body(&["n1"], "c2"))
                .body("https://api.example.com/notes?cursor=c2", page_body(&["n2"], "c3")),
        );
        let source = paged_source(Arc::clone(&driver));

        let mut stream = source.pages(None, Some(1));
        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.is_none());
        assert_eq!(driver.calls(), 1);
    }

    #[tokio::test]
    async fn stream_fails_on_empty_first_page() {
        let driver = Arc::new(
            ScriptedDriver::new()
                .body("https://api.example.com/notes?cursor=", page_body(&[], "")),
        );
        let source = paged_source(driver);

        let mut stream = source.pages(None, None);
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, SyncError::Upstream(_)));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn later_empty_page_is_exhaustion_not_error() {
        let driver = Arc::new(
            ScriptedDriver::new()
                .body("https://api.example.com/notes?cursor=", page_body(&["n1"], "c2"))
                .body("https://api.example.com/notes?cursor=c2", page_body(&[], "")),
        );
        let source = paged_source(driver);

        let mut stream = source.pages(None, None);
        assert!(stream.next().await.unwrap().is_ok());
        let last = stream.next().await.unwrap().unwrap();
        assert!(last.items.is_empty());
        assert!(last.exhausted);
        assert!(stream.next().await.is_none());
    }
}
