// Record → Note mapping and the best-effort extraction heuristics.
//
// The platform's response shape is not controlled by this system; every
// chain here is ordered candidates, first success wins, malformed
// candidates dropped silently.

use serde_json::Value;
use tracing::debug;

use notesync_common::{Note, WebSourceConfig};

use crate::paths::{find_key_path, get_path, get_str};

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp", ".gif", ".heic"];

/// Key-path fragments that suggest an image-bearing field.
const IMAGE_HINTS: &[&str] = &["image", "img", "pic", "photo", "cover"];

/// Depth for template-token lookup inside a record.
const TOKEN_SEARCH_DEPTH: usize = 5;

/// Map one list-page record to a `Note`. Returns `None` when the record
/// has no usable identifier. Body may still be empty here; the detail
/// stage and the video rule decide whether the note survives.
pub fn map_record(cfg: &WebSourceConfig, record: &Value) -> Option<Note> {
    let id = get_str(record, &cfg.id_field)?;
    if id.trim().is_empty() {
        return None;
    }

    let title = get_str(record, &cfg.title_field).unwrap_or_default();
    let source_url = get_str(record, &cfg.source_url_field).unwrap_or_default();
    let body = body_from_candidates(record, &cfg.body_candidates, &title);
    let images = images_from_record(cfg, record, &cfg.image_candidates);

    Some(Note {
        id,
        title,
        body,
        source_url,
        images,
        is_video: is_video(cfg, record),
    })
}

/// Try each candidate field in order; first non-empty value wins. A value
/// that equals the trimmed title verbatim is rejected — the platform
/// repeats titles into description slots, and a repeated title is not a
/// body.
pub fn body_from_candidates(record: &Value, candidates: &[String], title: &str) -> String {
    let title = title.trim();
    for path in candidates {
        let Some(value) = get_str(record, path) else {
            continue;
        };
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed == title {
            continue;
        }
        return trimmed.to_string();
    }
    String::new()
}

/// Discover image URLs by walking the configured candidate fields; when
/// none of them yields anything, fall back to walking the whole record.
pub fn images_from_record(
    cfg: &WebSourceConfig,
    record: &Value,
    candidates: &[String],
) -> Vec<String> {
    let mut found = Vec::new();
    for path in candidates {
        if let Some(value) = get_path(record, path) {
            collect_image_urls(cfg, value, path, &mut found);
        }
    }
    if found.is_empty() {
        collect_image_urls(cfg, record, "", &mut found);
    }

    dedup_capped(found, cfg.max_images)
}

/// Prefer detail-stage images, merge in list-derived ones, dedup, cap.
pub fn merge_images(detail: Vec<String>, list: Vec<String>, cap: usize) -> Vec<String> {
    let mut merged = detail;
    merged.extend(list);
    dedup_capped(merged, cap)
}

fn dedup_capped(urls: Vec<String>, cap: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for url in urls {
        if seen.insert(url.clone()) {
            out.push(url);
            if out.len() >= cap {
                break;
            }
        }
    }
    out
}

fn collect_image_urls(cfg: &WebSourceConfig, value: &Value, key_path: &str, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            if is_image_url(s, key_path, &cfg.media_hosts) {
                out.push(s.clone());
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_image_urls(cfg, item, key_path, out);
            }
        }
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = if key_path.is_empty() {
                    key.clone()
                } else {
                    format!("{key_path}.{key}")
                };
                collect_image_urls(cfg, child, &child_path, out);
            }
        }
        _ => {}
    }
}

/// A string counts as an image URL when it is absolute http(s) AND has a
/// known image extension, OR is served from a known media CDN host, OR
/// its key path carries an image-ish hint. Anything under an
/// avatar-flavored key is excluded outright.
fn is_image_url(candidate: &str, key_path: &str, media_hosts: &[String]) -> bool {
    let key_lower = key_path.to_ascii_lowercase();
    if key_lower.contains("avatar") {
        return false;
    }

    let Ok(parsed) = url::Url::parse(candidate) else {
        return false;
    };
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return false;
    }

    let path_lower = parsed.path().to_ascii_lowercase();
    if IMAGE_EXTENSIONS.iter().any(|ext| path_lower.ends_with(ext)) {
        return true;
    }

    if let Some(host) = parsed.host_str() {
        if media_hosts.iter().any(|h| host.eq_ignore_ascii_case(h)) {
            return true;
        }
    }

    IMAGE_HINTS.iter().any(|hint| key_lower.contains(hint))
}

/// Video detection from the configured type field.
pub fn is_video(cfg: &WebSourceConfig, record: &Value) -> bool {
    let Some(ref field) = cfg.video_type_field else {
        return false;
    };
    let Some(value) = get_str(record, field) else {
        return false;
    };
    cfg.video_type_values
        .iter()
        .any(|v| v.eq_ignore_ascii_case(value.trim()))
}

/// Substitute `{id}` and `{token}` placeholders in a detail-URL template.
/// Unknown tokens resolve against the record by key search; tokens that
/// resolve nowhere are left in place and surface as a request error.
pub fn substitute_template(template: &str, id: &str, record: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let token = &after[..end];
        if token == "id" {
            out.push_str(id);
        } else if let Some(value) = lookup_token(record, token) {
            out.push_str(&value);
        } else {
            debug!(token, "unresolved detail-URL token");
            out.push('{');
            out.push_str(token);
            out.push('}');
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

fn lookup_token(record: &Value, token: &str) -> Option<String> {
    let path = find_key_path(record, token, TOKEN_SEARCH_DEPTH)?;
    get_str(record, &path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cfg() -> WebSourceConfig {
        let mut cfg = WebSourceConfig {
            id_field: "note_id".to_string(),
            title_field: "title".to_string(),
            source_url_field: "url".to_string(),
            body_candidates: vec!["desc".to_string(), "content".to_string()],
            image_candidates: vec!["images".to_string()],
            media_hosts: vec!["cdn.example.net".to_string()],
            video_type_field: Some("type".to_string()),
            ..WebSourceConfig::default()
        };
        cfg.max_images = 3;
        cfg
    }

    #[test]
    fn maps_a_plain_record() {
        let record = json!({
            "note_id": "n1",
            "title": "Hello",
            "desc": "a body",
            "url": "https://p.example/n1",
            "type": "normal"
        });
        let note = map_record(&cfg(), &record).expect("record should map");
        assert_eq!(note.id, "n1");
        assert_eq!(note.body, "a body");
        assert!(!note.is_video);
    }

    #[test]
    fn record_without_id_is_dropped() {
        let record = json!({"title": "Hello", "desc": "body"});
        assert!(map_record(&cfg(), &record).is_none());
    }

    #[test]
    fn body_equal_to_title_is_rejected() {
        let record = json!({
            "note_id": "n1",
            "title": "Same Text",
            "desc": "  Same Text  ",
            "content": "real body"
        });
        let note = map_record(&cfg(), &record).unwrap();
        assert_eq!(note.body, "real body");
    }

    #[test]
    fn all_candidates_rejected_leaves_body_empty() {
        let record = json!({"note_id": "n1", "title": "T", "desc": "T"});
        let note = map_record(&cfg(), &record).unwrap();
        assert!(note.body.is_empty());
    }

    #[test]
    fn image_classification() {
        let c = cfg();
        // Extension match
        assert!(is_image_url("https://x.example/a.jpg", "", &c.media_hosts));
        // Media CDN host, no extension
        assert!(is_image_url(
            "https://cdn.example.net/abc123",
            "",
            &c.media_hosts
        ));
        // Key hint
        assert!(is_image_url(
            "https://x.example/asset",
            "cover.url_default",
            &c.media_hosts
        ));
        // Avatar exclusion beats everything
        assert!(!is_image_url(
            "https://x.example/a.jpg",
            "user.avatar",
            &c.media_hosts
        ));
        // Relative URLs never qualify
        assert!(!is_image_url("/a.jpg", "images", &c.media_hosts));
    }

    #[test]
    fn images_walk_candidates_then_whole_record() {
        let c = cfg();
        let record = json!({
            "note_id": "n1",
            "images": [
                {"url": "https://cdn.example.net/1"},
                {"url": "https://cdn.example.net/2"}
            ],
            "user": {"avatar": "https://cdn.example.net/me.jpg"}
        });
        let images = images_from_record(&c, &record, &c.image_candidates);
        assert_eq!(images.len(), 2);

        // No candidate match → whole-record walk, avatar still excluded
        let record = json!({
            "note_id": "n1",
            "pic_info": {"large": "https://x.example/photo.png"},
            "user": {"avatar": "https://x.example/me.jpg"}
        });
        let images = images_from_record(&c, &record, &c.image_candidates);
        assert_eq!(images, vec!["https://x.example/photo.png".to_string()]);
    }

    #[test]
    fn merge_prefers_detail_and_caps() {
        let merged = merge_images(
            vec!["d1".into(), "d2".into()],
            vec!["d1".into(), "l1".into(), "l2".into()],
            3,
        );
        assert_eq!(merged, vec!["d1".to_string(), "d2".to_string(), "l1".to_string()]);
    }

    #[test]
    fn video_flag_from_type_field() {
        let record = json!({"note_id": "n1", "title": "t", "type": "Video"});
        assert!(is_video(&cfg(), &record));
    }

    #[test]
    fn template_substitution() {
        let record = json!({"note_id": "n1", "xsec_token": "tok_9"});
        let url = substitute_template(
            "https://api.example.com/note/{id}?token={xsec_token}",
            "n1",
            &record,
        );
        assert_eq!(url, "https://api.example.com/note/n1?token=tok_9");

        // Unknown tokens stay literal
        let url = substitute_template("https://api.example.com/{mystery}", "n1", &record);
        assert_eq!(url, "https://api.example.com/{mystery}");
    }
}
