// Field inference over capture payloads.
//
// Capture payloads are arbitrary, renamed, and versioned by the platform;
// structural scoring over key names holds up better than hardcoded paths.

use serde_json::Value;
use tracing::debug;

use notesync_common::FieldInference;

use crate::paths::{any_key_contains, find_key_path};

/// How deep candidate-key search descends into a record.
const KEY_SEARCH_DEPTH: usize = 5;

/// Arrays scoring below this are not worth treating as the item list.
const MIN_USEFUL_SCORE: i32 = 4;

const ID_KEYS: &[&str] = &["note_id", "id", "item_id", "nid"];
const TITLE_KEYS: &[&str] = &["title", "display_title", "name"];
const BODY_KEYS: &[&str] = &["desc", "description", "content", "text", "body", "summary"];
const URL_KEYS: &[&str] = &["url", "link", "note_url", "share_url", "source_url"];
const IMAGE_KEYS: &[&str] = &["images", "image_list", "imgs", "pics", "pic_list", "cover"];

/// Find the best-scoring list-of-records array in an arbitrary payload
/// and the most plausible field paths for each semantic role.
///
/// Returns the winner and its score, or `(None, 0)` when nothing clears
/// the usefulness threshold. Ties keep the first array encountered.
pub fn infer(payload: &Value) -> (Option<FieldInference>, i32) {
    let mut arrays = Vec::new();
    collect_arrays(payload, String::new(), &mut arrays);

    let mut best: Option<FieldInference> = None;
    let mut best_score = 0;

    for (path, array) in arrays {
        let Some(first) = array.first() else { continue };
        if !first.is_object() {
            continue;
        }

        let (inference, score) = score_record(&path, first);
        debug!(items_path = %path, score, "scored candidate array");
        if score >= MIN_USEFUL_SCORE && score > best_score {
            best_score = score;
            best = Some(inference);
        }
    }

    (best, best_score)
}

/// Enumerate every array reachable from the root, keyed by dotted path.
fn collect_arrays<'a>(value: &'a Value, path: String, out: &mut Vec<(String, &'a Vec<Value>)>) {
    match value {
        Value::Array(items) => {
            out.push((path.clone(), items));
            for item in items {
                collect_arrays(item, path.clone(), out);
            }
        }
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                collect_arrays(child, child_path, out);
            }
        }
        _ => {}
    }
}

fn score_record(array_path: &str, record: &Value) -> (FieldInference, i32) {
    let mut score = 0;

    let id_field = first_candidate(record, ID_KEYS);
    if id_field.is_some() {
        score += 4;
    }
    let title_field = first_candidate(record, TITLE_KEYS);
    if title_field.is_some() {
        score += 3;
    }

    let body_candidates = all_candidates(record, BODY_KEYS);
    if !body_candidates.is_empty() {
        score += 2;
    }

    let source_url_field = first_candidate(record, URL_KEYS);
    if source_url_field.is_some() {
        score += 1;
    }

    if any_key_contains(record, "note", KEY_SEARCH_DEPTH) {
        score += 1;
    }

    let path_lower = array_path.to_ascii_lowercase();
    if path_lower.contains("note") {
        score += 2;
    }
    if path_lower.contains("collect") || path_lower.contains("fav") {
        score += 1;
    }

    let inference = FieldInference {
        items_path: array_path.to_string(),
        id_field: id_field.unwrap_or_default(),
        title_field: title_field.unwrap_or_default(),
        source_url_field: source_url_field.unwrap_or_default(),
        body_candidates,
        image_candidates: all_candidates(record, IMAGE_KEYS),
    };
    (inference, score)
}

/// First candidate key found in the record, searched in candidate order.
fn first_candidate(record: &Value, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .find_map(|key| find_key_path(record, key, KEY_SEARCH_DEPTH))
}

/// Every candidate key found, preserving candidate order.
fn all_candidates(record: &Value, candidates: &[&str]) -> Vec<String> {
    candidates
        .iter()
        .filter_map(|key| find_key_path(record, key, KEY_SEARCH_DEPTH))
        .collect()
}
