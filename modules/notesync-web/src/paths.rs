// Dotted-path access over loosely-shaped platform JSON.
//
// Paths stay data (strings walked at runtime), not compiled accessors —
// the schema is learned from captures, not declared, and the platform
// renames fields between app versions.

use serde_json::Value;

/// Walk a dot-separated path of object keys. An array encountered
/// mid-path descends into its first element. The empty path is the
/// value itself.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    let mut current = value;
    for segment in path.split('.') {
        if let Value::Array(items) = current {
            current = items.first()?;
        }
        current = current.get(segment)?;
    }
    Some(current)
}

/// Resolve a path to a string. Numbers and booleans are stringified;
/// other shapes are treated as absent.
pub fn get_str(value: &Value, path: &str) -> Option<String> {
    match get_path(value, path)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Resolve a path to an integer, accepting numeric strings.
pub fn get_i64(value: &Value, path: &str) -> Option<i64> {
    match get_path(value, path)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Depth-first search for `key` (case-insensitive exact match) in nested
/// objects and arrays, up to `max_depth` levels. Returns the dotted path
/// of the first match in encounter order.
pub fn find_key_path(value: &Value, key: &str, max_depth: usize) -> Option<String> {
    fn walk(value: &Value, key: &str, prefix: &str, depth: usize) -> Option<String> {
        match value {
            Value::Object(map) => {
                for (k, _) in map {
                    if k.eq_ignore_ascii_case(key) {
                        return Some(join(prefix, k));
                    }
                }
                if depth == 0 {
                    return None;
                }
                for (k, v) in map {
                    if let Some(found) = walk(v, key, &join(prefix, k), depth - 1) {
                        return Some(found);
                    }
                }
                None
            }
            Value::Array(items) => {
                if depth == 0 {
                    return None;
                }
                // Arrays are transparent: the path stays the array's path.
                items
                    .iter()
                    .find_map(|v| walk(v, key, prefix, depth - 1))
            }
            _ => None,
        }
    }
    walk(value, key, "", max_depth)
}

/// True when any key anywhere in the value (to `max_depth`) contains
/// `fragment`, case-insensitively.
pub fn any_key_contains(value: &Value, fragment: &str, max_depth: usize) -> bool {
    let fragment = fragment.to_ascii_lowercase();
    fn walk(value: &Value, fragment: &str, depth: usize) -> bool {
        match value {
            Value::Object(map) => {
                if map.keys().any(|k| k.to_ascii_lowercase().contains(fragment)) {
                    return true;
                }
                depth > 0 && map.values().any(|v| walk(v, fragment, depth - 1))
            }
            Value::Array(items) => depth > 0 && items.iter().any(|v| walk(v, fragment, depth - 1)),
            _ => false,
        }
    }
    walk(value, &fragment, max_depth)
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn walks_nested_objects() {
        let v = json!({"data": {"user": {"name": "ada"}}});
        assert_eq!(get_str(&v, "data.user.name").as_deref(), Some("ada"));
        assert!(get_path(&v, "data.missing").is_none());
    }

    #[test]
    fn descends_into_first_array_element() {
        let v = json!({"data": {"notes": [{"id": 7}, {"id": 8}]}});
        assert_eq!(get_i64(&v, "data.notes.id"), Some(7));
    }

    #[test]
    fn empty_path_is_identity() {
        let v = json!({"a": 1});
        assert_eq!(get_path(&v, ""), Some(&v));
    }

    #[test]
    fn finds_first_key_path_case_insensitive() {
        let v = json!({"outer": {"Note_ID": "x"}, "note_id": "y"});
        // Top-level keys are checked before descending.
        assert_eq!(find_key_path(&v, "note_id", 5).as_deref(), Some("note_id"));

        let nested = json!({"wrap": {"inner": {"DESC": "text"}}});
        assert_eq!(
            find_key_path(&nested, "desc", 5).as_deref(),
            Some("wrap.inner.DESC")
        );
    }

    #[test]
    fn depth_limit_stops_search() {
        let v = json!({"a": {"b": {"c": {"d": {"e": {"f": {"target": 1}}}}}}});
        assert!(find_key_path(&v, "target", 3).is_none());
        assert!(find_key_path(&v, "target", 6).is_some());
    }

    #[test]
    fn key_fragment_search() {
        let v = json!({"data": [{"note_card": {"title": "t"}}]});
        assert!(any_key_contains(&v, "note", 5));
        assert!(!any_key_contains(&v, "avatar", 5));
    }
}
