//! Dotted key paths
//!
//! `undot` turns `{"data.x": 1}` into `{"data": {"x": 1}}`; `flatten` does
//! the reverse. Numeric segments are plain map keys, never list indices.

use serde_json::{Map, Value};

/// Set `value` at a dotted `path`, creating intermediate objects
///
/// A non-object value found on the way is replaced by an object.
pub fn set_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments = path.split('.').peekable();
    let mut current = target;

    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return;
        }

        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
}

/// Read the value at a dotted `path`
pub fn get_path<'a>(source: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    if let Some(value) = source.get(path) {
        return Some(value);
    }
    let mut segments = path.split('.');
    let mut current = source.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Expand dotted keys into nested objects, keeping key order
pub fn undot(flat: &Map<String, Value>) -> Map<String, Value> {
    let mut nested = Map::new();
    for (key, value) in flat {
        set_path(&mut nested, key, value.clone());
    }
    nested
}

/// Flatten nested objects into dotted keys
///
/// Arrays and empty objects are kept as leaf values.
pub fn flatten(nested: &Map<String, Value>) -> Map<String, Value> {
    let mut flat = Map::new();
    flatten_into(&mut flat, None, nested);
    flat
}

fn flatten_into(flat: &mut Map<String, Value>, prefix: Option<&str>, nested: &Map<String, Value>) {
    for (key, value) in nested {
        let path = match prefix {
            Some(prefix) => format!("{}.{}", prefix, key),
            None => key.clone(),
        };
        match value {
            Value::Object(map) if !map.is_empty() => flatten_into(flat, Some(&path), map),
            other => {
                flat.insert(path, other.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_undot_nested_keys() {
        let nested = undot(&map(json!({
            "uid": "a",
            "data.x": 1,
            "data.y.z": "deep"
        })));
        assert_eq!(
            Value::Object(nested),
            json!({ "uid": "a", "data": { "x": 1, "y": { "z": "deep" } } })
        );
    }

    #[test]
    fn test_numeric_segments_are_map_keys() {
        let nested = undot(&map(json!({ "a.0.b": 1, "a.1.b": 2 })));
        assert_eq!(
            Value::Object(nested),
            json!({ "a": { "0": { "b": 1 }, "1": { "b": 2 } } })
        );
    }

    #[test]
    fn test_later_scalar_replaced_by_object() {
        let nested = undot(&map(json!({ "a": 1, "a.b": 2 })));
        assert_eq!(Value::Object(nested), json!({ "a": { "b": 2 } }));
    }

    #[test]
    fn test_flatten() {
        let flat = flatten(&map(json!({
            "uid": "a",
            "data": { "x": 1, "tags": ["t"], "empty": {} },
            "meta": null
        })));
        assert_eq!(
            flat.keys().collect::<Vec<_>>(),
            vec!["uid", "data.x", "data.tags", "data.empty", "meta"]
        );
        assert_eq!(flat["data.tags"], json!(["t"]));
    }

    #[test]
    fn test_get_path() {
        let source = map(json!({ "data": { "x": { "y": 3 } }, "a.b": "flat" }));
        assert_eq!(get_path(&source, "data.x.y"), Some(&json!(3)));
        assert_eq!(get_path(&source, "a.b"), Some(&json!("flat")));
        assert_eq!(get_path(&source, "data.missing"), None);
    }
}
