//! Dotted-path addressing into a JSON tree.

use serde_json::{Map, Value};

use crate::error::{PipelineError, PipelineResult};

/// Split a dotted path into its segments.
///
/// Empty paths and empty segments (`a..b`, `.a`, `a.`) are rejected.
pub(crate) fn parse(path: &str) -> PipelineResult<Vec<&str>> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::config("configuration path is empty"));
    }

    let segments: Vec<&str> = trimmed.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(PipelineError::config(format!("invalid configuration path '{}'", path)));
    }

    Ok(segments)
}

/// Resolve segments against a tree. Numeric segments index into arrays.
pub(crate) fn lookup<'a>(root: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    segments.iter().try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get(*segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Assign a value at the given segments, creating missing objects on the way.
pub(crate) fn assign(root: &mut Value, segments: &[&str], value: Value) -> PipelineResult<()> {
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| PipelineError::config("configuration path is empty"))?;

    let mut current = root;
    for segment in parents {
        current = match current {
            Value::Object(map) => {
                map.entry((*segment).to_string()).or_insert_with(|| Value::Object(Map::new()))
            }
            Value::Array(items) => array_slot(items, segments, segment)?,
            _ => return Err(not_an_object(segments, segment)),
        };
    }

    match current {
        Value::Object(map) => {
            map.insert((*last).to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            *array_slot(items, segments, last)? = value;
            Ok(())
        }
        _ => Err(not_an_object(segments, last)),
    }
}

/// Existing array element addressed by a numeric segment.
fn array_slot<'a>(
    items: &'a mut [Value],
    segments: &[&str],
    segment: &str,
) -> PipelineResult<&'a mut Value> {
    let len = items.len();
    segment.parse::<usize>().ok().and_then(|i| items.get_mut(i)).ok_or_else(|| {
        PipelineError::config(format!(
            "cannot set '{}': '{}' is not an index into an array of length {}",
            segments.join("."),
            segment,
            len
        ))
    })
}

/// Copy of `value` with null object members and array elements dropped.
pub(crate) fn without_nulls(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), without_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().filter(|v| !v.is_null()).map(without_nulls).collect())
        }
        other => other.clone(),
    }
}

/// Remove the value at the given segments, returning it if present.
pub(crate) fn remove(root: &mut Value, segments: &[&str]) -> Option<Value> {
    let (last, parents) = segments.split_last()?;
    let mut current = root;
    for segment in parents {
        current = current.as_object_mut()?.get_mut(*segment)?;
    }
    current.as_object_mut()?.remove(*last)
}

/// Deep-merge `overlay` into `base`. Objects merge key by key; anything else replaces.
pub(crate) fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn not_an_object(segments: &[&str], at: &str) -> PipelineError {
    PipelineError::config(format!(
        "cannot set '{}': value before '{}' is not an object",
        segments.join("."),
        at
    ))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_rejects_empty_segments() {
        assert!(parse("").is_err());
        assert!(parse("a..b").is_err());
        assert!(parse(".a").is_err());
        assert!(parse("a.").is_err());
        assert_eq!(parse("a.b.c").unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_lookup_objects_and_arrays() {
        let tree = json!({"a": {"b": [10, {"c": true}]}});
        assert_eq!(lookup(&tree, &["a", "b", "0"]), Some(&json!(10)));
        assert_eq!(lookup(&tree, &["a", "b", "1", "c"]), Some(&json!(true)));
        assert_eq!(lookup(&tree, &["a", "x"]), None);
        assert_eq!(lookup(&tree, &["a", "b", "nope"]), None);
    }

    #[test]
    fn test_assign_creates_intermediates() {
        let mut tree = json!({});
        assign(&mut tree, &["x", "y", "z"], json!("v")).unwrap();
        assert_eq!(tree, json!({"x": {"y": {"z": "v"}}}));
    }

    #[test]
    fn test_assign_through_scalar_fails() {
        let mut tree = json!({"x": 1});
        assert!(assign(&mut tree, &["x", "y"], json!(2)).is_err());
        assert_eq!(tree, json!({"x": 1}));
    }

    #[test]
    fn test_assign_into_existing_array_elements() {
        let mut tree = json!({"a": [1, {"b": 2}]});
        assign(&mut tree, &["a", "0"], json!("x")).unwrap();
        assign(&mut tree, &["a", "1", "c"], json!(3)).unwrap();
        assert_eq!(tree, json!({"a": ["x", {"b": 2, "c": 3}]}));

        assert!(assign(&mut tree, &["a", "5"], json!(0)).is_err());
        assert!(assign(&mut tree, &["a", "key"], json!(0)).is_err());
        assert_eq!(lookup(&tree, &["a", "0"]), Some(&json!("x")));
    }

    #[test]
    fn test_without_nulls() {
        let tree = json!({"a": null, "b": {"c": null, "d": 1}, "e": [null, 2]});
        assert_eq!(without_nulls(&tree), json!({"b": {"d": 1}, "e": [2]}));
    }

    #[test]
    fn test_remove() {
        let mut tree = json!({"a": {"b": 1, "c": 2}});
        assert_eq!(remove(&mut tree, &["a", "b"]), Some(json!(1)));
        assert_eq!(remove(&mut tree, &["a", "missing"]), None);
        assert_eq!(tree, json!({"a": {"c": 2}}));
    }

    #[test]
    fn test_merge_keeps_defaults() {
        let mut base = json!({"a": {"b": 1, "c": 2}, "d": [1]});
        merge(&mut base, json!({"a": {"b": 5}, "d": [9, 9], "e": "new"}));
        assert_eq!(base, json!({"a": {"b": 5, "c": 2}, "d": [9, 9], "e": "new"}));
    }
}
