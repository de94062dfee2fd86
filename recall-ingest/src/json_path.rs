//! Dotted JSON paths
//!
//! `Products.0.UPC` walks object keys and numeric array indexes. An empty
//! path addresses the value itself.

use serde_json::Value;

/// Resolve `path` inside `value`
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return Some(value);
    }

    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_objects_and_indexes() {
        let value = json!({"Products": [{"UPC": "012914632109"}], "Title": "Crib"});
        assert_eq!(lookup(&value, "Products.0.UPC"), Some(&json!("012914632109")));
        assert_eq!(lookup(&value, "Title"), Some(&json!("Crib")));
        assert_eq!(lookup(&value, "Products.1.UPC"), None);
        assert_eq!(lookup(&value, "Title.0"), None);
        assert_eq!(lookup(&value, ""), Some(&value));
    }
}
