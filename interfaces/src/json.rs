use serde_json::Value;

/// Walk `path` through nested JSON objects, returning the value at the end
/// of the path when every segment exists.
pub fn nested<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| current.get(*key))
}

/// Same as [`nested`] but only succeeds when the target is a JSON string.
pub fn nested_str<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    nested(value, path)?.as_str()
}

/// Try each path in order and return the first string found.
pub fn first_nested_str<'a>(value: &'a Value, paths: &[&[&str]]) -> Option<&'a str> {
    paths.iter().find_map(|path| nested_str(value, path))
}
