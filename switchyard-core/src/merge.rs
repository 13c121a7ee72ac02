//! Merge of common and per-request parameters.

use serde_json::Value;

/// Merge per-request parameters over common parameters.
///
/// When both sides are objects the merge is recursive, field by field. For
/// any other combination the request-specific value wins, including when the
/// two sides disagree on type and when the request value is `null`. Only a
/// top-level `null` request means "no parameters" and leaves the common
/// parameters untouched.
///
/// ```
/// use serde_json::json;
/// use switchyard_core::merge_parameters;
///
/// let common = json!({"app": "demo", "device": {"os": "ios", "ver": 1}});
/// let request = json!({"device": {"ver": 2}, "q": "x"});
///
/// assert_eq!(
///     merge_parameters(&common, request),
///     json!({"app": "demo", "device": {"os": "ios", "ver": 2}, "q": "x"}),
/// );
/// ```
pub fn merge_parameters(common: &Value, request: Value) -> Value {
    match request {
        Value::Null => common.clone(),
        request => merge_value(common, request),
    }
}

fn merge_value(common: &Value, request: Value) -> Value {
    match (common, request) {
        (Value::Object(base), Value::Object(overlay)) => {
            let mut merged = base.clone();
            for (key, value) in overlay {
                let next = match merged.get(&key) {
                    Some(existing) => merge_value(existing, value),
                    None => value,
                };
                merged.insert(key, next);
            }
            Value::Object(merged)
        }
        (_, request) => request,
    }
}
