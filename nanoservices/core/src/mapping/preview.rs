use serde_json::{Map, Value};

/// Elements kept from each list in a preview.
pub const PREVIEW_LIST_LIMIT: usize = 10;
/// Keys kept from each object in a preview.
pub const PREVIEW_KEY_LIMIT: usize = 20;
/// Key added to an object whose remaining keys were cut.
pub const TRUNCATED_MARKER: &str = "__truncated";

/// Shrink a fetched document for display, at every depth.
pub fn truncate_preview(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().take(PREVIEW_LIST_LIMIT).map(truncate_preview).collect()),
        Value::Object(map) => {
            let mut out: Map<String, Value> = map
                .iter()
                .take(PREVIEW_KEY_LIMIT)
                .map(|(k, v)| (k.clone(), truncate_preview(v)))
                .collect();
            if map.len() > PREVIEW_KEY_LIMIT {
                out.insert(TRUNCATED_MARKER.to_string(), Value::String("(more keys omitted)".to_string()));
            }
            Value::Object(out)
        }
        scalar => scalar.clone(),
    }
}
