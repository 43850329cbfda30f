use serde_json::{Map, Value};

/// Leaf path -> value, in document order.
pub type FlatDocument = Map<String, Value>;

/// Path under which a scalar (non-object) document root is stored.
pub const ROOT_PATH: &str = "value";

/// Flatten a JSON document into dotted leaf paths.
///
/// Objects contribute one path segment per key. A list whose first element
/// is an object is represented by that first element only: later elements
/// are not inspected, so the result describes the *shape* of a list of
/// records, not its contents. Use it for previews and path lookups, never
/// as a data extract. Any other list (empty, or of scalars/lists) is kept
/// whole under its own path. A scalar root is stored under [`ROOT_PATH`].
pub fn flatten(document: &Value) -> FlatDocument {
    let mut out = FlatDocument::new();
    match document {
        Value::Object(_) => walk(document, "", &mut out),
        Value::Array(items) => match items.first() {
            Some(first @ Value::Object(_)) => walk(first, "", &mut out),
            _ => {
                out.insert(ROOT_PATH.to_string(), document.clone());
            }
        },
        scalar => {
            out.insert(ROOT_PATH.to_string(), scalar.clone());
        }
    }
    out
}

fn walk(node: &Value, path: &str, out: &mut FlatDocument) {
    match node {
        Value::Object(map) => {
            for (key, child) in map {
                walk(child, &join(path, key), out);
            }
        }
        Value::Array(items) => match items.first() {
            Some(first @ Value::Object(_)) => walk(first, path, out),
            _ => {
                out.insert(path.to_string(), node.clone());
            }
        },
        leaf => {
            out.insert(path.to_string(), leaf.clone());
        }
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}
