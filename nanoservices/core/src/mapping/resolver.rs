use serde_json::{Map, Value};

use crate::mapping::flatten::{flatten, ROOT_PATH};
use crate::schema::types::Mapping;

/// Raw values staged per destination column, prior to coercion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowCandidate {
    values: Map<String, Value>,
}

impl RowCandidate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, column: impl Into<String>, value: Value) {
        self.values.insert(column.into(), value);
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Map<String, Value>> for RowCandidate {
    fn from(values: Map<String, Value>) -> Self {
        Self { values }
    }
}

/// Outcome of resolving a whole document against a mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// One candidate per source record, in source order.
    pub candidates: Vec<RowCandidate>,
    /// Mapping paths not present in the flattened document.
    pub unresolved: Vec<String>,
}

/// Resolve a single record: look every mapped path up in `flatten(document)`.
///
/// Never fails. Columns whose path is absent stay unset and the path is
/// reported in the second element.
pub fn resolve(document: &Value, mapping: &Mapping) -> (RowCandidate, Vec<String>) {
    let flat = flatten(document);
    let mut candidate = RowCandidate::new();
    let mut unresolved = Vec::new();

    for (path, column) in mapping.iter() {
        match flat.get(path) {
            Some(value) => candidate.stage(column, value.clone()),
            None => unresolved.push(path.to_string()),
        }
    }
    (candidate, unresolved)
}

/// Resolve a document that may hold many records.
///
/// Path presence is decided on the flattened document, exactly as in
/// [`resolve`]. Values are then gathered by walking each path through the
/// document itself: a list of objects on the way fans out over all of its
/// elements, and a list of scalars at the leaf yields its elements. Record
/// `i` takes element `i` of every gathered list, single values repeat on
/// every record, and a shorter list leaves its column unset past its end.
/// Records with no value at all are dropped.
pub fn resolve_records(document: &Value, mapping: &Mapping) -> Resolution {
    let flat = flatten(document);
    let mut unresolved = Vec::new();
    let mut gathered: Vec<(&str, Gathered)> = Vec::new();

    for (path, column) in mapping.iter() {
        let Some(leaf) = flat.get(path) else {
            unresolved.push(path.to_string());
            continue;
        };
        // Keys that themselves contain dots cannot be walked; use the flattened leaf.
        let values = gather_path(document, path).unwrap_or_else(|| Gathered::from_leaf(leaf));
        gathered.push((column, values));
    }

    let count = gathered
        .iter()
        .filter_map(|(_, g)| match g {
            Gathered::Many(values) => Some(values.len()),
            Gathered::One(_) => None,
        })
        .max()
        .unwrap_or(if gathered.is_empty() { 0 } else { 1 });

    let candidates = (0..count)
        .map(|i| {
            let mut candidate = RowCandidate::new();
            for (column, values) in &gathered {
                match values {
                    Gathered::One(value) => candidate.stage(*column, value.clone()),
                    Gathered::Many(values) => {
                        if let Some(Some(value)) = values.get(i) {
                            candidate.stage(*column, value.clone());
                        }
                    }
                }
            }
            candidate
        })
        .filter(|candidate| !candidate.is_empty())
        .collect();

    Resolution { candidates, unresolved }
}

#[derive(Debug)]
enum Gathered {
    One(Value),
    Many(Vec<Option<Value>>),
}

impl Gathered {
    fn from_leaf(leaf: &Value) -> Self {
        match leaf {
            Value::Array(items) => Gathered::Many(items.iter().cloned().map(Some).collect()),
            other => Gathered::One(other.clone()),
        }
    }

    /// The value of one fanned-out record.
    fn into_value(self) -> Value {
        match self {
            Gathered::One(value) => value,
            Gathered::Many(values) => {
                Value::Array(values.into_iter().map(|v| v.unwrap_or(Value::Null)).collect())
            }
        }
    }
}

fn gather_path(document: &Value, path: &str) -> Option<Gathered> {
    if path == ROOT_PATH && stored_under_root_path(document) {
        return gather(document, &[]);
    }
    let segments: Vec<&str> = path.split('.').collect();
    gather(document, &segments)
}

/// Whether `flatten` keeps the whole document under [`ROOT_PATH`]: scalars,
/// and lists that do not hold records.
fn stored_under_root_path(document: &Value) -> bool {
    match document {
        Value::Object(_) => false,
        Value::Array(items) => !items.first().is_some_and(Value::is_object),
        _ => true,
    }
}

fn gather(node: &Value, segments: &[&str]) -> Option<Gathered> {
    match node {
        Value::Array(items) if items.first().is_some_and(Value::is_object) => {
            let values = items
                .iter()
                .map(|item| gather(item, segments).map(Gathered::into_value))
                .collect();
            Some(Gathered::Many(values))
        }
        _ if segments.is_empty() => Some(Gathered::from_leaf(node)),
        Value::Object(map) => gather(map.get(segments[0])?, &segments[1..]),
        _ => None,
    }
}
