//! Partial updates
//!
//! A `Patch` is an ordered list of field writes. Keys containing the path
//! delimiter (e.g. `address.city`) address nested fields: they are expanded
//! into nested paths and merged into the existing sub-object instead of
//! replacing it. Plain keys replace the top-level field wholesale.
//!
//! An entry whose value is `None` is *undefined*: it is dropped during
//! expansion and the stored field is left untouched. To clear a field, set
//! it to JSON `null` explicitly.

use serde_json::{Map, Value};

use crate::errors::{ValidationFailure, ValidationIssue};
use crate::store::{apply_field_paths, DocumentData, FieldPath};

use super::document::{DELETED_AT_FIELD, ID_FIELD};

/// Ordered partial update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    entries: Vec<(String, Option<Value>)>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field (or a delimited nested path)
    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.entries.push((key.into(), Some(value)));
        self
    }

    /// Set a field only when a value is present; `None` leaves it untouched
    pub fn maybe(mut self, key: impl Into<String>, value: Option<Value>) -> Self {
        self.entries.push((key.into(), value));
        self
    }

    /// Build from a JSON object
    pub fn from_value(value: Value) -> Result<Self, ValidationFailure> {
        match value {
            Value::Object(map) => Ok(Self::from(map)),
            other => Err(ValidationFailure::single(
                "",
                format!("expected object, got {}", super::document::kind_of(&other)),
            )),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Raw keys, in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Split delimited keys into nested paths, dropping undefined entries.
    ///
    /// # Errors
    ///
    /// Every malformed or reserved key is reported, in patch order.
    pub fn expand(&self, delimiter: char) -> Result<ExpandedPatch, ValidationFailure> {
        let mut issues = Vec::new();
        let mut paths = Vec::new();

        for (key, value) in &self.entries {
            if let Some(issue) = check_path(key, delimiter) {
                issues.push(issue);
                continue;
            }
            let Some(value) = value else { continue };
            let segments: Vec<String> = key.split(delimiter).map(|s| s.to_string()).collect();
            paths.push(FieldPath {
                segments,
                value: value.clone(),
            });
        }

        if issues.is_empty() {
            Ok(ExpandedPatch { paths })
        } else {
            Err(ValidationFailure::new(issues))
        }
    }
}

impl From<Map<String, Value>> for Patch {
    fn from(map: Map<String, Value>) -> Self {
        Self {
            entries: map.into_iter().map(|(k, v)| (k, Some(v))).collect(),
        }
    }
}

fn check_path(key: &str, delimiter: char) -> Option<ValidationIssue> {
    if key.is_empty() {
        return Some(ValidationIssue::new(key, "field path must not be empty"));
    }
    if key.starts_with(delimiter) || key.ends_with(delimiter) {
        return Some(ValidationIssue::new(
            key,
            format!("field path must not start or end with '{}'", delimiter),
        ));
    }
    if key.split(delimiter).any(|segment| segment.is_empty()) {
        return Some(ValidationIssue::new(key, "field path contains an empty segment"));
    }
    let root = key.split(delimiter).next().unwrap_or(key);
    if root == ID_FIELD || root == DELETED_AT_FIELD {
        return Some(ValidationIssue::new(key, "reserved field cannot be patched"));
    }
    None
}

/// Patch after path expansion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpandedPatch {
    paths: Vec<FieldPath>,
}

impl ExpandedPatch {
    pub fn paths(&self) -> &[FieldPath] {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// The patch as a nested object, as seen by partial validation
    pub fn to_nested(&self) -> DocumentData {
        let mut out = Map::new();
        self.apply_to(&mut out);
        out
    }

    /// Merge into `base`: single-segment paths replace the top-level field,
    /// nested paths merge into (or create) the intermediate objects.
    pub fn apply_to(&self, base: &mut DocumentData) {
        apply_field_paths(base, &self.paths);
    }

    /// Re-read every path's value from `nested` (typically a validator's
    /// output for `to_nested()`), keeping the path shapes. Paths the
    /// validator removed are dropped.
    pub fn with_values_from(&self, nested: &DocumentData) -> ExpandedPatch {
        let paths = self
            .paths
            .iter()
            .filter_map(|path| {
                lookup(nested, &path.segments).map(|value| FieldPath::new(path.segments.clone(), value.clone()))
            })
            .collect();
        ExpandedPatch { paths }
    }

    /// Consume into the store's field-path form
    pub fn into_paths(self) -> Vec<FieldPath> {
        self.paths
    }
}

fn lookup<'a>(nested: &'a DocumentData, segments: &[String]) -> Option<&'a Value> {
    let (head, rest) = segments.split_first()?;
    let value = nested.get(head)?;
    if rest.is_empty() {
        return Some(value);
    }
    lookup(value.as_object()?, rest)
}

/// One entry of a bulk update
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentUpdate {
    pub id: String,
    pub patch: Patch,
}

impl DocumentUpdate {
    pub fn new(id: impl Into<String>, patch: Patch) -> Self {
        Self {
            id: id.into(),
            patch,
        }
    }
}
