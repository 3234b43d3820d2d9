//! Schema-driven validator
//!
//! Validation semantics:
//! - All required fields are present (creates only)
//! - No undeclared fields exist
//! - Field types exactly match schema types, no coercion
//! - `null` only where the field is declared nullable
//! - Reserved fields (`id`, `deletedAt`) are ignored
//!
//! Unlike a fail-fast check, every violation is collected. Fields are
//! visited in name order so the issue list is deterministic.

use std::collections::BTreeMap;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{ValidationFailure, ValidationIssue};
use crate::model::{DELETED_AT_FIELD, ID_FIELD};

use super::gate::Validator;

/// Supported field types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldType {
    /// UTF-8 string
    String,
    /// 64-bit signed integer
    Int,
    /// Boolean
    Bool,
    /// 64-bit floating point; integers are accepted
    Float,
    /// RFC 3339 timestamp string
    Timestamp,
    /// Any JSON value
    Any,
    /// Nested object with its own field schema
    Object { fields: BTreeMap<String, FieldDef> },
    /// Homogeneous array with single element type
    Array { element_type: Box<FieldType> },
}

impl FieldType {
    /// Returns the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Int => "int",
            FieldType::Bool => "bool",
            FieldType::Float => "float",
            FieldType::Timestamp => "timestamp",
            FieldType::Any => "any",
            FieldType::Object { .. } => "object",
            FieldType::Array { .. } => "array",
        }
    }
}

/// Field definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    #[serde(flatten)]
    pub field_type: FieldType,
    /// Whether field must be present on create
    #[serde(default)]
    pub required: bool,
    /// Whether `null` is an accepted value
    #[serde(default)]
    pub nullable: bool,
}

impl FieldDef {
    pub fn new(field_type: FieldType, required: bool) -> Self {
        Self {
            field_type,
            required,
            nullable: false,
        }
    }

    pub fn required(field_type: FieldType) -> Self {
        Self::new(field_type, true)
    }

    pub fn optional(field_type: FieldType) -> Self {
        Self::new(field_type, false)
    }

    /// Create a required string field
    pub fn required_string() -> Self {
        Self::required(FieldType::String)
    }

    /// Create an optional string field
    pub fn optional_string() -> Self {
        Self::optional(FieldType::String)
    }

    /// Create a required int field
    pub fn required_int() -> Self {
        Self::required(FieldType::Int)
    }

    /// Create an optional int field
    pub fn optional_int() -> Self {
        Self::optional(FieldType::Int)
    }

    /// Create a required object field
    pub fn required_object(fields: BTreeMap<String, FieldDef>) -> Self {
        Self::required(FieldType::Object { fields })
    }

    /// Create a required array field
    pub fn required_array(element_type: FieldType) -> Self {
        Self::required(FieldType::Array {
            element_type: Box::new(element_type),
        })
    }

    /// Accept `null` for this field
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Complete schema definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Field definitions
    pub fields: BTreeMap<String, FieldDef>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field definition
    pub fn field(mut self, name: impl Into<String>, def: FieldDef) -> Self {
        self.fields.insert(name.into(), def);
        self
    }

    /// Parse a schema from its JSON description
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Create,
    Update,
}

/// Validator enforcing a `Schema`
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    schema: Schema,
}

impl SchemaValidator {
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    fn check(&self, input: &Value, mode: Mode) -> Result<Value, ValidationFailure> {
        let obj = match input.as_object() {
            Some(obj) => obj,
            None => {
                return Err(ValidationFailure::single(
                    "",
                    format!("expected object, got {}", json_type_name(input)),
                ))
            }
        };

        let mut issues = Vec::new();
        validate_object(obj, &self.schema.fields, "", mode, true, &mut issues);

        if issues.is_empty() {
            Ok(input.clone())
        } else {
            Err(ValidationFailure::new(issues))
        }
    }
}

impl Validator for SchemaValidator {
    fn validate_for_create(&self, input: &Value) -> Result<Value, ValidationFailure> {
        self.check(input, Mode::Create)
    }

    fn validate_for_update(&self, input: &Value) -> Result<Value, ValidationFailure> {
        self.check(input, Mode::Update)
    }
}

/// Validates an object against field definitions.
fn validate_object(
    obj: &Map<String, Value>,
    fields: &BTreeMap<String, FieldDef>,
    path_prefix: &str,
    mode: Mode,
    root: bool,
    issues: &mut Vec<ValidationIssue>,
) {
    // Undeclared fields, in name order
    let mut keys: Vec<&String> = obj.keys().collect();
    keys.sort();
    for key in keys {
        if root && (key == ID_FIELD || key == DELETED_AT_FIELD) {
            continue;
        }
        if !fields.contains_key(key) {
            issues.push(ValidationIssue::new(
                make_path(path_prefix, key),
                "undeclared field",
            ));
        }
    }

    for (field_name, field_def) in fields {
        let field_path = make_path(path_prefix, field_name);

        match obj.get(field_name) {
            Some(Value::Null) if field_def.nullable => {}
            Some(Value::Null) => {
                issues.push(ValidationIssue::new(field_path, "must not be null"));
            }
            Some(value) => validate_value(value, &field_def.field_type, &field_path, mode, issues),
            None if field_def.required && mode == Mode::Create => {
                issues.push(ValidationIssue::new(field_path, "required field is missing"));
            }
            None => {}
        }
    }
}

/// Validates a value against a field type.
fn validate_value(
    value: &Value,
    expected_type: &FieldType,
    field_path: &str,
    mode: Mode,
    issues: &mut Vec<ValidationIssue>,
) {
    let ok = match expected_type {
        FieldType::String => value.is_string(),
        FieldType::Int => value.is_i64() || value.is_u64(),
        FieldType::Bool => value.is_boolean(),
        FieldType::Float => value.is_number(),
        FieldType::Any => true,
        FieldType::Timestamp => value
            .as_str()
            .map(|s| DateTime::parse_from_rfc3339(s).is_ok())
            .unwrap_or(false),
        FieldType::Object { fields } => match value.as_object() {
            Some(obj) => {
                validate_object(obj, fields, field_path, mode, false, issues);
                true
            }
            None => false,
        },
        FieldType::Array { element_type } => match value.as_array() {
            Some(arr) => {
                for (i, elem) in arr.iter().enumerate() {
                    let elem_path = format!("{}[{}]", field_path, i);
                    if elem.is_null() {
                        issues.push(ValidationIssue::new(elem_path, "must not be null"));
                    } else {
                        // Array elements are whole values even in a partial update
                        validate_value(elem, element_type, &elem_path, Mode::Create, issues);
                    }
                }
                true
            }
            None => false,
        },
    };

    if !ok {
        issues.push(ValidationIssue::new(
            field_path,
            format!(
                "expected {}, got {}",
                expected_type.type_name(),
                json_type_name(value)
            ),
        ));
    }
}

/// Returns the JSON type name for error messages.
fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                "int"
            } else {
                "float"
            }
        }
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Creates a field path from prefix and field name.
fn make_path(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", prefix, field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user_schema() -> SchemaValidator {
        let address = BTreeMap::from([
            ("city".to_string(), FieldDef::required_string()),
            ("zip".to_string(), FieldDef::optional_string()),
        ]);
        SchemaValidator::new(
            Schema::new()
                .field("name", FieldDef::required_string())
                .field("age", FieldDef::optional_int())
                .field("address", FieldDef::optional(FieldType::Object { fields: address }))
                .field("tags", FieldDef::optional(FieldType::Array {
                    element_type: Box::new(FieldType::String),
                }))
                .field("bio", FieldDef::optional_string().nullable())
                .field("joined", FieldDef::optional(FieldType::Timestamp)),
        )
    }

    #[test]
    fn test_valid_document_passes_unchanged() {
        let doc = json!({"name": "Alice", "age": 30, "tags": ["a"], "bio": null});
        assert_eq!(user_schema().validate_for_create(&doc).unwrap(), doc);
    }

    #[test]
    fn test_all_issues_collected_in_name_order() {
        let doc = json!({"age": "old", "extra": 1, "tags": ["a", 2]});
        let failure = user_schema().validate_for_create(&doc).unwrap_err();

        let paths: Vec<&str> = failure.issues.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["extra", "age", "name", "tags[1]"]);
    }

    #[test]
    fn test_update_relaxes_required_but_keeps_types() {
        let validator = user_schema();
        assert!(validator.validate_for_update(&json!({"age": 31})).is_ok());
        assert!(validator
            .validate_for_update(&json!({"address": {"zip": "0150"}}))
            .is_ok());

        let failure = validator.validate_for_update(&json!({"age": 1.5})).unwrap_err();
        assert_eq!(failure.issues[0].message, "expected int, got float");
    }

    #[test]
    fn test_nested_required_on_create() {
        let failure = user_schema()
            .validate_for_create(&json!({"name": "A", "address": {"zip": "1"}}))
            .unwrap_err();
        assert_eq!(failure.issues[0].path, "address.city");
    }

    #[test]
    fn test_reserved_fields_ignored() {
        let doc = json!({"id": "u1", "deletedAt": null, "name": "A"});
        assert!(user_schema().validate_for_create(&doc).is_ok());
    }

    #[test]
    fn test_null_rejected_unless_nullable() {
        let failure = user_schema()
            .validate_for_create(&json!({"name": null}))
            .unwrap_err();
        assert_eq!(failure.issues[0].message, "must not be null");
    }

    #[test]
    fn test_timestamp_must_be_rfc3339() {
        let validator = user_schema();
        assert!(validator
            .validate_for_update(&json!({"joined": "2024-02-03T04:05:06Z"}))
            .is_ok());
        assert!(validator.validate_for_update(&json!({"joined": "yesterday"})).is_err());
    }

    #[test]
    fn test_validation_is_deterministic() {
        let validator = user_schema();
        let doc = json!({"zzz": 1, "aaa": 2, "age": "x"});
        let first = validator.validate_for_create(&doc).unwrap_err();
        for _ in 0..50 {
            assert_eq!(validator.validate_for_create(&doc).unwrap_err(), first);
        }
    }

    #[test]
    fn test_schema_from_json() {
        let schema = Schema::from_json(
            r#"{"fields": {"name": {"type": "string", "required": true},
                           "tags": {"type": "array", "element_type": {"type": "string"}}}}"#,
        )
        .unwrap();
        assert!(schema.fields["name"].required);
        assert!(!schema.fields["tags"].required);
    }
}
