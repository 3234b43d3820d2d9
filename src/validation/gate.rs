//! Validation gate
//!
//! Repositories never look at raw input directly: it passes through the gate,
//! which runs the configured `Validator` strategy and then decodes the result
//! into the entity type. Decoding failures are reported the same way as
//! schema failures.

use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::Value;

use crate::errors::{ValidationFailure, ValidationIssue};
use crate::model::{kind_of, Entity, ExpandedPatch, DELETED_AT_FIELD, ID_FIELD};
use crate::store::DocumentData;

/// Strategy for checking untrusted input
pub trait Validator: Send + Sync {
    /// Validate a complete entity
    fn validate_for_create(&self, input: &Value) -> Result<Value, ValidationFailure>;

    /// Validate a partial entity: the same rules with every field optional
    fn validate_for_update(&self, input: &Value) -> Result<Value, ValidationFailure>;
}

/// Accepts everything unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl Validator for PassThrough {
    fn validate_for_create(&self, input: &Value) -> Result<Value, ValidationFailure> {
        Ok(input.clone())
    }

    fn validate_for_update(&self, input: &Value) -> Result<Value, ValidationFailure> {
        Ok(input.clone())
    }
}

/// Validator plus entity decoding for one entity type
pub struct ValidationGate<T> {
    validator: Arc<dyn Validator>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for ValidationGate<T> {
    fn clone(&self) -> Self {
        Self {
            validator: Arc::clone(&self.validator),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> ValidationGate<T> {
    pub fn new(validator: Arc<dyn Validator>) -> Self {
        Self {
            validator,
            _entity: PhantomData,
        }
    }

    /// Gate that only decodes
    pub fn pass_through() -> Self {
        Self::new(Arc::new(PassThrough))
    }

    /// Validate and decode input for a create. Reserved fields in the input
    /// are discarded.
    pub fn for_create(&self, input: &Value) -> Result<T, ValidationFailure> {
        let validated = self.validator.validate_for_create(input)?;
        match validated {
            Value::Object(mut data) => {
                data.remove(ID_FIELD);
                data.remove(DELETED_AT_FIELD);
                decode(data)
            }
            other => Err(ValidationFailure::single(
                "",
                format!("expected object, got {}", kind_of(&other)),
            )),
        }
    }

    /// Validate an expanded patch as a partial entity. The returned patch
    /// carries the validator's output values under the original paths.
    pub fn for_update(&self, patch: &ExpandedPatch) -> Result<ExpandedPatch, ValidationFailure> {
        match self
            .validator
            .validate_for_update(&Value::Object(patch.to_nested()))?
        {
            Value::Object(validated) => Ok(patch.with_values_from(&validated)),
            other => Err(ValidationFailure::single(
                "",
                format!("expected object, got {}", kind_of(&other)),
            )),
        }
    }

    /// Decode a merged body back into the entity type
    pub fn decode_merged(&self, mut merged: DocumentData) -> Result<T, ValidationFailure> {
        merged.remove(ID_FIELD);
        merged.remove(DELETED_AT_FIELD);
        decode(merged)
    }
}

fn field_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"field `([^`]+)`").expect("static regex"))
}

fn decode<T: Entity>(data: DocumentData) -> Result<T, ValidationFailure> {
    serde_json::from_value(Value::Object(data)).map_err(|e| {
        let message = e.to_string();
        let path = field_pattern()
            .captures(&message)
            .map(|c| c[1].to_string())
            .unwrap_or_default();
        ValidationFailure::new(vec![ValidationIssue::new(path, message)])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Patch;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        title: String,
        #[serde(default)]
        pinned: bool,
    }

    struct RejectAll;

    impl Validator for RejectAll {
        fn validate_for_create(&self, _: &Value) -> Result<Value, ValidationFailure> {
            Err(ValidationFailure::single("title", "rejected"))
        }

        fn validate_for_update(&self, _: &Value) -> Result<Value, ValidationFailure> {
            Err(ValidationFailure::single("title", "rejected"))
        }
    }

    #[test]
    fn test_pass_through_decodes() {
        let gate: ValidationGate<Note> = ValidationGate::pass_through();
        let note = gate.for_create(&json!({"title": "hi", "id": "x"})).unwrap();
        assert_eq!(note, Note { title: "hi".into(), pinned: false });
    }

    #[test]
    fn test_decode_failure_names_field() {
        let gate: ValidationGate<Note> = ValidationGate::pass_through();
        let failure = gate.for_create(&json!({"pinned": true})).unwrap_err();
        assert_eq!(failure.issues[0].path, "title");
    }

    #[test]
    fn test_non_object_rejected() {
        let gate: ValidationGate<Note> = ValidationGate::pass_through();
        let failure = gate.for_create(&json!("title")).unwrap_err();
        assert_eq!(failure.issues[0].message, "expected object, got string");
    }

    struct TrimTitle;

    impl Validator for TrimTitle {
        fn validate_for_create(&self, input: &Value) -> Result<Value, ValidationFailure> {
            self.validate_for_update(input)
        }

        fn validate_for_update(&self, input: &Value) -> Result<Value, ValidationFailure> {
            let mut out = input.clone();
            if let Some(Value::String(title)) = out.get_mut("title") {
                *title = title.trim().to_string();
            }
            Ok(out)
        }
    }

    #[test]
    fn test_update_uses_validator_output() {
        let gate: ValidationGate<Note> = ValidationGate::new(Arc::new(TrimTitle));
        let patch = Patch::new()
            .set("title", json!("  spaced  "))
            .expand('.')
            .unwrap();

        let validated = gate.for_update(&patch).unwrap();

        assert_eq!(validated.paths()[0].value, json!("spaced"));
    }

    #[test]
    fn test_validator_failure_wins() {
        let gate: ValidationGate<Note> = ValidationGate::new(Arc::new(RejectAll));
        assert!(gate.for_create(&json!({"title": "ok"})).is_err());

        let patch = Patch::new().set("title", json!("x")).expand('.').unwrap();
        assert!(gate.for_update(&patch).is_err());
    }
}
