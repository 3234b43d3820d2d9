//! Input validation
//!
//! The validator is a swappable strategy. `PassThrough` is the null object
//! used when a repository has no schema; `SchemaValidator` enforces a
//! declared `Schema`.

mod gate;
mod schema;

pub use gate::{PassThrough, ValidationGate, Validator};
pub use schema::{FieldDef, FieldType, Schema, SchemaValidator};
