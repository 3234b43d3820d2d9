//! # Query Specification
//!
//! Filter, order and cursor description handed to `DocumentStore::query`.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Filter operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    /// Equals
    #[serde(rename = "==")]
    Eq,

    /// Not equals
    #[serde(rename = "!=")]
    Neq,

    /// Greater than
    #[serde(rename = ">")]
    Gt,

    /// Greater than or equal
    #[serde(rename = ">=")]
    Gte,

    /// Less than
    #[serde(rename = "<")]
    Lt,

    /// Less than or equal
    #[serde(rename = "<=")]
    Lte,

    /// Value in list
    #[serde(rename = "in")]
    In,

    /// Array field contains value
    #[serde(rename = "array-contains")]
    ArrayContains,
}

impl FilterOperator {
    /// Get the operator string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "==",
            FilterOperator::Neq => "!=",
            FilterOperator::Gt => ">",
            FilterOperator::Gte => ">=",
            FilterOperator::Lt => "<",
            FilterOperator::Lte => "<=",
            FilterOperator::In => "in",
            FilterOperator::ArrayContains => "array-contains",
        }
    }

    /// Whether this is an equality-style operator
    pub fn is_equality(&self) -> bool {
        matches!(
            self,
            FilterOperator::Eq | FilterOperator::In | FilterOperator::ArrayContains
        )
    }
}

/// A filter expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterExpr {
    /// Field to filter on
    pub field: String,

    /// Comparison operator
    pub operator: FilterOperator,

    /// Value to compare against
    pub value: Value,
}

impl FilterExpr {
    /// Create a new filter expression
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Create an equality filter
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOperator::Eq, value)
    }

    /// Create a not-equal filter
    pub fn neq(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOperator::Neq, value)
    }

    /// Check if a document matches this filter.
    ///
    /// A missing field compares as `null`.
    pub fn matches(&self, doc: &serde_json::Map<String, Value>) -> bool {
        let field_value = doc.get(&self.field).unwrap_or(&Value::Null);

        match self.operator {
            FilterOperator::Eq => field_value == &self.value,
            FilterOperator::Neq => field_value != &self.value,
            FilterOperator::Gt => compare_values(field_value, &self.value) == Some(Ordering::Greater),
            FilterOperator::Gte => matches!(
                compare_values(field_value, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOperator::Lt => compare_values(field_value, &self.value) == Some(Ordering::Less),
            FilterOperator::Lte => matches!(
                compare_values(field_value, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOperator::In => self
                .value
                .as_array()
                .map(|arr| arr.contains(field_value))
                .unwrap_or(false),
            FilterOperator::ArrayContains => field_value
                .as_array()
                .map(|arr| arr.contains(&self.value))
                .unwrap_or(false),
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// Sort specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub field: String,
    #[serde(default)]
    pub direction: Direction,
}

/// Everything a store needs to run a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Filters combined with AND logic
    #[serde(default)]
    pub filters: Vec<FilterExpr>,
    #[serde(default)]
    pub order: Vec<OrderSpec>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Resume after the document with this id
    #[serde(default)]
    pub start_after: Option<String>,
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a document matches all filters
    pub fn matches(&self, doc: &serde_json::Map<String, Value>) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// Distinct field names referenced by filters and ordering, in first-use order
    pub fn fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = Vec::new();
        let names = self
            .filters
            .iter()
            .map(|f| &f.field)
            .chain(self.order.iter().map(|o| &o.field));
        for name in names {
            if !fields.contains(name) {
                fields.push(name.clone());
            }
        }
        fields
    }
}

/// Compare two JSON values of the same kind; `None` when they are not comparable
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => {
            let a_f = a.as_f64().unwrap_or(0.0);
            let b_f = b.as_f64().unwrap_or(0.0);
            a_f.partial_cmp(&b_f)
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}
