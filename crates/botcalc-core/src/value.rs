//! Tag value model shared by raw bot state and computed values.
//!
//! A raw tag holds a [`Value`]: a literal (string, number, boolean, array),
//! a formula (a string starting with `=`), or an [`Assignment`]. Computed
//! values use the same type but never contain assignments.
//!
//! # Absence
//!
//! `null` and the empty string are both treated as "absent". Writing either
//! to a tag clears it (see [`Value::is_empty`]).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A tag value, raw or computed.
///
/// Serialises untagged, so bot state round-trips through plain JSON:
/// `null`, `true`, `1.5`, `"text"`, `[1, 2]`, `{ "k": "v" }` and the
/// assignment shape `{ "isAssignment": true, "editing": false, ... }`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent value.
    #[default]
    Null,
    /// Boolean literal.
    Bool(bool),
    /// IEEE-754 number. Integers are represented as whole floats.
    Number(f64),
    /// Plain text, or formula source when it starts with `=`.
    String(String),
    /// Ordered list of values.
    Array(Vec<Self>),
    /// One-time evaluated formula with a cached result.
    Assignment(Assignment),
    /// String-keyed map (copiable objects, bot references).
    Object(BTreeMap<String, Self>),
}

impl Value {
    /// Returns `true` for `null` and the empty string.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::String(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Borrow the string payload, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns `true` if this value is a formula string.
    #[must_use]
    pub fn is_formula(&self) -> bool {
        self.as_str().is_some_and(crate::literal::is_formula)
    }

    /// The `id` field of an object value, used for bot references.
    #[must_use]
    pub fn object_id(&self) -> Option<&str> {
        match self {
            Self::Object(map) => map.get("id").and_then(Self::as_str).filter(|id| !id.is_empty()),
            _ => None,
        }
    }

    /// Short type name used in diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Assignment(_) => "assignment",
            Self::Object(_) => "object",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => f.write_str(&number_to_string(*n)),
            Self::String(s) => f.write_str(s),
            Self::Array(items) => {
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(",")?;
                    }
                    if !matches!(item, Self::Null) {
                        write!(f, "{item}")?;
                    }
                }
                Ok(())
            }
            Self::Assignment(assignment) => match assignment.value.as_deref() {
                Some(value) => write!(f, "{value}"),
                None => f.write_str(&assignment.formula),
            },
            Self::Object(_) => f.write_str("[object Object]"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<Self>> for Value {
    fn from(value: Vec<Self>) -> Self {
        Self::Array(value)
    }
}

impl From<Assignment> for Value {
    fn from(value: Assignment) -> Self {
        Self::Assignment(value)
    }
}

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

/// A formula evaluated once when written, then cached as a literal.
///
/// `value` is only trusted when `editing` is `false` and the formula has
/// been evaluated at least once (`value.is_some()`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    /// Marker field kept for wire compatibility; always `true`.
    pub is_assignment: bool,
    /// While `true` the cached value is stale and must be recomputed.
    pub editing: bool,
    /// Formula source, usually starting with `:=`.
    pub formula: String,
    /// Cached result of the last evaluation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Box<Value>>,
}

impl Assignment {
    /// A fresh assignment awaiting its first evaluation.
    #[must_use]
    pub fn new(formula: impl Into<String>) -> Self {
        Self {
            is_assignment: true,
            editing: true,
            formula: formula.into(),
            value: None,
        }
    }

    /// Returns `true` when the cached value may be used as-is.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        !self.editing && self.value.is_some()
    }

    /// Store an evaluation result and leave editing mode.
    #[must_use]
    pub fn resolved(mut self, value: Value) -> Self {
        self.value = Some(Box::new(value));
        self.editing = false;
        self
    }

    /// The cached value, or `null` when never evaluated.
    #[must_use]
    pub fn cached(&self) -> Value {
        self.value.as_deref().cloned().unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Number formatting
// ---------------------------------------------------------------------------

/// Render a number the way formula authors see it: `1` rather than `1.0`,
/// `Infinity`, `NaN`, and `0` for negative zero.
#[must_use]
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_plain_json_shapes() {
        let raw = r#"[null, true, 1.5, "x", [1], {"k": "v"}]"#;
        let parsed: Vec<Value> = serde_json::from_str(raw).expect("parse");
        assert_eq!(parsed[0], Value::Null);
        assert_eq!(parsed[1], Value::Bool(true));
        assert_eq!(parsed[2], Value::Number(1.5));
        assert_eq!(parsed[3], Value::from("x"));
        assert_eq!(parsed[4], Value::Array(vec![Value::Number(1.0)]));
        assert!(matches!(parsed[5], Value::Object(_)));
    }

    #[test]
    fn deserializes_assignment_shape() {
        let raw = r#"{"isAssignment": true, "editing": false, "formula": ":=1+2", "value": 3}"#;
        let parsed: Value = serde_json::from_str(raw).expect("parse");
        let Value::Assignment(assignment) = parsed else {
            panic!("expected assignment, got {parsed:?}");
        };
        assert!(assignment.is_resolved());
        assert_eq!(assignment.cached(), Value::Number(3.0));
    }

    #[test]
    fn null_and_empty_string_are_absent() {
        assert!(Value::Null.is_empty());
        assert!(Value::from("").is_empty());
        assert!(!Value::from(" ").is_empty());
        assert!(!Value::Number(0.0).is_empty());
    }

    #[test]
    fn numbers_render_without_trailing_zero() {
        assert_eq!(number_to_string(1.0), "1");
        assert_eq!(number_to_string(123.145), "123.145");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(f64::INFINITY), "Infinity");
        assert_eq!(number_to_string(f64::NAN), "NaN");
    }

    #[test]
    fn object_id_requires_non_empty_string() {
        let mut map = BTreeMap::new();
        map.insert("id".to_string(), Value::from("abc"));
        assert_eq!(Value::Object(map.clone()).object_id(), Some("abc"));
        map.insert("id".to_string(), Value::Number(1.0));
        assert_eq!(Value::Object(map).object_id(), None);
    }
}
