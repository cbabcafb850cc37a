//! Literal parser: classifies raw tag strings and coerces them to values.
//!
//! Classification never fails. A string that is not a formula, array,
//! number or boolean literal is simply text.
//!
//! # Coercion order
//!
//! 1. formula (`=...`) — delegated to the caller's evaluator
//! 2. assignment record — its cached value
//! 3. array (`[a, b]`) — split on every comma, elements coerced recursively
//! 4. number (`-?\d+\.?\d*` or `infinity`)
//! 5. boolean (`true` / `false`)
//! 6. anything else — the original string
//!
//! Array splitting is intentionally naive: commas inside nested brackets or
//! parentheses still split, so `[f(a, b)]` yields `["f(a", "b)"]`.

use crate::value::{Value, number_to_string};

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Returns `true` if `value` starts with `=`.
#[must_use]
pub fn is_formula(value: &str) -> bool {
    value.starts_with('=')
}

/// Returns `true` if `value` is an assignment formula (`:=...`).
#[must_use]
pub fn is_assignment_formula(value: &str) -> bool {
    value.starts_with(":=")
}

/// Returns `true` if `value` matches `-?\d+\.?\d*` or is `infinity`
/// (case-insensitive). A lone `.` is not a number.
#[must_use]
pub fn is_number(value: &str) -> bool {
    if value.eq_ignore_ascii_case("infinity") {
        return true;
    }

    let digits = value.strip_prefix('-').unwrap_or(value);
    let int_len = digits.bytes().take_while(u8::is_ascii_digit).count();
    if int_len == 0 {
        return false;
    }

    let rest = &digits[int_len..];
    let rest = rest.strip_prefix('.').unwrap_or(rest);
    rest.bytes().all(|b| b.is_ascii_digit())
}

/// Returns `true` if `value` starts with `[` and ends with `]`.
///
/// Bracket balance is not checked.
#[must_use]
pub fn is_array(value: &str) -> bool {
    value.len() >= 2 && value.starts_with('[') && value.ends_with(']')
}

/// Split an array literal into its untrimmed elements.
///
/// Callers must check [`is_array`] first. `[]` yields no elements.
#[must_use]
pub fn parse_array(value: &str) -> Vec<&str> {
    let inner = &value[1..value.len() - 1];
    if inner.is_empty() {
        return Vec::new();
    }
    inner.split(',').collect()
}

/// Parse a string already known to satisfy [`is_number`].
#[must_use]
pub fn parse_number(value: &str) -> Option<f64> {
    if value.eq_ignore_ascii_case("infinity") {
        return Some(f64::INFINITY);
    }
    if is_number(value) {
        value.parse::<f64>().ok()
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Coercion
// ---------------------------------------------------------------------------

/// Coerce a raw tag string, handing formulas (including formula array
/// elements) to `formula`.
pub fn coerce_with<F>(raw: &str, formula: &mut F) -> Value
where
    F: FnMut(&str) -> Value,
{
    if is_formula(raw) {
        formula(raw)
    } else if is_array(raw) {
        Value::Array(
            parse_array(raw)
                .into_iter()
                .map(|element| coerce_with(element.trim(), formula))
                .collect(),
        )
    } else if let Some(number) = parse_number(raw) {
        Value::Number(number)
    } else if raw == "true" {
        Value::Bool(true)
    } else if raw == "false" {
        Value::Bool(false)
    } else {
        Value::String(raw.to_string())
    }
}

/// Coerce a raw tag string without evaluating formulas; formula text is
/// returned unchanged.
#[must_use]
pub fn coerce(raw: &str) -> Value {
    coerce_with(raw, &mut |formula| Value::String(formula.to_string()))
}

/// Coerce any raw tag value.
///
/// Strings go through [`coerce_with`], assignments yield their cached value
/// and every other value is already typed. An assignment still in string
/// form (`:=...`) has not been evaluated yet and has no value.
pub fn calculate_value<F>(raw: &Value, formula: &mut F) -> Value
where
    F: FnMut(&str) -> Value,
{
    match raw {
        Value::String(s) if is_assignment_formula(s) => Value::Null,
        Value::String(s) => coerce_with(s, formula),
        Value::Assignment(assignment) => assignment.cached(),
        other => other.clone(),
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// Format a computed value for display.
///
/// Arrays format as `[a,b]`, objects with an `id` as the first five
/// characters of that id, other objects as JSON. `null` stays `None`.
#[must_use]
pub fn format_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .map(|item| format_value(item).unwrap_or_default())
                .collect();
            Some(format!("[{}]", parts.join(",")))
        }
        Value::Object(map) => {
            if let Some(id) = value.object_id() {
                return Some(id.chars().take(5).collect());
            }
            Some(serde_json::to_string(map).unwrap_or_else(|_| "{}".to_string()))
        }
        Value::Assignment(assignment) => match assignment.value.as_deref() {
            Some(cached) => format_value(cached),
            None => Some(assignment.formula.clone()),
        },
        Value::Number(n) => Some(number_to_string(*n)),
        Value::Bool(b) => Some(b.to_string()),
        Value::String(s) => Some(s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formula_requires_leading_equals() {
        assert!(is_formula("=1+1"));
        assert!(is_formula("="));
        assert!(!is_formula(" =1"));
        assert!(!is_formula(":=1"));
        assert!(is_assignment_formula(":=1"));
    }

    #[test]
    fn number_grammar() {
        for ok in ["0", "123", "-5", "1.", "123.145", "-0.5", "Infinity", "INFINITY"] {
            assert!(is_number(ok), "{ok} should be a number");
        }
        for bad in [".", "", "-", ".5", "1.2.3", "1e5", "+1", "abc", "1a", " 1"] {
            assert!(!is_number(bad), "{bad} should not be a number");
        }
    }

    #[test]
    fn array_detection_does_not_check_balance() {
        assert!(is_array("[]"));
        assert!(is_array("[[1]"));
        assert!(!is_array("["));
        assert!(!is_array("[1"));
        assert!(!is_array("1]"));
    }

    #[test]
    fn coerces_scalars() {
        assert_eq!(coerce("123.145"), Value::Number(123.145));
        assert_eq!(coerce("true"), Value::Bool(true));
        assert_eq!(coerce("false"), Value::Bool(false));
        assert_eq!(coerce("True"), Value::from("True"));
        assert_eq!(coerce("infinity"), Value::Number(f64::INFINITY));
        assert_eq!(coerce("hello"), Value::from("hello"));
    }

    #[test]
    fn array_split_is_naive() {
        assert_eq!(
            coerce("[test(a, b, c), 1.23, true]"),
            Value::Array(vec![
                Value::from("test(a"),
                Value::from("b"),
                Value::from("c)"),
                Value::Number(1.23),
                Value::Bool(true),
            ])
        );
        assert_eq!(coerce("[]"), Value::Array(vec![]));
        assert_eq!(coerce("[ ]"), Value::Array(vec![Value::from("")]));
    }

    #[test]
    fn formula_elements_are_delegated() {
        let mut seen = Vec::new();
        let value = coerce_with("[=a, 2]", &mut |f| {
            seen.push(f.to_string());
            Value::Number(9.0)
        });
        assert_eq!(seen, vec!["=a".to_string()]);
        assert_eq!(value, Value::Array(vec![Value::Number(9.0), Value::Number(2.0)]));
    }

    #[test]
    fn assignment_yields_cached_value() {
        let assignment = crate::value::Assignment::new(":=1").resolved(Value::Number(1.0));
        let value = calculate_value(&Value::Assignment(assignment), &mut |_| Value::Null);
        assert_eq!(value, Value::Number(1.0));
    }

    #[test]
    fn formats_values() {
        assert_eq!(format_value(&Value::Null), None);
        assert_eq!(format_value(&Value::Number(1.0)).as_deref(), Some("1"));
        assert_eq!(
            format_value(&Value::Array(vec![Value::Number(1.0), Value::Bool(true)])).as_deref(),
            Some("[1,true]")
        );

        let mut bot = std::collections::BTreeMap::new();
        bot.insert("id".to_string(), Value::from("abcdefgh"));
        assert_eq!(format_value(&Value::Object(bot)).as_deref(), Some("abcde"));

        let mut other = std::collections::BTreeMap::new();
        other.insert("k".to_string(), Value::Number(2.0));
        assert_eq!(format_value(&Value::Object(other)).as_deref(), Some(r#"{"k":2.0}"#));
    }
}
