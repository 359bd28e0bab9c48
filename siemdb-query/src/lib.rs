//! Query-condition language.
//!
//! Parses the JSON filter dialect used by `find`/`delete` requests into a
//! [`Condition`] tree and evaluates it against a document's field map.
//! Unknown operators are silently dropped rather than rejected, and
//! multiple top-level fields combine as an implicit AND.

use serde_json::Value;

mod like;
mod parse;

pub use parse::parse;

/// A boolean predicate tree: comparison leaves and AND/OR internal nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equal { field: String, value: Value },
    GreaterThan { field: String, value: Value },
    LessThan { field: String, value: Value },
    Like { field: String, pattern: String },
    In { field: String, values: Vec<Value> },
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConditionError {
    #[error("malformed condition: {0}")]
    Malformed(String),
    #[error("malformed condition: invalid JSON: {0}")]
    InvalidJson(String),
}

impl Condition {
    /// Parses a condition from raw JSON text. Unbalanced brackets or
    /// otherwise invalid JSON surface as [`ConditionError::InvalidJson`].
    pub fn parse_str(text: &str) -> Result<Condition, ConditionError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ConditionError::InvalidJson(e.to_string()))?;
        parse(&value)
    }

    /// Evaluates this condition against a document's field map. A leaf
    /// whose field is absent from `fields` evaluates to `false`.
    pub fn matches(&self, fields: &serde_json::Map<String, Value>) -> bool {
        match self {
            Condition::Equal { field, value } => match fields.get(field) {
                Some(stored) => value_to_string(stored) == value_to_string(value),
                None => false,
            },
            Condition::GreaterThan { field, value } => {
                compare_ordered(fields, field, value, Ordering::Greater)
            }
            Condition::LessThan { field, value } => {
                compare_ordered(fields, field, value, Ordering::Less)
            }
            Condition::Like { field, pattern } => match fields.get(field) {
                Some(stored) => like::matches(pattern, &value_to_string(stored)),
                None => false,
            },
            Condition::In { field, values } => match fields.get(field) {
                Some(stored) => {
                    let stored_s = value_to_string(stored);
                    values.iter().any(|v| value_to_string(v) == stored_s)
                }
                None => false,
            },
            Condition::And(children) => children.iter().all(|c| c.matches(fields)),
            Condition::Or(children) => children.iter().any(|c| c.matches(fields)),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Ordering {
    Greater,
    Less,
}

/// `$gt`/`$lt` comparison: try numeric comparison first; on parse
/// failure, apply the `timestamp` right-padding special case;
/// otherwise fall back to string comparison.
fn compare_ordered(
    fields: &serde_json::Map<String, Value>,
    field: &str,
    target: &Value,
    direction: Ordering,
) -> bool {
    let stored = match fields.get(field) {
        Some(v) => v,
        None => return false,
    };
    let stored_s = value_to_string(stored);
    let target_s = value_to_string(target);

    if let (Ok(a), Ok(b)) = (stored_s.parse::<f64>(), target_s.parse::<f64>()) {
        return match direction {
            Ordering::Greater => a > b,
            Ordering::Less => a < b,
        };
    }

    if field == "timestamp" {
        let padded_target = match direction {
            Ordering::Greater => pad_timestamp(&target_s, "T00:00:00Z"),
            Ordering::Less => pad_timestamp(&target_s, "T23:59:59Z"),
        };
        return match direction {
            Ordering::Greater => stored_s > padded_target,
            Ordering::Less => stored_s < padded_target,
        };
    }

    match direction {
        Ordering::Greater => stored_s > target_s,
        Ordering::Less => stored_s < target_s,
    }
}

/// `YYYY-MM-DD` (10 bytes, no time component) is expanded with `suffix`;
/// anything else (already carrying a time component, or not date-shaped)
/// passes through unchanged.
fn pad_timestamp(s: &str, suffix: &str) -> String {
    let bytes = s.as_bytes();
    let looks_like_date = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes.iter().enumerate().all(|(i, b)| {
            if i == 4 || i == 7 {
                true
            } else {
                b.is_ascii_digit()
            }
        });
    if looks_like_date {
        format!("{}{}", s, suffix)
    } else {
        s.to_string()
    }
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(v: Value) -> serde_json::Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn equal_matches_on_exact_value() {
        let c = Condition::parse_str(r#"{"name":"alice"}"#).unwrap();
        assert!(c.matches(&fields(json!({"name": "alice"}))));
        assert!(!c.matches(&fields(json!({"name": "bob"}))));
    }

    #[test]
    fn missing_field_is_false() {
        let c = Condition::parse_str(r#"{"name":"alice"}"#).unwrap();
        assert!(!c.matches(&fields(json!({"age": 10}))));
    }

    #[test]
    fn multiple_top_level_fields_are_implicit_and() {
        let c = Condition::parse_str(r#"{"name":"alice","age":30}"#).unwrap();
        assert!(c.matches(&fields(json!({"name": "alice", "age": 30}))));
        assert!(!c.matches(&fields(json!({"name": "alice", "age": 31}))));
    }

    #[test]
    fn gt_numeric_comparison() {
        let c = Condition::parse_str(r#"{"age":{"$gt":"15"}}"#).unwrap();
        assert!(c.matches(&fields(json!({"age": 20}))));
        assert!(!c.matches(&fields(json!({"age": 10}))));
    }

    #[test]
    fn like_wildcards_anchor_both_ends() {
        let c = Condition::parse_str(r#"{"name":{"$like":"ali%"}}"#).unwrap();
        assert!(c.matches(&fields(json!({"name": "alice"}))));
        assert!(c.matches(&fields(json!({"name": "alicia"}))));
        assert!(!c.matches(&fields(json!({"name": "bob"}))));
    }

    #[test]
    fn in_checks_membership() {
        let c = Condition::parse_str(r#"{"status":{"$in":["open","pending"]}}"#).unwrap();
        assert!(c.matches(&fields(json!({"status": "open"}))));
        assert!(!c.matches(&fields(json!({"status": "closed"}))));
    }

    #[test]
    fn or_combinator() {
        let c = Condition::parse_str(r#"{"$or":[{"name":"alice"},{"name":"bob"}]}"#).unwrap();
        assert!(c.matches(&fields(json!({"name": "bob"}))));
        assert!(!c.matches(&fields(json!({"name": "carl"}))));
    }

    #[test]
    fn unknown_operator_is_silently_dropped_not_an_error() {
        let c = Condition::parse_str(r#"{"age":{"$unknownop":5}}"#).unwrap();
        // the leaf vanishes, leaving a vacuously-true AND
        assert!(c.matches(&fields(json!({"age": 5}))));
        assert!(c.matches(&fields(json!({}))));
    }

    #[test]
    fn unbalanced_brackets_is_malformed() {
        let err = Condition::parse_str(r#"{"age":{"$gt":"15""#).unwrap_err();
        matches!(err, ConditionError::InvalidJson(_));
    }

    #[test]
    fn timestamp_gt_pads_bare_date_to_start_of_day() {
        let c = Condition::parse_str(r#"{"timestamp":{"$gt":"2024-01-01"}}"#).unwrap();
        assert!(c.matches(&fields(json!({"timestamp": "2024-01-01T12:00:00Z"}))));
        assert!(!c.matches(&fields(json!({"timestamp": "2023-12-31T23:59:59Z"}))));
    }
}
