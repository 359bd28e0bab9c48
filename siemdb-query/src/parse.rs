//! JSON-object-to-[`Condition`] parsing: a top-level object becomes an
//! implicit AND of its keys; `$or`/`$and` values must be arrays of
//! nested condition objects; an operator object (`{field: {$op: value}}`)
//! is resolved per known operator, with unknown operators silently
//! dropped rather than failing the parse.

use crate::{Condition, ConditionError};
use serde_json::Value;

pub fn parse(query: &Value) -> Result<Condition, ConditionError> {
    parse_object(query)
}

fn parse_object(value: &Value) -> Result<Condition, ConditionError> {
    let obj = value
        .as_object()
        .ok_or_else(|| ConditionError::Malformed("condition must be a JSON object".into()))?;

    let mut clauses = Vec::with_capacity(obj.len());
    for (key, val) in obj {
        match key.as_str() {
            "$or" => clauses.push(Condition::Or(parse_combinator_array(val)?)),
            "$and" => clauses.push(Condition::And(parse_combinator_array(val)?)),
            field => {
                if let Some(op_obj) = val.as_object() {
                    if let Some(leaf) = parse_operator_leaf(field, op_obj)? {
                        clauses.push(leaf);
                    }
                } else {
                    clauses.push(Condition::Equal {
                        field: field.to_string(),
                        value: val.clone(),
                    });
                }
            }
        }
    }
    Ok(Condition::And(clauses))
}

fn parse_combinator_array(value: &Value) -> Result<Vec<Condition>, ConditionError> {
    let arr = value
        .as_array()
        .ok_or_else(|| ConditionError::Malformed("$and/$or requires an array".into()))?;
    arr.iter().map(parse_object).collect()
}

fn parse_operator_leaf(
    field: &str,
    op_obj: &serde_json::Map<String, Value>,
) -> Result<Option<Condition>, ConditionError> {
    let mut leaves = Vec::new();
    for (op, val) in op_obj {
        match op.as_str() {
            "$eq" => leaves.push(Condition::Equal {
                field: field.to_string(),
                value: val.clone(),
            }),
            "$gt" => leaves.push(Condition::GreaterThan {
                field: field.to_string(),
                value: val.clone(),
            }),
            "$lt" => leaves.push(Condition::LessThan {
                field: field.to_string(),
                value: val.clone(),
            }),
            "$like" => {
                let pattern = val
                    .as_str()
                    .ok_or_else(|| ConditionError::Malformed("$like requires a string pattern".into()))?;
                leaves.push(Condition::Like {
                    field: field.to_string(),
                    pattern: pattern.to_string(),
                });
            }
            "$in" => {
                let arr = val
                    .as_array()
                    .ok_or_else(|| ConditionError::Malformed("$in requires an array".into()))?;
                leaves.push(Condition::In {
                    field: field.to_string(),
                    values: arr.clone(),
                });
            }
            // unknown operators fall through unmatched and are silently dropped.
            _ => {}
        }
    }
    match leaves.len() {
        0 => Ok(None),
        1 => Ok(Some(leaves.remove(0))),
        _ => Ok(Some(Condition::And(leaves))),
    }
}
