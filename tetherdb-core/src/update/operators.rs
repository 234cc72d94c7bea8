// src/update/operators.rs
//! The closed set of update operators and their field-level semantics.
//!
//! Each operator mutates the *clone* the engine hands it; the caller's
//! original document is never touched. The `_id` root segment is immutable:
//! `$set`/`$unset` against it are skipped with a warning instead of failing
//! the whole update.

use serde_json::Value;
use std::cmp::Ordering;

use crate::config::ID_FIELD;
use crate::document::Document;
use crate::error::{Result, TetherDbError};
use crate::log_warn;
use crate::value_utils::{
    canonical_json_string, classify, compare_values, subset_match, values_equal, ValueKind,
};

const EACH_MODIFIER: &str = "$each";

/// Supported update operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOperator {
    Set,
    Unset,
    Inc,
    Mul,
    Min,
    Max,
    Push,
    Pull,
    AddToSet,
}

impl UpdateOperator {
    /// Resolve an operator name; `None` for anything outside the supported
    /// set (the engine raises `InvalidQuery` naming the operator).
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "$set" => Some(UpdateOperator::Set),
            "$unset" => Some(UpdateOperator::Unset),
            "$inc" => Some(UpdateOperator::Inc),
            "$mul" => Some(UpdateOperator::Mul),
            "$min" => Some(UpdateOperator::Min),
            "$max" => Some(UpdateOperator::Max),
            "$push" => Some(UpdateOperator::Push),
            "$pull" => Some(UpdateOperator::Pull),
            "$addToSet" => Some(UpdateOperator::AddToSet),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            UpdateOperator::Set => "$set",
            UpdateOperator::Unset => "$unset",
            UpdateOperator::Inc => "$inc",
            UpdateOperator::Mul => "$mul",
            UpdateOperator::Min => "$min",
            UpdateOperator::Max => "$max",
            UpdateOperator::Push => "$push",
            UpdateOperator::Pull => "$pull",
            UpdateOperator::AddToSet => "$addToSet",
        }
    }

    /// Apply this operator for one field path of its operand mapping.
    pub fn apply(self, document: &mut Document, path: &str, operand: &Value) -> Result<()> {
        match self {
            UpdateOperator::Set => apply_set(document, path, operand),
            UpdateOperator::Unset => apply_unset(document, path),
            UpdateOperator::Inc => apply_arithmetic(document, self, path, operand),
            UpdateOperator::Mul => apply_arithmetic(document, self, path, operand),
            UpdateOperator::Min => apply_min_max(document, self, path, operand),
            UpdateOperator::Max => apply_min_max(document, self, path, operand),
            UpdateOperator::Push => apply_push(document, path, operand),
            UpdateOperator::Pull => apply_pull(document, path, operand),
            UpdateOperator::AddToSet => apply_add_to_set(document, path, operand),
        }
    }
}

fn root_segment(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

fn apply_set(document: &mut Document, path: &str, operand: &Value) -> Result<()> {
    if root_segment(path) == ID_FIELD {
        log_warn!("$set skipped immutable field path '{}'", path);
        return Ok(());
    }
    document.set(path, operand.clone());
    Ok(())
}

fn apply_unset(document: &mut Document, path: &str) -> Result<()> {
    if root_segment(path) == ID_FIELD {
        log_warn!("$unset skipped immutable field path '{}'", path);
        return Ok(());
    }
    document.remove(path);
    Ok(())
}

fn apply_arithmetic(
    document: &mut Document,
    op: UpdateOperator,
    path: &str,
    operand: &Value,
) -> Result<()> {
    let operand_num = match operand {
        Value::Number(n) => n.clone(),
        _ => {
            return Err(TetherDbError::InvalidQuery(format!(
                "{} requires a numeric operand for '{}'",
                op.name(),
                path
            )))
        }
    };

    let current_num = match document.get(path) {
        None => serde_json::Number::from(0),
        Some(Value::Number(n)) => n.clone(),
        Some(other) => {
            return Err(TetherDbError::InvalidQuery(format!(
                "{} target '{}' is not numeric (found {})",
                op.name(),
                path,
                other
            )))
        }
    };

    // Integer arithmetic when both sides are integers, float otherwise.
    let result = match (current_num.as_i64(), operand_num.as_i64()) {
        (Some(current), Some(operand)) => {
            let value = match op {
                UpdateOperator::Inc => current.wrapping_add(operand),
                _ => current.wrapping_mul(operand),
            };
            Value::from(value)
        }
        _ => {
            let current = current_num.as_f64().unwrap_or(0.0);
            let operand = operand_num.as_f64().unwrap_or(0.0);
            let value = match op {
                UpdateOperator::Inc => current + operand,
                _ => current * operand,
            };
            serde_json::Number::from_f64(value)
                .map(Value::Number)
                .ok_or_else(|| {
                    TetherDbError::InvalidQuery(format!(
                        "{} on '{}' produced a non-finite number",
                        op.name(),
                        path
                    ))
                })?
        }
    };

    document.set(path, result);
    Ok(())
}

fn apply_min_max(
    document: &mut Document,
    op: UpdateOperator,
    path: &str,
    operand: &Value,
) -> Result<()> {
    let ordering = match document.get(path) {
        None => {
            document.set(path, operand.clone());
            return Ok(());
        }
        Some(current) => compare_values(current, operand),
    };

    match ordering {
        None => Err(TetherDbError::InvalidQuery(format!(
            "{} operands for '{}' are not comparable",
            op.name(),
            path
        ))),
        Some(ord) => {
            let replace = match op {
                UpdateOperator::Min => ord == Ordering::Greater,
                _ => ord == Ordering::Less,
            };
            if replace {
                document.set(path, operand.clone());
            }
            Ok(())
        }
    }
}

/// Resolve a `$push`/`$addToSet` operand into the elements to append.
///
/// `{$each: [..]}` spreads its list; anything else — including a literal
/// array — is a single element.
fn operand_elements(op: UpdateOperator, path: &str, operand: &Value) -> Result<Vec<Value>> {
    if let ValueKind::Mapping(map) = classify(operand) {
        if map.contains_key(EACH_MODIFIER) {
            if map.len() > 1 {
                return Err(TetherDbError::InvalidQuery(format!(
                    "{} for '{}': {} cannot be combined with other keys",
                    op.name(),
                    path,
                    EACH_MODIFIER
                )));
            }
            return match map.get(EACH_MODIFIER) {
                Some(Value::Array(items)) => Ok(items.clone()),
                _ => Err(TetherDbError::InvalidQuery(format!(
                    "{} for '{}': {} requires an array",
                    op.name(),
                    path,
                    EACH_MODIFIER
                ))),
            };
        }
    }
    Ok(vec![operand.clone()])
}

fn apply_push(document: &mut Document, path: &str, operand: &Value) -> Result<()> {
    let elements = operand_elements(UpdateOperator::Push, path, operand)?;

    let target = match document.get(path) {
        None => elements,
        Some(Value::Array(existing)) => {
            let mut target = existing.clone();
            target.extend(elements);
            target
        }
        Some(_) => {
            return Err(TetherDbError::InvalidQuery(format!(
                "$push target '{}' is not an array",
                path
            )))
        }
    };

    document.set(path, Value::Array(target));
    Ok(())
}

fn apply_pull(document: &mut Document, path: &str, criterion: &Value) -> Result<()> {
    // Missing or non-array field: silent no-op.
    let existing = match document.get(path) {
        Some(Value::Array(items)) => items.clone(),
        _ => return Ok(()),
    };

    let retained: Vec<Value> = existing
        .into_iter()
        .filter(|element| !pull_matches(element, criterion))
        .collect();

    document.set(path, Value::Array(retained));
    Ok(())
}

fn pull_matches(element: &Value, criterion: &Value) -> bool {
    match classify(criterion) {
        // Document-shaped criterion: subset/predicate matching with operator
        // support. A matcher error for this element retains it.
        ValueKind::Mapping(predicate) => {
            subset_match(element, predicate, true).unwrap_or(false)
        }
        // Scalar, date or array criterion: strict equality, no
        // array-containment semantics.
        _ => values_equal(element, criterion, false),
    }
}

fn apply_add_to_set(document: &mut Document, path: &str, operand: &Value) -> Result<()> {
    let elements = operand_elements(UpdateOperator::AddToSet, path, operand)?;

    let mut target = match document.get(path) {
        None => Vec::new(),
        Some(Value::Array(existing)) => existing.clone(),
        Some(_) => {
            return Err(TetherDbError::InvalidQuery(format!(
                "$addToSet target '{}' is not an array",
                path
            )))
        }
    };

    for element in elements {
        if !set_contains(&target, &element) {
            target.push(element);
        }
    }

    document.set(path, Value::Array(target));
    Ok(())
}

/// Membership test for `$addToSet`: structural equality first, canonical
/// string form as fallback for mapping pairs.
fn set_contains(target: &[Value], candidate: &Value) -> bool {
    target.iter().any(|existing| {
        if values_equal(existing, candidate, false) {
            return true;
        }
        matches!(
            (classify(existing), classify(candidate)),
            (ValueKind::Mapping(_), ValueKind::Mapping(_))
        ) && canonical_json_string(existing) == canonical_json_string(candidate)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    #[test]
    fn test_parse_known_and_unknown() {
        assert_eq!(UpdateOperator::parse("$set"), Some(UpdateOperator::Set));
        assert_eq!(UpdateOperator::parse("$addToSet"), Some(UpdateOperator::AddToSet));
        assert_eq!(UpdateOperator::parse("$rename"), None);
        assert_eq!(UpdateOperator::parse("$pop"), None);
    }

    #[test]
    fn test_set_skips_id_root() {
        let mut d = doc(json!({"_id": "d1", "a": 1}));
        UpdateOperator::Set.apply(&mut d, "_id", &json!("other")).unwrap();
        assert_eq!(d.id(), Some("d1"));

        // Dotted path under _id is guarded too
        UpdateOperator::Set.apply(&mut d, "_id.sub", &json!(1)).unwrap();
        assert_eq!(d.get("_id"), Some(&json!("d1")));
    }

    #[test]
    fn test_unset_skips_id_and_removes_leaf() {
        let mut d = doc(json!({"_id": "d1", "a": {"b": 1, "c": 2}}));
        UpdateOperator::Unset.apply(&mut d, "_id", &json!("")).unwrap();
        assert_eq!(d.id(), Some("d1"));

        UpdateOperator::Unset.apply(&mut d, "a.b", &json!("")).unwrap();
        assert_eq!(d.get("a"), Some(&json!({"c": 2})));

        // Missing intermediate: silent no-op
        UpdateOperator::Unset.apply(&mut d, "x.y", &json!("")).unwrap();
    }

    #[test]
    fn test_inc_integer_and_float() {
        let mut d = doc(json!({"n": 1, "f": 1.5}));
        UpdateOperator::Inc.apply(&mut d, "n", &json!(2)).unwrap();
        assert_eq!(d.get("n"), Some(&json!(3)));

        UpdateOperator::Inc.apply(&mut d, "f", &json!(0.5)).unwrap();
        assert_eq!(d.get("f"), Some(&json!(2.0)));
    }

    #[test]
    fn test_inc_rejects_non_numeric() {
        let mut d = doc(json!({"s": "x"}));
        assert!(matches!(
            UpdateOperator::Inc.apply(&mut d, "s", &json!(1)),
            Err(TetherDbError::InvalidQuery(_))
        ));
        assert!(matches!(
            UpdateOperator::Inc.apply(&mut d, "n", &json!("1")),
            Err(TetherDbError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_mul_missing_field_defaults_to_zero() {
        let mut d = doc(json!({}));
        UpdateOperator::Mul.apply(&mut d, "n", &json!(5)).unwrap();
        assert_eq!(d.get("n"), Some(&json!(0)));
    }

    #[test]
    fn test_min_max_semantics() {
        let mut d = doc(json!({"lo": 10, "hi": 10}));
        UpdateOperator::Min.apply(&mut d, "lo", &json!(5)).unwrap();
        assert_eq!(d.get("lo"), Some(&json!(5)));
        UpdateOperator::Min.apply(&mut d, "lo", &json!(7)).unwrap();
        assert_eq!(d.get("lo"), Some(&json!(5)));

        UpdateOperator::Max.apply(&mut d, "hi", &json!(15)).unwrap();
        assert_eq!(d.get("hi"), Some(&json!(15)));
        UpdateOperator::Max.apply(&mut d, "hi", &json!(12)).unwrap();
        assert_eq!(d.get("hi"), Some(&json!(15)));

        // Absent field takes the operand
        UpdateOperator::Min.apply(&mut d, "fresh", &json!(3)).unwrap();
        assert_eq!(d.get("fresh"), Some(&json!(3)));

        // Equal values: no-op, no error
        UpdateOperator::Max.apply(&mut d, "hi", &json!(15)).unwrap();
        assert_eq!(d.get("hi"), Some(&json!(15)));
    }

    #[test]
    fn test_min_max_incomparable_fails() {
        let mut d = doc(json!({"n": 5}));
        assert!(matches!(
            UpdateOperator::Min.apply(&mut d, "n", &json!("5")),
            Err(TetherDbError::InvalidQuery(_))
        ));
        let mut d2 = doc(json!({"o": {"a": 1}}));
        assert!(matches!(
            UpdateOperator::Max.apply(&mut d2, "o", &json!({"a": 2})),
            Err(TetherDbError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_min_max_dates() {
        let early = json!({"$date": "2024-01-01T00:00:00Z"});
        let late = json!({"$date": "2024-06-01T00:00:00Z"});
        let mut d = doc(json!({"seen": late.clone()}));
        UpdateOperator::Min.apply(&mut d, "seen", &early).unwrap();
        assert_eq!(d.get("seen"), Some(&early));
    }

    #[test]
    fn test_push_single_and_each() {
        let mut d = doc(json!({"tags": ["a"]}));
        UpdateOperator::Push.apply(&mut d, "tags", &json!("b")).unwrap();
        assert_eq!(d.get("tags"), Some(&json!(["a", "b"])));

        UpdateOperator::Push
            .apply(&mut d, "tags", &json!({"$each": ["c", "c"]}))
            .unwrap();
        assert_eq!(d.get("tags"), Some(&json!(["a", "b", "c", "c"])));
    }

    #[test]
    fn test_push_missing_field_and_literal_array() {
        let mut d = doc(json!({}));
        UpdateOperator::Push.apply(&mut d, "tags", &json!("x")).unwrap();
        assert_eq!(d.get("tags"), Some(&json!(["x"])));

        // Literal array operand lands as one nested element
        UpdateOperator::Push.apply(&mut d, "tags", &json!([1, 2])).unwrap();
        assert_eq!(d.get("tags"), Some(&json!(["x", [1, 2]])));
    }

    #[test]
    fn test_push_validations() {
        let mut d = doc(json!({"n": 5}));
        assert!(matches!(
            UpdateOperator::Push.apply(&mut d, "n", &json!(1)),
            Err(TetherDbError::InvalidQuery(_))
        ));
        assert!(matches!(
            UpdateOperator::Push.apply(&mut d, "list", &json!({"$each": "not-a-list"})),
            Err(TetherDbError::InvalidQuery(_))
        ));
        assert!(matches!(
            UpdateOperator::Push.apply(&mut d, "list", &json!({"$each": [1], "$slice": 2})),
            Err(TetherDbError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_pull_scalar_and_predicate() {
        let mut d = doc(json!({"scores": [1, 5, 9, 5]}));
        UpdateOperator::Pull.apply(&mut d, "scores", &json!(5)).unwrap();
        assert_eq!(d.get("scores"), Some(&json!([1, 9])));

        let mut d2 = doc(json!({"items": [{"qty": 1}, {"qty": 7}, {"qty": 3}]}));
        UpdateOperator::Pull
            .apply(&mut d2, "items", &json!({"qty": {"$gt": 2}}))
            .unwrap();
        assert_eq!(d2.get("items"), Some(&json!([{"qty": 1}])));
    }

    #[test]
    fn test_pull_missing_or_non_array_is_noop() {
        let mut d = doc(json!({"n": 5}));
        UpdateOperator::Pull.apply(&mut d, "n", &json!(5)).unwrap();
        assert_eq!(d.get("n"), Some(&json!(5)));
        UpdateOperator::Pull.apply(&mut d, "missing", &json!(1)).unwrap();
        assert!(!d.contains("missing"));
    }

    #[test]
    fn test_pull_bad_predicate_retains_elements() {
        // $gte is not in the supported predicate set; elements stay put.
        let mut d = doc(json!({"items": [{"qty": 1}, {"qty": 7}]}));
        UpdateOperator::Pull
            .apply(&mut d, "items", &json!({"qty": {"$gte": 2}}))
            .unwrap();
        assert_eq!(d.get("items"), Some(&json!([{"qty": 1}, {"qty": 7}])));
    }

    #[test]
    fn test_pull_array_criterion_strict_equality() {
        let mut d = doc(json!({"pairs": [[1, 2], [3, 4], 1]}));
        UpdateOperator::Pull.apply(&mut d, "pairs", &json!([1, 2])).unwrap();
        assert_eq!(d.get("pairs"), Some(&json!([[3, 4], 1])));
    }

    #[test]
    fn test_add_to_set_dedup() {
        let mut d = doc(json!({"tags": ["a"]}));
        UpdateOperator::AddToSet.apply(&mut d, "tags", &json!("a")).unwrap();
        assert_eq!(d.get("tags"), Some(&json!(["a"])));

        UpdateOperator::AddToSet.apply(&mut d, "tags", &json!("b")).unwrap();
        assert_eq!(d.get("tags"), Some(&json!(["a", "b"])));

        // $each dedups against existing elements and within the batch
        UpdateOperator::AddToSet
            .apply(&mut d, "tags", &json!({"$each": ["b", "c", "c"]}))
            .unwrap();
        assert_eq!(d.get("tags"), Some(&json!(["a", "b", "c"])));
    }

    #[test]
    fn test_add_to_set_object_key_order_insensitive() {
        let mut d = doc(json!({"refs": [{"a": 1, "b": 2}]}));
        UpdateOperator::AddToSet
            .apply(&mut d, "refs", &json!({"b": 2, "a": 1}))
            .unwrap();
        assert_eq!(d.get("refs").unwrap().as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_add_to_set_missing_field_dedups_input() {
        let mut d = doc(json!({}));
        UpdateOperator::AddToSet
            .apply(&mut d, "tags", &json!({"$each": ["x", "x", "y"]}))
            .unwrap();
        assert_eq!(d.get("tags"), Some(&json!(["x", "y"])));
    }

    #[test]
    fn test_add_to_set_non_array_target_fails() {
        let mut d = doc(json!({"n": 5}));
        assert!(matches!(
            UpdateOperator::AddToSet.apply(&mut d, "n", &json!(1)),
            Err(TetherDbError::InvalidQuery(_))
        ));
    }
}
