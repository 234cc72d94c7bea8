// src/value_utils.rs
//! Value comparison and traversal primitives shared by the query matcher and
//! the update engine.
//!
//! Every behavioral decision in the matcher and the update operators starts
//! with [`classify`]: a value is a scalar, a tagged date, an array or a plain
//! mapping, decided once per inspection instead of scattered shape checks.
//!
//! Dates travel as tagged objects `{"$date": "<RFC 3339>"}` so they survive
//! JSON round-trips through the blob store; [`values_equal`] and
//! [`compare_values`] compare them by millisecond instant.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::error::{Result, TetherDbError};

/// Key marking a tagged date object.
pub const DATE_TAG: &str = "$date";

/// Shape of a JSON value as seen by the matcher and the update engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind<'a> {
    /// null, bool, number or string
    Scalar,
    /// `{"$date": "..."}` resolved to an instant
    Date(DateTime<Utc>),
    Array(&'a [Value]),
    /// Plain mapping (not date-tagged); may be a nested document or an
    /// operator sub-document depending on context
    Mapping(&'a Map<String, Value>),
}

/// Classify a value once; all call sites match exhaustively on the result.
pub fn classify(value: &Value) -> ValueKind<'_> {
    match value {
        Value::Array(items) => ValueKind::Array(items),
        Value::Object(map) => match tagged_date_from_map(map) {
            Some(instant) => ValueKind::Date(instant),
            None => ValueKind::Mapping(map),
        },
        _ => ValueKind::Scalar,
    }
}

/// Parse a value as a tagged date, if it is one.
pub fn as_tagged_date(value: &Value) -> Option<DateTime<Utc>> {
    value.as_object().and_then(tagged_date_from_map)
}

fn tagged_date_from_map(map: &Map<String, Value>) -> Option<DateTime<Utc>> {
    if map.len() != 1 {
        return None;
    }
    let raw = map.get(DATE_TAG)?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Build the tagged JSON representation of a date.
pub fn tag_date(instant: DateTime<Utc>) -> Value {
    let mut map = Map::new();
    map.insert(DATE_TAG.to_string(), Value::String(instant.to_rfc3339()));
    Value::Object(map)
}

/// Deep structural equality.
///
/// Dates compare by millisecond instant regardless of their string
/// representation. Numbers compare numerically (`1` equals `1.0`). When
/// `array_contains_scalar` is set and `a` is an array while `b` is not,
/// the array matches if any element is deep-equal to `b` (MongoDB
/// array-field-equals-scalar semantics).
pub fn values_equal(a: &Value, b: &Value, array_contains_scalar: bool) -> bool {
    if let (Some(da), Some(db)) = (as_tagged_date(a), as_tagged_date(b)) {
        return da.timestamp_millis() == db.timestamp_millis();
    }

    match (a, b) {
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys.iter())
                    .all(|(x, y)| values_equal(x, y, false))
        }
        (Value::Array(xs), _) if array_contains_scalar => {
            xs.iter().any(|x| values_equal(x, b, false))
        }
        (Value::Object(ma), Value::Object(mb)) => {
            ma.len() == mb.len()
                && ma.iter().all(|(key, va)| {
                    mb.get(key)
                        .map(|vb| values_equal(va, vb, false))
                        .unwrap_or(false)
                })
        }
        (Value::Number(na), Value::Number(nb)) => match (na.as_f64(), nb.as_f64()) {
            (Some(fa), Some(fb)) => fa == fb,
            _ => na == nb,
        },
        _ => a == b,
    }
}

/// Ordering between two values.
///
/// Numbers compare numerically, strings lexicographically, dates by instant,
/// booleans with `false < true`. Incompatible types return `None`; callers
/// decide policy (the matcher treats `None` as no-match, `$min`/`$max`
/// reject it as an invalid operand pair).
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(da), Some(db)) = (as_tagged_date(a), as_tagged_date(b)) {
        return Some(da.timestamp_millis().cmp(&db.timestamp_millis()));
    }

    match (a, b) {
        (Value::Number(na), Value::Number(nb)) => {
            let fa = na.as_f64()?;
            let fb = nb.as_f64()?;
            fa.partial_cmp(&fb)
        }
        (Value::String(sa), Value::String(sb)) => Some(sa.cmp(sb)),
        (Value::Bool(ba), Value::Bool(bb)) => Some(ba.cmp(bb)),
        _ => None,
    }
}

/// Predicate matching for `$pull`: a document-shaped predicate matches an
/// element if every predicate key matches the corresponding element value,
/// recursively.
///
/// When `operator_support` is set, a predicate value that is a mapping whose
/// keys all start with `$` is treated as a comparison sub-document
/// (`$eq`/`$gt`/`$lt`); an unsupported operator name is an `InvalidQuery`
/// error.
pub fn subset_match(
    element: &Value,
    predicate: &Map<String, Value>,
    operator_support: bool,
) -> Result<bool> {
    let element_map = match classify(element) {
        ValueKind::Mapping(map) => map,
        _ => return Ok(false),
    };

    for (key, expected) in predicate {
        let actual = match element_map.get(key) {
            Some(value) => value,
            None => return Ok(false),
        };

        let matched = match classify(expected) {
            ValueKind::Mapping(map) if operator_support && is_operator_mapping(map) => {
                comparison_subdocument_matches(actual, map)?
            }
            ValueKind::Mapping(map) => subset_match(actual, map, operator_support)?,
            _ => values_equal(actual, expected, false),
        };

        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn is_operator_mapping(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|key| key.starts_with('$'))
}

fn comparison_subdocument_matches(actual: &Value, ops: &Map<String, Value>) -> Result<bool> {
    for (name, operand) in ops {
        let matched = match name.as_str() {
            "$eq" => values_equal(actual, operand, false),
            "$gt" => compare_values(actual, operand) == Some(Ordering::Greater),
            "$lt" => compare_values(actual, operand) == Some(Ordering::Less),
            _ => {
                return Err(TetherDbError::InvalidQuery(format!(
                    "Unsupported operator in predicate: {}",
                    name
                )))
            }
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

// ============================================================================
// DOT-PATH TRAVERSAL
// ============================================================================

/// Resolve a dot-path against a value.
///
/// Numeric path segments index into arrays; any non-traversable intermediate
/// resolves to `None`.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use tetherdb_core::value_utils::get_nested_value;
///
/// let doc = json!({"address": {"city": "Vienna"}, "tags": ["a", "b"]});
/// assert_eq!(get_nested_value(&doc, "address.city"), Some(&json!("Vienna")));
/// assert_eq!(get_nested_value(&doc, "tags.1"), Some(&json!("b")));
/// assert_eq!(get_nested_value(&doc, "address.zip"), None);
/// ```
pub fn get_nested_value<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if !path.contains('.') {
        return root.get(path);
    }

    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Assign a value at a dot-path, creating intermediate mappings as needed.
///
/// A numeric segment indexes into the current container when that container
/// is already an array (padding with nulls past the end); otherwise a mapping
/// key is created. Scalar intermediates are replaced by mappings.
pub fn set_nested_value(root: &mut Value, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    set_at_segments(root, &segments, value);
}

fn set_at_segments(current: &mut Value, segments: &[&str], value: Value) {
    let (head, rest) = match segments.split_first() {
        Some(parts) => parts,
        None => return,
    };

    if rest.is_empty() {
        match current {
            Value::Object(map) => {
                map.insert(head.to_string(), value);
            }
            Value::Array(items) => {
                if let Ok(index) = head.parse::<usize>() {
                    if index >= items.len() {
                        items.resize(index + 1, Value::Null);
                    }
                    items[index] = value;
                }
            }
            _ => {
                let mut map = Map::new();
                map.insert(head.to_string(), value);
                *current = Value::Object(map);
            }
        }
        return;
    }

    match current {
        Value::Object(map) => {
            let next = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            set_at_segments(next, rest, value);
        }
        Value::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                if index >= items.len() {
                    items.resize(index + 1, Value::Null);
                }
                set_at_segments(&mut items[index], rest, value);
            }
        }
        _ => {
            *current = Value::Object(Map::new());
            set_at_segments(current, segments, value);
        }
    }
}

/// Delete the leaf a dot-path points at.
///
/// Removing a mapping key drops the entry; removing an array index writes a
/// `null` hole so list length is preserved. Missing intermediates are a
/// silent no-op (`None`).
pub fn remove_nested_value(root: &mut Value, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split('.').collect();
    remove_at_segments(root, &segments)
}

fn remove_at_segments(current: &mut Value, segments: &[&str]) -> Option<Value> {
    let (head, rest) = segments.split_first()?;

    if rest.is_empty() {
        return match current {
            Value::Object(map) => map.shift_remove(*head),
            Value::Array(items) => {
                let index = head.parse::<usize>().ok()?;
                if index < items.len() {
                    Some(std::mem::replace(&mut items[index], Value::Null))
                } else {
                    None
                }
            }
            _ => None,
        };
    }

    match current {
        Value::Object(map) => remove_at_segments(map.get_mut(*head)?, rest),
        Value::Array(items) => {
            let index = head.parse::<usize>().ok()?;
            remove_at_segments(items.get_mut(index)?, rest)
        }
        _ => None,
    }
}

/// Canonical string form of a value with object keys sorted, so logically
/// equal mappings built in different key orders collapse to one
/// representation. Fallback comparator for `$addToSet` deduplication.
pub fn canonical_json_string(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by(|a, b| a.0.cmp(b.0));

            let inner: Vec<String> = pairs
                .iter()
                .map(|(key, val)| {
                    let key_json = serde_json::to_string(key)
                        .unwrap_or_else(|_| format!("\"{}\"", key));
                    format!("{}:{}", key_json, canonical_json_string(val))
                })
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_json_string).collect();
            format!("[{}]", inner.join(","))
        }
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn date(ms: i64) -> Value {
        tag_date(Utc.timestamp_millis_opt(ms).unwrap())
    }

    #[test]
    fn test_classify_shapes() {
        assert_eq!(classify(&json!(1)), ValueKind::Scalar);
        assert_eq!(classify(&json!("x")), ValueKind::Scalar);
        assert_eq!(classify(&json!(null)), ValueKind::Scalar);
        assert!(matches!(classify(&json!([1, 2])), ValueKind::Array(_)));
        assert!(matches!(classify(&json!({"a": 1})), ValueKind::Mapping(_)));
        assert!(matches!(classify(&date(1000)), ValueKind::Date(_)));
        // A mapping with $date plus other keys is a plain mapping
        assert!(matches!(
            classify(&json!({"$date": "2024-01-01T00:00:00Z", "extra": 1})),
            ValueKind::Mapping(_)
        ));
    }

    #[test]
    fn test_values_equal_primitives() {
        assert!(values_equal(&json!(5), &json!(5), false));
        assert!(values_equal(&json!(5), &json!(5.0), false));
        assert!(values_equal(&json!("a"), &json!("a"), false));
        assert!(!values_equal(&json!("a"), &json!("b"), false));
        assert!(!values_equal(&json!(1), &json!("1"), false));
        assert!(values_equal(&json!(null), &json!(null), false));
    }

    #[test]
    fn test_values_equal_deep_structures() {
        assert!(values_equal(
            &json!({"a": {"b": [1, 2]}}),
            &json!({"a": {"b": [1, 2]}}),
            false
        ));
        assert!(!values_equal(
            &json!({"a": {"b": [1, 2]}}),
            &json!({"a": {"b": [2, 1]}}),
            false
        ));
        // Key order does not matter for mappings
        assert!(values_equal(
            &json!({"x": 1, "y": 2}),
            &json!({"y": 2, "x": 1}),
            false
        ));
    }

    #[test]
    fn test_values_equal_array_contains_scalar() {
        let arr = json!(["a", "b"]);
        assert!(values_equal(&arr, &json!("a"), true));
        assert!(!values_equal(&arr, &json!("c"), true));
        // Flag off: array vs scalar is plain inequality
        assert!(!values_equal(&arr, &json!("a"), false));
        // Array vs array compares element-wise even with the flag on
        assert!(values_equal(&arr, &json!(["a", "b"]), true));
        assert!(!values_equal(&arr, &json!(["b", "a"]), true));
    }

    #[test]
    fn test_values_equal_dates_by_instant() {
        let a = json!({"$date": "2024-03-01T12:00:00+00:00"});
        let b = json!({"$date": "2024-03-01T13:00:00+01:00"});
        assert!(values_equal(&a, &b, false));
        assert!(!values_equal(&a, &date(0), false));
        // Array containing a date matches that date as a scalar
        let arr = json!([{"$date": "2024-03-01T12:00:00Z"}]);
        assert!(values_equal(&arr, &a, true));
    }

    #[test]
    fn test_compare_values_numbers_strings_dates() {
        assert_eq!(compare_values(&json!(10), &json!(5)), Some(Ordering::Greater));
        assert_eq!(compare_values(&json!(2.5), &json!(3)), Some(Ordering::Less));
        assert_eq!(
            compare_values(&json!("apple"), &json!("banana")),
            Some(Ordering::Less)
        );
        assert_eq!(compare_values(&date(2000), &date(1000)), Some(Ordering::Greater));
        assert_eq!(compare_values(&date(1000), &date(1000)), Some(Ordering::Equal));
    }

    #[test]
    fn test_compare_values_incompatible_is_none() {
        assert_eq!(compare_values(&json!("5"), &json!(5)), None);
        assert_eq!(compare_values(&json!([1]), &json!(1)), None);
        assert_eq!(compare_values(&json!({"a": 1}), &json!({"a": 1})), None);
        assert_eq!(compare_values(&date(0), &json!(0)), None);
    }

    #[test]
    fn test_subset_match_literal_and_nested() {
        let element = json!({"sku": "a1", "qty": 3, "dims": {"w": 2, "h": 5}});
        let map = |v: Value| v.as_object().unwrap().clone();

        assert!(subset_match(&element, &map(json!({"sku": "a1"})), true).unwrap());
        assert!(subset_match(&element, &map(json!({"sku": "a1", "qty": 3})), true).unwrap());
        assert!(!subset_match(&element, &map(json!({"sku": "a2"})), true).unwrap());
        assert!(!subset_match(&element, &map(json!({"missing": 1})), true).unwrap());
        assert!(subset_match(&element, &map(json!({"dims": {"w": 2}})), true).unwrap());
    }

    #[test]
    fn test_subset_match_operators() {
        let element = json!({"qty": 3});
        let map = |v: Value| v.as_object().unwrap().clone();

        assert!(subset_match(&element, &map(json!({"qty": {"$gt": 2}})), true).unwrap());
        assert!(!subset_match(&element, &map(json!({"qty": {"$lt": 2}})), true).unwrap());
        assert!(subset_match(&element, &map(json!({"qty": {"$eq": 3}})), true).unwrap());

        let err = subset_match(&element, &map(json!({"qty": {"$gte": 2}})), true).unwrap_err();
        assert!(err.to_string().contains("$gte"));

        // Without operator support the sub-document is a literal predicate
        assert!(!subset_match(&element, &map(json!({"qty": {"$gt": 2}})), false).unwrap());
    }

    #[test]
    fn test_subset_match_non_mapping_element() {
        let map = |v: Value| v.as_object().unwrap().clone();
        assert!(!subset_match(&json!(42), &map(json!({"a": 1})), true).unwrap());
        assert!(!subset_match(&json!([1, 2]), &map(json!({"a": 1})), true).unwrap());
    }

    #[test]
    fn test_get_nested_value() {
        let doc = json!({
            "a": {"b": {"c": 42}},
            "items": [{"name": "first"}, {"name": "second"}]
        });
        assert_eq!(get_nested_value(&doc, "a.b.c"), Some(&json!(42)));
        assert_eq!(get_nested_value(&doc, "items.1.name"), Some(&json!("second")));
        assert_eq!(get_nested_value(&doc, "items.9.name"), None);
        assert_eq!(get_nested_value(&doc, "a.b.c.d"), None);
        assert_eq!(get_nested_value(&doc, "a.x"), None);
    }

    #[test]
    fn test_set_nested_value_creates_intermediates() {
        let mut doc = json!({"name": "x"});
        set_nested_value(&mut doc, "address.city", json!("Graz"));
        assert_eq!(doc["address"]["city"], "Graz");

        set_nested_value(&mut doc, "a.b.c", json!(1));
        assert_eq!(doc["a"]["b"]["c"], 1);
    }

    #[test]
    fn test_set_nested_value_array_index() {
        let mut doc = json!({"items": [{"qty": 1}, {"qty": 2}]});
        set_nested_value(&mut doc, "items.1.qty", json!(9));
        assert_eq!(doc["items"][1]["qty"], 9);

        // Index past the end pads with nulls
        set_nested_value(&mut doc, "items.3", json!("tail"));
        assert_eq!(doc["items"][2], Value::Null);
        assert_eq!(doc["items"][3], "tail");
    }

    #[test]
    fn test_set_nested_value_replaces_scalar_intermediate() {
        let mut doc = json!({"a": 5});
        set_nested_value(&mut doc, "a.b", json!(1));
        assert_eq!(doc["a"]["b"], 1);
    }

    #[test]
    fn test_remove_nested_value_mapping_key() {
        let mut doc = json!({"a": {"b": 1, "c": 2}});
        assert_eq!(remove_nested_value(&mut doc, "a.b"), Some(json!(1)));
        assert_eq!(doc, json!({"a": {"c": 2}}));
        // Missing path is a silent no-op
        assert_eq!(remove_nested_value(&mut doc, "a.x.y"), None);
        assert_eq!(doc, json!({"a": {"c": 2}}));
    }

    #[test]
    fn test_remove_nested_value_array_hole() {
        let mut doc = json!({"items": [1, 2, 3]});
        assert_eq!(remove_nested_value(&mut doc, "items.1"), Some(json!(2)));
        // Length preserved, hole left behind
        assert_eq!(doc["items"], json!([1, null, 3]));
    }

    #[test]
    fn test_canonical_json_string_key_order() {
        let a = json!({"a": 1, "b": {"y": 2, "x": 3}});
        let b = json!({"b": {"x": 3, "y": 2}, "a": 1});
        assert_eq!(canonical_json_string(&a), canonical_json_string(&b));
        assert_eq!(canonical_json_string(&json!(42)), "42");
        assert_eq!(canonical_json_string(&json!([])), "[]");
    }
}
