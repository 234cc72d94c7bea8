// src/query/operators.rs
//! The closed set of query operators.
//!
//! Operators are enumerated as sum types and dispatched with exhaustive
//! `match`es, so adding an operator is a compile-time-checked change. Unknown
//! operator names in caller input still surface as `InvalidQuery` at the
//! parse boundary.

use serde_json::Value;
use std::cmp::Ordering;

use crate::value_utils::{compare_values, values_equal};

/// Field-level comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    Eq,
    Gt,
    Lt,
}

impl ComparisonOperator {
    /// Resolve an operator name; `None` for anything outside the supported
    /// set (the caller raises `InvalidQuery` naming the operator).
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "$eq" => Some(ComparisonOperator::Eq),
            "$gt" => Some(ComparisonOperator::Gt),
            "$lt" => Some(ComparisonOperator::Lt),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ComparisonOperator::Eq => "$eq",
            ComparisonOperator::Gt => "$gt",
            ComparisonOperator::Lt => "$lt",
        }
    }

    /// Evaluate the operator against a resolved field value. A missing field
    /// never matches.
    ///
    /// `$eq` uses deep equality with array-contains-scalar semantics;
    /// `$gt`/`$lt` use ordering comparison, treating incompatible types as
    /// no-match.
    pub fn matches(self, doc_value: Option<&Value>, operand: &Value) -> bool {
        let value = match doc_value {
            Some(value) => value,
            None => return false,
        };
        match self {
            ComparisonOperator::Eq => values_equal(value, operand, true),
            ComparisonOperator::Gt => compare_values(value, operand) == Some(Ordering::Greater),
            ComparisonOperator::Lt => compare_values(value, operand) == Some(Ordering::Less),
        }
    }
}

/// Top-level logical operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
}

impl LogicalOperator {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "$and" => Some(LogicalOperator::And),
            "$or" => Some(LogicalOperator::Or),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            LogicalOperator::And => "$and",
            LogicalOperator::Or => "$or",
        }
    }

    /// Result for an empty condition list: `$and` of nothing is vacuously
    /// true, `$or` of nothing matches nothing.
    pub const fn empty_result(self) -> bool {
        match self {
            LogicalOperator::And => true,
            LogicalOperator::Or => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_comparison_operators() {
        assert_eq!(ComparisonOperator::parse("$eq"), Some(ComparisonOperator::Eq));
        assert_eq!(ComparisonOperator::parse("$gt"), Some(ComparisonOperator::Gt));
        assert_eq!(ComparisonOperator::parse("$lt"), Some(ComparisonOperator::Lt));
        assert_eq!(ComparisonOperator::parse("$ne"), None);
        assert_eq!(ComparisonOperator::parse("$gte"), None);
        assert_eq!(ComparisonOperator::parse("eq"), None);
    }

    #[test]
    fn test_eq_array_contains_scalar() {
        let tags = json!(["a", "b"]);
        assert!(ComparisonOperator::Eq.matches(Some(&tags), &json!("a")));
        assert!(!ComparisonOperator::Eq.matches(Some(&tags), &json!("c")));
    }

    #[test]
    fn test_ordering_operators() {
        assert!(ComparisonOperator::Gt.matches(Some(&json!(5)), &json!(3)));
        assert!(!ComparisonOperator::Gt.matches(Some(&json!(3)), &json!(3)));
        assert!(ComparisonOperator::Lt.matches(Some(&json!("a")), &json!("b")));
        // Incompatible types never match
        assert!(!ComparisonOperator::Gt.matches(Some(&json!("5")), &json!(3)));
        // Missing field never matches
        assert!(!ComparisonOperator::Lt.matches(None, &json!(3)));
        assert!(!ComparisonOperator::Eq.matches(None, &json!(3)));
    }

    #[test]
    fn test_logical_empty_results() {
        assert!(LogicalOperator::And.empty_result());
        assert!(!LogicalOperator::Or.empty_result());
    }
}
