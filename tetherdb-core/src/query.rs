// src/query.rs
//! MongoDB-style query matching.
//!
//! A query is a JSON mapping. Non-`$` keys are dot-path field conditions and
//! are implicitly ANDed; `$and`/`$or` take lists of nested queries. A field
//! condition is either a literal (implicit equality, with
//! array-contains-scalar semantics) or an operator sub-document built from
//! the closed set in [`operators`].
//!
//! Matching is pure recursive evaluation: no document is ever mutated, and
//! semantic errors (unsupported operators) propagate to the caller instead of
//! being swallowed as non-matches.

pub mod operators;

use serde_json::Value;

use crate::document::Document;
use crate::error::{Result, TetherDbError};
use crate::value_utils::{classify, values_equal, ValueKind};
use self::operators::{ComparisonOperator, LogicalOperator};

/// Evaluate a query against a single document.
pub fn matches_document(document: &Document, query: &Value) -> Result<bool> {
    let query_map = query.as_object().ok_or_else(|| {
        TetherDbError::InvalidArgument("Query must be a JSON object".to_string())
    })?;

    for (key, condition) in query_map {
        let matched = if let Some(logical) = LogicalOperator::parse(key) {
            logical_matches(document, logical, condition)?
        } else if key.starts_with('$') {
            return Err(TetherDbError::InvalidQuery(format!(
                "Unsupported query operator: {}",
                key
            )));
        } else {
            field_matches(document.get(key), condition)?
        };

        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Evaluate a query against a slice of documents, preserving order.
pub fn filter_documents(documents: &[Document], query: &Value) -> Result<Vec<Document>> {
    let mut matching = Vec::new();
    for document in documents {
        if matches_document(document, query)? {
            matching.push(document.clone());
        }
    }
    Ok(matching)
}

fn logical_matches(document: &Document, logical: LogicalOperator, condition: &Value) -> Result<bool> {
    let branches = condition.as_array().ok_or_else(|| {
        TetherDbError::InvalidQuery(format!("{} requires a list of queries", logical.name()))
    })?;

    if branches.is_empty() {
        return Ok(logical.empty_result());
    }

    match logical {
        LogicalOperator::And => {
            for branch in branches {
                if !matches_document(document, branch)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        LogicalOperator::Or => {
            for branch in branches {
                if matches_document(document, branch)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}

fn field_matches(doc_value: Option<&Value>, condition: &Value) -> Result<bool> {
    match classify(condition) {
        // Plain mapping (not a date): operator sub-document. Every key must
        // be a supported operator; this is validated per evaluation before
        // any operator runs.
        ValueKind::Mapping(ops) => {
            let mut parsed = Vec::with_capacity(ops.len());
            for (name, operand) in ops {
                let op = ComparisonOperator::parse(name).ok_or_else(|| {
                    TetherDbError::InvalidQuery(format!("Unsupported query operator: {}", name))
                })?;
                parsed.push((op, operand));
            }
            Ok(parsed.iter().all(|(op, operand)| op.matches(doc_value, operand)))
        }
        // Literal (scalar, array or date): implicit equality
        _ => Ok(doc_value
            .map(|value| values_equal(value, condition, true))
            .unwrap_or(false)),
    }
}

/// Thin wrapper that carries a query expression around as a value.
#[derive(Debug, Clone)]
pub struct Query {
    json: Value,
}

impl Query {
    /// Empty query; matches every document.
    pub fn new() -> Self {
        Query {
            json: Value::Object(serde_json::Map::new()),
        }
    }

    /// Wrap a JSON query expression. The expression must be an object;
    /// operator validation happens at match time.
    pub fn from_value(json: Value) -> Result<Self> {
        if !json.is_object() {
            return Err(TetherDbError::InvalidArgument(
                "Query must be a JSON object".to_string(),
            ));
        }
        Ok(Query { json })
    }

    /// Evaluate against a document.
    pub fn matches(&self, document: &Document) -> Result<bool> {
        matches_document(document, &self.json)
    }

    pub fn as_value(&self) -> &Value {
        &self.json
    }

    pub fn into_value(self) -> Value {
        self.json
    }
}

impl Default for Query {
    fn default() -> Self {
        Self::new()
    }
}
