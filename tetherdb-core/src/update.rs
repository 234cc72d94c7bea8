// src/update.rs
//! MongoDB-style update expression application.
//!
//! [`apply_operators`] is a stateless transformer: it deep-clones the input
//! document and applies every operator of the update expression to the clone,
//! in the insertion order of the expression's keys. The original document is
//! never mutated.

pub mod operators;

use serde_json::Value;

use crate::document::Document;
use crate::error::{Result, TetherDbError};
use self::operators::UpdateOperator;

/// Apply an update expression to a document, returning the updated copy.
///
/// The expression must be a non-empty mapping of operator name to a mapping
/// of field path -> operand. Unknown operators and semantically invalid
/// operands fail with `InvalidQuery`; a malformed expression shape fails with
/// `InvalidArgument`.
pub fn apply_operators(document: &Document, update: &Value) -> Result<Document> {
    let expression = update.as_object().ok_or_else(|| {
        TetherDbError::InvalidArgument("Update expression must be a JSON object".to_string())
    })?;

    if expression.is_empty() {
        return Err(TetherDbError::InvalidQuery(
            "Update expression has no operators".to_string(),
        ));
    }

    let mut updated = document.clone();

    for (name, operand) in expression {
        let op = UpdateOperator::parse(name).ok_or_else(|| {
            TetherDbError::InvalidQuery(format!("Unsupported update operator: {}", name))
        })?;

        let fields = operand.as_object().ok_or_else(|| {
            TetherDbError::InvalidQuery(format!(
                "{} requires a mapping of field paths to operands",
                op.name()
            ))
        })?;

        for (path, value) in fields {
            op.apply(&mut updated, path, value)?;
        }
    }

    Ok(updated)
}
