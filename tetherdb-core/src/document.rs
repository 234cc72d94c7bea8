// src/document.rs
//! Document type: an insertion-ordered mapping of field names to JSON values.
//!
//! Identity lives in the `_id` field (a string once persisted; generated as a
//! UUID on insert when absent). Documents are treated as immutable inputs by
//! the update engine — operators run on a clone, never on the original.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::ID_FIELD;
use crate::error::{Result, TetherDbError};
use crate::value_utils::{get_nested_value, remove_nested_value, set_nested_value};

/// A single document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    fields: Map<String, Value>,
}

impl Document {
    /// New empty document (no identity yet)
    pub fn new() -> Self {
        Document { fields: Map::new() }
    }

    /// Build a document from a JSON value; the value must be an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Document { fields }),
            other => Err(TetherDbError::InvalidArgument(format!(
                "Document must be a JSON object, got {}",
                type_name(&other)
            ))),
        }
    }

    /// Parse a document from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// The document as a JSON value (clones the fields).
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    /// Consume the document into a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&self.fields).map_err(Into::into)
    }

    /// The document identity, if assigned.
    pub fn id(&self) -> Option<&str> {
        self.fields.get(ID_FIELD).and_then(Value::as_str)
    }

    /// Assign a fresh UUID identity when none is present; returns the id.
    pub fn ensure_id(&mut self) -> Result<String> {
        match self.fields.get(ID_FIELD) {
            Some(Value::String(id)) => Ok(id.clone()),
            Some(other) => Err(TetherDbError::InvalidArgument(format!(
                "{} must be a string, got {}",
                ID_FIELD,
                type_name(other)
            ))),
            None => {
                let id = Uuid::new_v4().to_string();
                // Identity goes first so serialized documents lead with _id.
                let mut fields = Map::new();
                fields.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                fields.extend(std::mem::take(&mut self.fields));
                self.fields = fields;
                Ok(id)
            }
        }
    }

    /// Resolve a dot-path field.
    pub fn get(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return None;
        }
        match path.split_once('.') {
            None => self.fields.get(path),
            Some((root, rest)) => get_nested_value(self.fields.get(root)?, rest),
        }
    }

    /// Assign a dot-path field, creating intermediate mappings as needed.
    pub fn set(&mut self, path: &str, value: Value) {
        if path.is_empty() {
            return;
        }
        match path.split_once('.') {
            None => {
                self.fields.insert(path.to_string(), value);
            }
            Some((root, rest)) => {
                let entry = self
                    .fields
                    .entry(root.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                set_nested_value(entry, rest, value);
            }
        }
    }

    /// Delete a dot-path field. Mapping keys are dropped; array indices leave
    /// a null hole. Missing paths are a silent no-op.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        match path.split_once('.') {
            None => self.fields.shift_remove(path),
            Some((root, rest)) => remove_nested_value(self.fields.get_mut(root)?, rest),
        }
    }

    /// Whether the dot-path resolves to a value.
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Field map accessor (insertion-ordered).
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        doc.into_value()
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
