//! Constrained output schema
//!
//! The contract every generation call must satisfy: a JSON array of objects
//! carrying exactly the six triple fields, with the type and relation fields
//! drawn from fixed enumerations. The JSON Schema document is handed to the
//! backend for decoding-time enforcement; the enumerations are kept alongside
//! it so output can be re-checked without a JSON Schema engine.

use std::collections::BTreeSet;

use serde_json::Value;
use thiserror::Error;

use crate::Triple;

/// Field names of a serialized triple, in schema order
pub const TRIPLE_FIELDS: [&str; 6] = [
    "used_text",
    "head",
    "head_type",
    "relation",
    "tail",
    "tail_type",
];

/// Earlier spelling of `used_text`, accepted on input
pub const LEGACY_USED_TEXT: &str = "Used_text";

/// Ways a model output can break the constrained schema
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaViolation {
    #[error("output is not valid JSON: {0}")]
    NotJson(String),

    #[error("expected a JSON array, found {0}")]
    NotArray(&'static str),

    #[error("item {index} is not an object")]
    NotObject { index: usize },

    #[error("item {index} is missing field '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("item {index} has unexpected field '{field}'")]
    UnexpectedField { index: usize, field: String },

    #[error("item {index} field '{field}' is not a string")]
    NotString { index: usize, field: &'static str },

    #[error("item {index} field '{field}' has value '{value}' outside the schema")]
    NotAllowed {
        index: usize,
        field: &'static str,
        value: String,
    },
}

/// Compiled output schema for triple generation
#[derive(Debug, Clone)]
pub struct ConstrainedSchema {
    name: String,
    json: Value,
    head_types: BTreeSet<String>,
    relations: BTreeSet<String>,
    tail_types: BTreeSet<String>,
}

impl ConstrainedSchema {
    /// Assemble a schema from its JSON document and enumerations
    pub fn new(
        name: impl Into<String>,
        json: Value,
        head_types: BTreeSet<String>,
        relations: BTreeSet<String>,
        tail_types: BTreeSet<String>,
    ) -> Self {
        Self {
            name: name.into(),
            json,
            head_types,
            relations,
            tail_types,
        }
    }

    /// Schema name (used by backends that require one)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// JSON Schema document
    pub fn json(&self) -> &Value {
        &self.json
    }

    pub fn head_types(&self) -> &BTreeSet<String> {
        &self.head_types
    }

    pub fn relations(&self) -> &BTreeSet<String> {
        &self.relations
    }

    pub fn tail_types(&self) -> &BTreeSet<String> {
        &self.tail_types
    }

    /// Parse `output` and check it against the schema
    pub fn check(&self, output: &str) -> Result<Vec<Triple>, SchemaViolation> {
        let value: Value =
            serde_json::from_str(output).map_err(|e| SchemaViolation::NotJson(e.to_string()))?;
        self.check_value(&value)
    }

    /// Check an already parsed JSON value against the schema
    pub fn check_value(&self, value: &Value) -> Result<Vec<Triple>, SchemaViolation> {
        let items = value
            .as_array()
            .ok_or_else(|| SchemaViolation::NotArray(json_kind(value)))?;

        items
            .iter()
            .enumerate()
            .map(|(index, item)| self.check_item(index, item))
            .collect()
    }

    /// Check a single triple
    pub fn check_triple(&self, index: usize, triple: &Triple) -> Result<(), SchemaViolation> {
        let enumerated = [
            ("head_type", &triple.head_type, &self.head_types),
            ("relation", &triple.relation, &self.relations),
            ("tail_type", &triple.tail_type, &self.tail_types),
        ];

        for (field, value, allowed) in enumerated {
            if !allowed.contains(value.as_str()) {
                return Err(SchemaViolation::NotAllowed {
                    index,
                    field,
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_item(&self, index: usize, item: &Value) -> Result<Triple, SchemaViolation> {
        let obj = item
            .as_object()
            .ok_or(SchemaViolation::NotObject { index })?;

        // `Used_text` stands in for `used_text`, but not next to it
        let legacy = obj.contains_key(LEGACY_USED_TEXT) && !obj.contains_key("used_text");
        if let Some(extra) = obj.keys().find(|k| {
            let k = k.as_str();
            !TRIPLE_FIELDS.contains(&k) && !(legacy && k == LEGACY_USED_TEXT)
        }) {
            return Err(SchemaViolation::UnexpectedField {
                index,
                field: extra.clone(),
            });
        }

        let field = |name: &'static str| -> Result<String, SchemaViolation> {
            let value = match name {
                "used_text" if legacy => obj.get(LEGACY_USED_TEXT),
                _ => obj.get(name),
            };
            match value {
                None => Err(SchemaViolation::MissingField { index, field: name }),
                Some(Value::String(s)) => Ok(s.clone()),
                Some(_) => Err(SchemaViolation::NotString { index, field: name }),
            }
        };

        let triple = Triple {
            used_text: field("used_text")?,
            head: field("head")?,
            head_type: field("head_type")?,
            relation: field("relation")?,
            tail: field("tail")?,
            tail_type: field("tail_type")?,
        };

        self.check_triple(index, &triple)?;
        Ok(triple)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
