//! Ontology to constrained output schema
//!
//! The compiled schema is a JSON array of objects with exactly the six
//! triple fields. Type fields enumerate the ontology's classes (tails may
//! also be a primitive marker) and `relation` enumerates its properties.

use std::collections::BTreeSet;

use dskg_core::{ConstrainedSchema, OntologySchema, Primitive, TRIPLE_FIELDS};
use serde_json::{json, Value};

/// Name given to compiled schemas
pub const SCHEMA_NAME: &str = "ontology_triples";

/// Builds the [`ConstrainedSchema`] shared by extraction and validation calls
pub struct SchemaCompiler;

impl SchemaCompiler {
    /// Compile the output schema for an ontology
    pub fn compile(ontology: &OntologySchema) -> ConstrainedSchema {
        let head_types: BTreeSet<String> = ontology.class_names().map(str::to_string).collect();
        let relations: BTreeSet<String> = ontology.property_names().map(str::to_string).collect();

        let mut tail_types = head_types.clone();
        tail_types.extend(Primitive::ALL.iter().map(|p| p.marker().to_string()));

        let mut properties = serde_json::Map::new();
        for field in TRIPLE_FIELDS {
            let spec = match field {
                "head_type" => enum_of(&head_types),
                "relation" => enum_of(&relations),
                "tail_type" => enum_of(&tail_types),
                _ => json!({ "type": "string" }),
            };
            properties.insert(field.to_string(), spec);
        }

        let document = json!({
            "type": "array",
            "items": {
                "type": "object",
                "properties": properties,
                "required": TRIPLE_FIELDS,
                "additionalProperties": false,
            }
        });

        tracing::debug!(
            head_types = head_types.len(),
            relations = relations.len(),
            tail_types = tail_types.len(),
            "Output schema compiled"
        );

        ConstrainedSchema::new(SCHEMA_NAME, document, head_types, relations, tail_types)
    }
}

fn enum_of(values: &BTreeSet<String>) -> Value {
    json!({ "type": "string", "enum": values })
}
