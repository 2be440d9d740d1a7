//! Ontology registry
//!
//! A typed, immutable view of the class/property schema a run is validated
//! against. Built once from an [`OntologyDefinition`] (JSON or TOML on disk)
//! and queried by name afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{DskgError, OntologySource, Result};

/// Universal root class; declaring it as a parent means "no parent"
pub const THING: &str = "Thing";

const BATTERY_CELL_ONTOLOGY: &str = include_str!("../ontologies/battery_cell.json");

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while building an ontology
#[derive(Error, Debug, PartialEq, Eq)]
pub enum OntologyError {
    #[error("ontology declares no {0}")]
    Empty(&'static str),

    #[error("class '{0}' is declared more than once")]
    DuplicateClass(String),

    #[error("property '{0}' is declared more than once")]
    DuplicateProperty(String),

    #[error("name '{0}' is used for both a class and a property")]
    NameClash(String),

    #[error("class '{class}' has undeclared parent '{parent}'")]
    UnknownParent { class: String, parent: String },

    #[error("property '{property}' has undeclared domain '{domain}'")]
    UnknownDomain { property: String, domain: String },

    #[error("property '{property}' has undeclared range '{range}'")]
    UnknownRange { property: String, range: String },

    #[error("invalid ontology file: {0}")]
    Parse(String),
}

// ============================================================================
// Primitive kinds and ranges
// ============================================================================

/// Literal value kinds a data property may range over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    String,
    Float,
    Integer,
    Boolean,
}

impl Primitive {
    /// All primitive kinds, in marker order
    pub const ALL: [Primitive; 4] = [
        Primitive::String,
        Primitive::Float,
        Primitive::Integer,
        Primitive::Boolean,
    ];

    /// Marker used for `tail_type` and in ontology summaries
    pub fn marker(&self) -> &'static str {
        match self {
            Self::String => "str",
            Self::Float => "float",
            Self::Integer => "int",
            Self::Boolean => "bool",
        }
    }

    /// Parse a marker or one of its common spellings
    pub fn parse(s: &str) -> Option<Self> {
        let lowered = s.trim().to_lowercase();
        let bare = lowered.strip_prefix("xsd:").unwrap_or(&lowered);
        match bare {
            "str" | "string" => Some(Self::String),
            "float" | "double" | "decimal" => Some(Self::Float),
            "int" | "integer" => Some(Self::Integer),
            "bool" | "boolean" => Some(Self::Boolean),
            _ => None,
        }
    }
}

impl std::fmt::Display for Primitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.marker())
    }
}

/// Range of a property: another class or a literal kind
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Range {
    Class(String),
    Primitive(Primitive),
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Class(name) => f.write_str(name),
            Self::Primitive(p) => write!(f, "{p}"),
        }
    }
}

// ============================================================================
// On-disk definition
// ============================================================================

/// Serialized ontology, as read from JSON or TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OntologyDefinition {
    /// Ontology IRI (informational)
    #[serde(default)]
    pub iri: Option<String>,

    /// Declared classes
    #[serde(default)]
    pub classes: Vec<ClassDefinition>,

    /// Declared properties
    #[serde(default)]
    pub properties: Vec<PropertyDefinition>,
}

/// Serialized class declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassDefinition {
    pub name: String,

    /// Direct superclasses; `Thing` may be listed and is ignored
    #[serde(default)]
    pub parents: Vec<String>,

    #[serde(default)]
    pub description: Option<String>,
}

/// Serialized property declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub name: String,
    pub domain: String,
    pub range: String,

    #[serde(default)]
    pub description: Option<String>,
}

// ============================================================================
// Registry
// ============================================================================

/// Ontology class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OntologyClass {
    pub name: String,
    /// Direct superclasses other than `Thing`, sorted
    pub parents: Vec<String>,
    pub description: Option<String>,
}

/// Ontology property with its allowed domain and range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OntologyProperty {
    pub name: String,
    pub domain: String,
    pub range: Range,
    pub description: Option<String>,
}

impl OntologyProperty {
    /// Object properties link two classes; data properties end in a literal
    pub fn is_object_property(&self) -> bool {
        matches!(self.range, Range::Class(_))
    }
}

/// Immutable class/property registry
///
/// Storage is ordered by name, so every traversal is deterministic for a
/// given set of declarations regardless of declaration order.
#[derive(Debug, Clone)]
pub struct OntologySchema {
    iri: Option<String>,
    classes: BTreeMap<String, OntologyClass>,
    properties: BTreeMap<String, OntologyProperty>,
    children: BTreeMap<String, BTreeSet<String>>,
}

impl OntologySchema {
    /// Build and validate a registry from a definition
    pub fn from_definition(def: OntologyDefinition) -> std::result::Result<Self, OntologyError> {
        if def.classes.is_empty() {
            return Err(OntologyError::Empty("classes"));
        }
        if def.properties.is_empty() {
            return Err(OntologyError::Empty("properties"));
        }

        let mut classes = BTreeMap::new();
        for class in def.classes {
            let name = class.name.trim().to_string();
            if classes.contains_key(&name) {
                return Err(OntologyError::DuplicateClass(name));
            }

            let parents: BTreeSet<String> = class
                .parents
                .iter()
                .map(|p| p.trim().to_string())
                .filter(|p| p != THING && !p.is_empty())
                .collect();

            classes.insert(
                name.clone(),
                OntologyClass {
                    name,
                    parents: parents.into_iter().collect(),
                    description: class.description,
                },
            );
        }

        let mut children: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for class in classes.values() {
            for parent in &class.parents {
                if !classes.contains_key(parent) {
                    return Err(OntologyError::UnknownParent {
                        class: class.name.clone(),
                        parent: parent.clone(),
                    });
                }
                children
                    .entry(parent.clone())
                    .or_default()
                    .insert(class.name.clone());
            }
        }

        let mut properties = BTreeMap::new();
        for prop in def.properties {
            let name = prop.name.trim().to_string();
            if properties.contains_key(&name) {
                return Err(OntologyError::DuplicateProperty(name));
            }
            if classes.contains_key(&name) {
                return Err(OntologyError::NameClash(name));
            }

            let domain = prop.domain.trim().to_string();
            if !classes.contains_key(&domain) {
                return Err(OntologyError::UnknownDomain {
                    property: name,
                    domain,
                });
            }

            let raw_range = prop.range.trim();
            let range = if classes.contains_key(raw_range) {
                Range::Class(raw_range.to_string())
            } else if let Some(p) = Primitive::parse(raw_range) {
                Range::Primitive(p)
            } else {
                return Err(OntologyError::UnknownRange {
                    property: name,
                    range: raw_range.to_string(),
                });
            };

            properties.insert(
                name.clone(),
                OntologyProperty {
                    name,
                    domain,
                    range,
                    description: prop.description,
                },
            );
        }

        Ok(Self {
            iri: def.iri,
            classes,
            properties,
            children,
        })
    }

    /// Parse a JSON definition
    pub fn from_json(json: &str) -> std::result::Result<Self, OntologyError> {
        let def: OntologyDefinition =
            serde_json::from_str(json).map_err(|e| OntologyError::Parse(e.to_string()))?;
        Self::from_definition(def)
    }

    /// Parse a TOML definition
    pub fn from_toml(toml_str: &str) -> std::result::Result<Self, OntologyError> {
        let def: OntologyDefinition =
            toml::from_str(toml_str).map_err(|e| OntologyError::Parse(e.to_string()))?;
        Self::from_definition(def)
    }

    /// Load from a `.json` or `.toml` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| DskgError::ontology(path, e))?;

        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);

        let schema = if is_toml {
            Self::from_toml(&content)
        } else {
            Self::from_json(&content)
        };

        let schema = schema.map_err(|e| DskgError::ontology(path, e))?;
        tracing::debug!(
            path = %path.display(),
            classes = schema.class_count(),
            properties = schema.property_count(),
            "Ontology loaded"
        );
        Ok(schema)
    }

    /// The battery-cell datasheet ontology shipped with dskg
    pub fn battery_cell() -> std::result::Result<Self, OntologyError> {
        Self::from_json(BATTERY_CELL_ONTOLOGY)
    }

    /// Ontology IRI, if declared
    pub fn iri(&self) -> Option<&str> {
        self.iri.as_deref()
    }

    /// Number of declared classes
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Number of declared properties
    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    /// Look up a class by name
    pub fn class(&self, name: &str) -> Option<&OntologyClass> {
        self.classes.get(name)
    }

    /// Look up a property by name
    pub fn property(&self, name: &str) -> Option<&OntologyProperty> {
        self.properties.get(name)
    }

    pub fn has_class(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Whether `name` is a declared class or a primitive marker
    pub fn is_valid_type(&self, name: &str) -> bool {
        self.has_class(name) || Primitive::ALL.iter().any(|p| p.marker() == name)
    }

    /// Class names in sorted order
    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    /// Property names in sorted order
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    /// All classes in name order
    pub fn classes(&self) -> impl Iterator<Item = &OntologyClass> {
        self.classes.values()
    }

    /// Object properties in name order
    pub fn object_properties(&self) -> impl Iterator<Item = &OntologyProperty> {
        self.properties.values().filter(|p| p.is_object_property())
    }

    /// Data properties in name order
    pub fn data_properties(&self) -> impl Iterator<Item = &OntologyProperty> {
        self.properties.values().filter(|p| !p.is_object_property())
    }

    /// Classes with no superclass other than `Thing`
    pub fn roots(&self) -> impl Iterator<Item = &str> {
        self.classes
            .values()
            .filter(|c| c.parents.is_empty())
            .map(|c| c.name.as_str())
    }

    /// Direct subclasses of `name`, sorted
    pub fn children(&self, name: &str) -> impl Iterator<Item = &str> {
        self.children
            .get(name)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }
}

/// Reads ontologies from `.json` / `.toml` files
#[derive(Debug, Clone, Copy, Default)]
pub struct FileOntologySource;

impl OntologySource for FileOntologySource {
    fn load(&self, path: &Path) -> Result<OntologySchema> {
        OntologySchema::from_file(path)
    }
}

// ============================================================================
// Tests
// ============================================================================
