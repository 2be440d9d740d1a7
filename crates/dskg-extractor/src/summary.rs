//! Ontology summary for prompting
//!
//! Renders the class forest as an indented list followed by every property
//! with its domain and range:
//!
//! ```text
//! Ontology Summary:
//!
//! Classes and Hierarchy:
//! - BatteryCell
//!   - CylindricalCell
//!
//! Object Properties:
//! - hasManufacturer: domain=[BatteryCell], range=[Manufacturer]
//!
//! Data Properties:
//! - hasNominalVoltage: domain=[ElectricalProperty], range=[float]
//! ```
//!
//! The registry is name-ordered, so output depends only on the declarations.
//! Every class subtree is expanded once. A class reached again through a
//! second parent is listed without its children, and a subclass cycle is cut
//! where a class would reappear below itself, so the output stays linear in
//! the size of the ontology.

use std::collections::BTreeSet;
use std::fmt::Write;

use dskg_core::{OntologyProperty, OntologySchema};

/// Marker appended to a class whose subtree would loop back on itself
pub const CYCLE_MARKER: &str = "[truncated: cycle]";

/// Marker appended to a class whose subtree was already listed under another parent
pub const SHARED_MARKER: &str = "[truncated: listed above]";

/// Renders an [`OntologySchema`] into a compact text dictionary
#[derive(Debug, Clone, Default)]
pub struct OntologySummarizer {
    /// Append class and property descriptions when the ontology has them
    pub include_descriptions: bool,
}

impl OntologySummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Include descriptions after names
    pub fn with_descriptions(mut self, enabled: bool) -> Self {
        self.include_descriptions = enabled;
        self
    }

    /// Render the summary
    pub fn summarize(&self, schema: &OntologySchema) -> String {
        let mut out = String::from("Ontology Summary:\n\nClasses and Hierarchy:\n");

        let mut visited = BTreeSet::new();
        let mut path = Vec::new();
        for root in schema.roots() {
            self.render_class(schema, root, 0, &mut path, &mut visited, &mut out);
        }

        // Classes only reachable through a cycle have no root above them
        let unreached: Vec<&str> = schema
            .class_names()
            .filter(|name| !visited.contains(*name))
            .collect();
        for name in unreached {
            if !visited.contains(name) {
                self.render_class(schema, name, 0, &mut path, &mut visited, &mut out);
            }
        }

        out.push_str("\nObject Properties:\n");
        for prop in schema.object_properties() {
            self.render_property(prop, &mut out);
        }

        out.push_str("\nData Properties:\n");
        for prop in schema.data_properties() {
            self.render_property(prop, &mut out);
        }

        out
    }

    fn render_class<'a>(
        &self,
        schema: &'a OntologySchema,
        name: &'a str,
        depth: usize,
        path: &mut Vec<&'a str>,
        visited: &mut BTreeSet<&'a str>,
        out: &mut String,
    ) {
        let indent = "  ".repeat(depth);

        if path.contains(&name) {
            tracing::debug!(class = name, "Subclass cycle truncated");
            let _ = writeln!(out, "{indent}- {name} {CYCLE_MARKER}");
            return;
        }
        if visited.contains(name) {
            let _ = writeln!(out, "{indent}- {name} {SHARED_MARKER}");
            return;
        }

        let _ = write!(out, "{indent}- {name}");
        if let Some(description) = self.description_of(schema, name) {
            let _ = write!(out, ": {description}");
        }
        out.push('\n');

        visited.insert(name);
        path.push(name);
        for child in schema.children(name) {
            self.render_class(schema, child, depth + 1, path, visited, out);
        }
        path.pop();
    }

    fn description_of<'a>(&self, schema: &'a OntologySchema, name: &str) -> Option<&'a str> {
        if !self.include_descriptions {
            return None;
        }
        schema.class(name)?.description.as_deref()
    }

    fn render_property(&self, prop: &OntologyProperty, out: &mut String) {
        let _ = write!(
            out,
            "- {}: domain=[{}], range=[{}]",
            prop.name, prop.domain, prop.range
        );
        if self.include_descriptions {
            if let Some(description) = &prop.description {
                let _ = write!(out, " ({description})");
            }
        }
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dskg_core::ontology::{ClassDefinition, OntologyDefinition, PropertyDefinition};

    fn class(name: &str, parents: &[&str]) -> ClassDefinition {
        ClassDefinition {
            name: name.to_string(),
            parents: parents.iter().map(|p| p.to_string()).collect(),
            description: None,
        }
    }

    fn prop(name: &str, domain: &str, range: &str) -> PropertyDefinition {
        PropertyDefinition {
            name: name.to_string(),
            domain: domain.to_string(),
            range: range.to_string(),
            description: None,
        }
    }

    fn schema(classes: Vec<ClassDefinition>, properties: Vec<PropertyDefinition>) -> OntologySchema {
        OntologySchema::from_definition(OntologyDefinition {
            iri: None,
            classes,
            properties,
        })
        .unwrap()
    }

    #[test]
    fn test_hierarchy_and_properties() {
        let s = schema(
            vec![
                class("BatteryCell", &["Thing"]),
                class("CylindricalCell", &["BatteryCell"]),
                class("Manufacturer", &[]),
            ],
            vec![
                prop("hasManufacturer", "BatteryCell", "Manufacturer"),
                prop("hasNominalVoltage", "BatteryCell", "xsd:float"),
            ],
        );

        let summary = OntologySummarizer::new().summarize(&s);
        let expected = "Ontology Summary:\n\
            \n\
            Classes and Hierarchy:\n\
            - BatteryCell\n\
            \x20 - CylindricalCell\n\
            - Manufacturer\n\
            \n\
            Object Properties:\n\
            - hasManufacturer: domain=[BatteryCell], range=[Manufacturer]\n\
            \n\
            Data Properties:\n\
            - hasNominalVoltage: domain=[BatteryCell], range=[float]\n";
        assert_eq!(summary, expected);
    }

    #[test]
    fn test_declaration_order_does_not_matter() {
        let forward = schema(
            vec![class("A", &[]), class("B", &["A"]), class("C", &["A"])],
            vec![prop("p", "A", "str"), prop("q", "B", "C")],
        );
        let backward = schema(
            vec![class("C", &["A"]), class("B", &["A"]), class("A", &[])],
            vec![prop("q", "B", "C"), prop("p", "A", "str")],
        );

        let summarizer = OntologySummarizer::new();
        assert_eq!(summarizer.summarize(&forward), summarizer.summarize(&backward));
    }

    #[test]
    fn test_cycle_below_root_is_truncated() {
        let s = schema(
            vec![class("A", &[]), class("B", &["A", "C"]), class("C", &["B"])],
            vec![prop("p", "A", "str")],
        );

        let summary = OntologySummarizer::new().summarize(&s);
        assert!(summary.contains("- A\n  - B\n    - C\n      - B [truncated: cycle]\n"));
    }

    #[test]
    fn test_rootless_cycle_is_still_listed() {
        let s = schema(
            vec![class("Root", &[]), class("X", &["Y"]), class("Y", &["X"])],
            vec![prop("p", "Root", "int")],
        );

        let summary = OntologySummarizer::new().summarize(&s);
        assert!(summary.contains("- X\n  - Y\n    - X [truncated: cycle]\n"));
        assert_eq!(summary.matches("- Y\n").count(), 1);
    }

    #[test]
    fn test_shared_subclass_expanded_once() {
        let s = schema(
            vec![
                class("BatteryCell", &[]),
                class("Component", &[]),
                class("Electrode", &["BatteryCell", "Component"]),
                class("Anode", &["Electrode"]),
            ],
            vec![prop("p", "BatteryCell", "str")],
        );

        let summary = OntologySummarizer::new().summarize(&s);
        assert!(summary.contains("- BatteryCell\n  - Electrode\n    - Anode\n"));
        assert!(summary.contains(&format!("- Component\n  - Electrode {SHARED_MARKER}\n")));
        assert_eq!(summary.matches("- Anode").count(), 1);
        assert!(!summary.contains(CYCLE_MARKER));
    }

    #[test]
    fn test_dense_hierarchy_stays_linear() {
        // every class is a subclass of all classes declared before it
        let names: Vec<String> = (0..24).map(|i| format!("C{i:02}")).collect();
        let classes = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let parents: Vec<&str> = names[..i].iter().map(String::as_str).collect();
                class(name, &parents)
            })
            .collect();
        let s = schema(classes, vec![prop("p", "C00", "str")]);

        let summary = OntologySummarizer::new().summarize(&s);
        let hierarchy_lines = summary
            .lines()
            .filter(|line| line.trim_start().starts_with("- C"))
            .count();

        // one expanded line per class plus one per extra parent edge
        let edges = 24 * 23 / 2;
        assert_eq!(hierarchy_lines, 1 + edges);
        for name in &names {
            assert_eq!(summary.matches(&format!("- {name}\n")).count(), 1, "{name}");
        }
    }

    #[test]
    fn test_descriptions_optional() {
        let mut battery = class("BatteryCell", &[]);
        battery.description = Some("A single electrochemical cell".to_string());
        let s = schema(vec![battery], vec![prop("hasModelName", "BatteryCell", "str")]);

        assert!(!OntologySummarizer::new()
            .summarize(&s)
            .contains("electrochemical"));
        assert!(OntologySummarizer::new()
            .with_descriptions(true)
            .summarize(&s)
            .contains("- BatteryCell: A single electrochemical cell\n"));
    }

    #[test]
    fn test_bundled_ontology_lists_every_property() {
        let s = OntologySchema::battery_cell().unwrap();
        let summary = OntologySummarizer::new().summarize(&s);

        for name in s.property_names() {
            assert!(summary.contains(&format!("- {name}: domain=")), "{name} missing");
        }
        assert!(summary.contains("- hasNumberOfCycles: domain=[CycleLife], range=[int]"));
        assert!(!summary.contains(CYCLE_MARKER));
    }
}
