//! Prompt construction for extraction and validation
//!
//! Both prompts embed the ontology summary and the chunk verbatim. Caller
//! text is never trimmed or rewritten.

use dskg_core::Triple;
use serde::{Deserialize, Serialize};

const EXTRACTION_INSTRUCTIONS: &str = r#"You are a battery datasheet information extraction model. Your task is to extract **only technical datasheet information** such as:

- Electrical specifications: nominal voltage, capacity, charge/discharge limits, internal resistance
- Mechanical specifications: dimensions, mass
- Materials & components: electrodes, separators, electrolytes
- Cell type / chemistry

RULES:

1. Process the text sentence by sentence.
2. Map each entity to a class from the ontology dictionary.
3. Use only valid relations (object/data properties) from the ontology.
4. Normalize entity names to full canonical identifiers.
5. Return ONLY triples aligned with the ontology and found in the text."#;

const VALIDATION_INSTRUCTIONS: &str = r#"You are an expert validator for battery datasheet information. Your task is to strictly validate candidate triples.

RULES:

1. Keep only triples that describe **technical datasheet information**:
   - Electrical properties: voltage, capacity, charge/discharge limits, internal resistance
   - Mechanical properties: dimensions, mass
   - Materials & components: electrodes, electrolytes, separators
   - Cell type / chemistry
2. Verify that each entity exists in the text chunk.
3. Verify ontology alignment: head_type, tail_type, relation must exist in ontology.
4. Ignore all non-battery content (authors, references, journals, citations, etc.)
5. Do not invent new triples; only keep or drop the candidates."#;

const OUTPUT_FORMAT: &str = r#"Output format:
JSON array of objects with keys:
"used_text", "head", "head_type", "relation", "tail", "tail_type""#;

/// A worked example shown to the model before the chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FewShotExample {
    /// Source sentence the triple comes from
    pub chunk_text: String,

    /// Expected triple
    pub triple: Triple,
}

impl FewShotExample {
    pub fn new(chunk_text: impl Into<String>, triple: Triple) -> Self {
        Self {
            chunk_text: chunk_text.into(),
            triple,
        }
    }

    fn render(&self) -> String {
        let t = &self.triple;
        format!(
            "Example:\nchunk_text: {}\nused_text: {}\nhead: {}\nhead_type: {}\nrelation: {}\ntail: {}\ntail_type: {}\n",
            self.chunk_text, t.used_text, t.head, t.head_type, t.relation, t.tail, t.tail_type
        )
    }
}

/// Datasheet examples in the six-field triple shape
pub fn default_examples() -> Vec<FewShotExample> {
    let cell_sentence =
        "The 18650 lithium-ion cell has a nominal voltage of 3.6V and a nominal capacity of 3000mAh.";
    let cell_evidence =
        "The 18650 lithium-ion cell has a nominal voltage of 3.6V and a nominal capacity of 3000mAh";

    vec![
        FewShotExample::new(
            cell_sentence,
            Triple::new(
                cell_evidence,
                "18650 LithiumIonCell",
                "BatteryCell",
                "hasNominalVoltage",
                "3.6",
                "float",
            ),
        ),
        FewShotExample::new(
            cell_sentence,
            Triple::new(
                cell_evidence,
                "18650 LithiumIonCell",
                "BatteryCell",
                "hasNominalCapacity",
                "3000",
                "float",
            ),
        ),
        FewShotExample::new(
            "The cell mass is 45 grams and the maximum charge voltage is 4.2V.",
            Triple::new(
                "The cell mass is 45 grams and the maximum charge voltage is 4.2V",
                "LithiumIonCell",
                "BatteryCell",
                "hasMass",
                "45",
                "float",
            ),
        ),
    ]
}

/// Composes extraction and validation prompts
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    examples: Vec<FewShotExample>,
}

impl PromptBuilder {
    /// Builder with the default datasheet examples
    pub fn new() -> Self {
        Self {
            examples: default_examples(),
        }
    }

    /// Replace the few-shot examples
    pub fn with_examples(mut self, examples: Vec<FewShotExample>) -> Self {
        self.examples = examples;
        self
    }

    pub fn examples(&self) -> &[FewShotExample] {
        &self.examples
    }

    /// Prompt asking for candidate triples in `chunk_text`
    pub fn build_extraction_prompt(&self, chunk_text: &str, ontology_summary: &str) -> String {
        let examples: Vec<String> = self.examples.iter().map(FewShotExample::render).collect();

        format!(
            "{EXTRACTION_INSTRUCTIONS}\n\n{OUTPUT_FORMAT}\n\n\
             Ontology dictionary (classes and relations):\n{ontology_summary}\n\n\
             Few-shot examples:\n{}\n\n\
             Text to analyze:\n\"\"\"{chunk_text}\"\"\"\n\n\
             Return ONLY the JSON array of valid datasheet triples.\n",
            examples.join("\n")
        )
    }

    /// Prompt asking the model to keep only sound `candidates`
    pub fn build_validation_prompt(
        &self,
        candidates: &[Triple],
        chunk_text: &str,
        ontology_summary: &str,
    ) -> String {
        let candidates = serde_json::to_string_pretty(candidates)
            .expect("triples are plain string records and always serialize");

        format!(
            "{VALIDATION_INSTRUCTIONS}\n\n{OUTPUT_FORMAT}\n\n\
             Candidate triples:\n{candidates}\n\n\
             Text chunk:\n\"\"\"{chunk_text}\"\"\"\n\n\
             Ontology dictionary:\n{ontology_summary}\n\n\
             Return ONLY the JSON array of validated datasheet triples.\n"
        )
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}
